//! The API database.

use provisio_constructs::{
    DatabaseEngine, DatabaseInstance, DatabaseRef, Peer, RetentionDays, Secret, SecretRef,
    SecretStringGenerator, StringParameter, SubnetType, VpcRef,
};
use provisio_core::{CoreResult, DeletionPolicy, StackScope};

pub const STACK_NAME: &str = "db";

/// Name of the application database.
pub const DB_NAME: &str = "nm";

pub const POSTGRES_VERSION: &str = "12.2";

#[derive(Debug, Clone)]
pub struct DatabaseOutputs {
    pub database: DatabaseRef,
    /// Master credentials
    pub secret: SecretRef,
}

pub fn build(scope: &mut StackScope<'_>, vpc: &VpcRef) -> CoreResult<DatabaseOutputs> {
    scope.set_description("PostgreSQL database and its credentials");
    let secret_name = scope.physical_name("api-db-secret");
    let secret = Secret::new(
        "api-db-secret",
        SecretStringGenerator::credentials("postgres", 8),
    )
    .with_name(secret_name)
    .add(scope)?;
    StringParameter::named("ssm-pg-secret-name", secret.name.clone()).publish(scope)?;

    let identifier = scope.physical_name("api-pg");
    let database = DatabaseInstance::new(
        "api-pg",
        vpc,
        SubnetType::Isolated,
        DatabaseEngine::postgres(POSTGRES_VERSION),
    )
    .with_identifier(identifier)
    .with_database_name(DB_NAME)
    .with_instance_class("db.t2.micro")
    .with_credentials(&secret)
    .with_storage(10, "gp2")
    .with_backup_retention_days(7)
    .with_log_export("postgresql", RetentionDays::OneWeek)
    .with_removal_policy(DeletionPolicy::Delete)
    .add(scope)?;

    // only internal traffic reaches the database
    let vpc_cidr = scope.context().common.vpc_default_cidr.clone();
    database.allow_from(scope, "api-pg-from-vpc", &Peer::ipv4(vpc_cidr))?;

    StringParameter::named("ssm-api-db-dns", database.endpoint_address.clone()).publish(scope)?;
    StringParameter::named("ssm-api-db-name", DB_NAME).publish(scope)?;

    Ok(DatabaseOutputs { database, secret })
}
