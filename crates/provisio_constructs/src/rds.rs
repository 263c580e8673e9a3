//! Managed relational databases.

use serde_json::json;

use provisio_core::{CoreResult, DeletionPolicy, ResourceRef, StackScope, Token};

use crate::ec2::{Peer, Port, SecurityGroup, SecurityGroupRef, SubnetType, VpcRef};
use crate::logs::RetentionDays;
use crate::secrets::SecretRef;

/// Database engine and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseEngine {
    Postgres { version: String },
}

impl DatabaseEngine {
    pub fn postgres(version: impl Into<String>) -> Self {
        DatabaseEngine::Postgres {
            version: version.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgres { .. } => "postgres",
        }
    }

    pub fn version(&self) -> &str {
        match self {
            DatabaseEngine::Postgres { version } => version,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::Postgres { .. } => 5432,
        }
    }
}

/// A single database instance.
#[derive(Debug, Clone)]
pub struct DatabaseInstance {
    construct_id: String,
    vpc: VpcRef,
    subnet_type: SubnetType,
    engine: DatabaseEngine,
    identifier: Option<String>,
    database_name: Option<String>,
    instance_class: String,
    credentials: Option<SecretRef>,
    allocated_storage_gb: u32,
    storage_type: String,
    backup_retention_days: u32,
    log_exports: Vec<String>,
    log_retention: Option<RetentionDays>,
    removal: DeletionPolicy,
}

impl DatabaseInstance {
    pub fn new(
        construct_id: impl Into<String>,
        vpc: &VpcRef,
        subnet_type: SubnetType,
        engine: DatabaseEngine,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            vpc: vpc.clone(),
            subnet_type,
            engine,
            identifier: None,
            database_name: None,
            instance_class: "db.t3.micro".to_string(),
            credentials: None,
            allocated_storage_gb: 20,
            storage_type: "gp2".to_string(),
            backup_retention_days: 1,
            log_exports: Vec::new(),
            log_retention: None,
            removal: DeletionPolicy::Snapshot,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn with_instance_class(mut self, class: impl Into<String>) -> Self {
        self.instance_class = class.into();
        self
    }

    /// Take the master username and password from a JSON secret.
    pub fn with_credentials(mut self, secret: &SecretRef) -> Self {
        self.credentials = Some(secret.clone());
        self
    }

    pub fn with_storage(mut self, gb: u32, storage_type: impl Into<String>) -> Self {
        self.allocated_storage_gb = gb;
        self.storage_type = storage_type.into();
        self
    }

    pub fn with_backup_retention_days(mut self, days: u32) -> Self {
        self.backup_retention_days = days;
        self
    }

    /// Export a log type to the logging service with a retention period.
    pub fn with_log_export(mut self, log_type: impl Into<String>, retention: RetentionDays) -> Self {
        self.log_exports.push(log_type.into());
        self.log_retention = Some(retention);
        self
    }

    pub fn with_removal_policy(mut self, policy: DeletionPolicy) -> Self {
        self.removal = policy;
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<DatabaseRef> {
        let id = self.construct_id.clone();

        let subnet_ids = scope.resolve_all(&self.vpc.subnet_ids(self.subnet_type));
        let subnet_group = scope.add_resource(
            &format!("{id}-subnet-group"),
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": format!("Subnet group for {id} database"),
                "SubnetIds": subnet_ids,
            }),
        )?;

        let security_group = SecurityGroup::new(format!("{id}-security-group"), &self.vpc)
            .with_description(format!("Security group for {id} database"))
            .add(scope)?;

        let mut properties = json!({
            "Engine": self.engine.name(),
            "EngineVersion": self.engine.version(),
            "DBInstanceClass": self.instance_class,
            "AllocatedStorage": self.allocated_storage_gb.to_string(),
            "StorageType": self.storage_type,
            "MultiAZ": false,
            "AutoMinorVersionUpgrade": false,
            "BackupRetentionPeriod": self.backup_retention_days,
            "DeletionProtection": false,
            "DeleteAutomatedBackups": false,
            "PubliclyAccessible": false,
            "CopyTagsToSnapshot": true,
        });
        properties["DBSubnetGroupName"] = scope.resolve(&subnet_group.ref_token());
        properties["VPCSecurityGroups"] = json!([scope.resolve(&security_group.id)]);
        if let Some(identifier) = &self.identifier {
            scope.claim_name("db-instance", identifier)?;
            properties["DBInstanceIdentifier"] = json!(identifier);
        }
        if let Some(name) = &self.database_name {
            properties["DBName"] = json!(name);
        }
        if let Some(secret) = &self.credentials {
            properties["MasterUsername"] = scope.resolve(&secret.field("username"));
            properties["MasterUserPassword"] = scope.resolve(&secret.field("password"));
        }
        if !self.log_exports.is_empty() {
            properties["EnableCloudwatchLogsExports"] = json!(self.log_exports);
        }

        let instance = scope.add_resource(&id, "AWS::RDS::DBInstance", properties)?;
        scope.set_deletion_policy(&instance, self.removal)?;

        if let Some(secret) = &self.credentials {
            let secret_id = scope.resolve(&secret.arn);
            let target = scope.resolve(&instance.ref_token());
            scope.add_resource(
                &format!("{id}-secret-attachment"),
                "AWS::SecretsManager::SecretTargetAttachment",
                json!({
                    "SecretId": secret_id,
                    "TargetId": target,
                    "TargetType": "AWS::RDS::DBInstance",
                }),
            )?;
        }

        if let (Some(retention), Some(identifier)) = (self.log_retention, &self.identifier) {
            for log_type in &self.log_exports {
                let group = scope.add_resource(
                    &format!("{id}-{log_type}-log-group"),
                    "AWS::Logs::LogGroup",
                    json!({
                        "LogGroupName": format!("/aws/rds/instance/{identifier}/{log_type}"),
                        "RetentionInDays": retention.days(),
                    }),
                )?;
                scope.add_depends_on(&group, &instance)?;
                scope.set_deletion_policy(&group, DeletionPolicy::Delete)?;
            }
        }

        Ok(DatabaseRef {
            endpoint_address: instance.attr("Endpoint.Address"),
            endpoint_port: instance.attr("Endpoint.Port"),
            port: self.engine.default_port(),
            security_group,
            resource: instance,
        })
    }
}

/// Handle to a declared database instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRef {
    pub resource: ResourceRef,
    pub endpoint_address: Token,
    pub endpoint_port: Token,
    pub port: u16,
    pub security_group: SecurityGroupRef,
}

impl DatabaseRef {
    /// Open the database port to `peer`.
    pub fn allow_from(
        &self,
        scope: &mut StackScope<'_>,
        construct_id: &str,
        peer: &Peer,
    ) -> CoreResult<ResourceRef> {
        self.security_group.add_ingress_rule(
            scope,
            construct_id,
            peer,
            Port::Tcp(self.port),
            &format!("allow {} from {}", self.port, describe(peer)),
        )
    }
}

fn describe(peer: &Peer) -> String {
    match peer {
        Peer::Ipv4(cidr) => cidr.clone(),
        Peer::SecurityGroup(id) => id.to_string(),
    }
}
