//! # provisio_constructs
//!
//! Typed builders for the resources provisio stacks declare.
//!
//! Every builder follows the same shape: configure with `with_*` calls,
//! then `add` it to a [`StackScope`](provisio_core::StackScope) to get a
//! handle back. Handles carry [`Token`](provisio_core::Token)s, so passing
//! one to a builder in another stack turns into an import automatically.
//!
//! ```rust,ignore
//! let vpc = app.stack("foundation", |scope| {
//!     Vpc::new("vpc", "10.0.0.0/16".parse()?)
//!         .with_subnet(SubnetConfiguration::new("Public", SubnetType::Public, 24))
//!         .add(scope)
//! })?;
//! ```

pub mod acm;
pub mod ec2;
pub mod ecr;
pub mod ecs;
pub mod eks;
pub mod elb;
pub mod iam;
pub mod logs;
pub mod rds;
pub mod route53;
pub mod s3;
pub mod secrets;
pub mod ssm;

pub use acm::{Certificate, CertificateRef};
pub use ec2::{
    Instance, MachineImage, Peer, Port, SecurityGroup, SecurityGroupRef, SubnetConfiguration,
    SubnetRef, SubnetType, Vpc, VpcRef,
};
pub use ecr::{Repository, RepositoryRef};
pub use ecs::{
    Cluster as EcsCluster, ClusterRef as EcsClusterRef, ContainerDefinition, FargateService,
    FargateTaskDefinition, PortMapping, TaskDefinitionRef,
};
pub use eks::{
    alb_controller_repo, AwsAuth, Cluster as EksCluster, ClusterRef as EksClusterRef,
    EndpointAccess, Nodegroup, OidcProviderRef, OpenIdConnectProvider, Taint, TaintEffect,
};
pub use elb::{
    ApplicationLoadBalancer, ApplicationProtocol, HealthCheck, Listener, ListenerAction,
    LoadBalancerRef, TargetGroup, TargetGroupRef,
};
pub use iam::{
    assume_role_trust_policy, managed_policy_arn, Effect, Policy, PolicyStatement, Principal,
    Role, RoleRef,
};
pub use logs::{LogGroup, LogGroupRef, RetentionDays};
pub use rds::{DatabaseEngine, DatabaseInstance, DatabaseRef};
pub use route53::{ARecord, AliasTarget, HostedZoneRef};
pub use s3::{Bucket, BucketRef};
pub use secrets::{Secret, SecretRef, SecretStringGenerator};
pub use ssm::StringParameter;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use provisio_config::PropertiesLoader;
    use provisio_core::{App, DeployContext, DeployEnvironment};

    pub fn context() -> DeployContext {
        let conf = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf"));
        let environment = DeployEnvironment::new("dev", "111122223333", "us-east-1").unwrap();
        let props = PropertiesLoader::new(conf).load_pair("dev").unwrap();
        DeployContext::from_properties(environment, props)
    }

    pub fn app() -> App {
        App::new(context())
    }
}
