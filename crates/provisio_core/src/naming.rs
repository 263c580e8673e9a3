//! Deterministic resource naming.
//!
//! Every provisioned resource and every published parameter is named
//! `{prefix}-{environment}-{name}`. External tooling relies on the same
//! convention to find resources without running this program.

use provisio_config::CommonProperties;

/// Build the identifier of `resource_name` for a deployment environment.
pub fn id_gen(deploy_env: &str, comm_props: &CommonProperties, resource_name: &str) -> String {
    format!("{}-{}-{}", comm_props.product_prefix, deploy_env, resource_name)
}

/// Naming helper bound to one environment and product prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNamer {
    prefix: String,
    environment: String,
}

impl ResourceNamer {
    pub fn new(prefix: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            environment: environment.into(),
        }
    }

    pub fn from_props(deploy_env: &str, comm_props: &CommonProperties) -> Self {
        Self::new(comm_props.product_prefix.clone(), deploy_env)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn name(&self, resource_name: &str) -> String {
        format!("{}-{}-{}", self.prefix, self.environment, resource_name)
    }

    /// Pattern matching every name this namer can produce.
    pub fn wildcard(&self) -> String {
        self.name("*")
    }

    /// Whether `name` belongs to this environment and product.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.name(""))
    }
}

/// Build an ARN. Global services pass an empty region and/or account.
pub fn arn(service: &str, region: &str, account: &str, resource: &str) -> String {
    format!("arn:aws:{service}:{region}:{account}:{resource}")
}
