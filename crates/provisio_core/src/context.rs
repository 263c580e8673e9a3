//! Deployment context handed to every stack constructor.

use uuid::Uuid;

use provisio_config::{CommonProperties, DeploymentProperties, EnvDepProperties};

use crate::environment::DeployEnvironment;
use crate::naming::{arn, ResourceNamer};

/// Immutable inputs of one deployment run.
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Unique id of this synthesis run
    pub run_id: Uuid,
    /// Target environment, account and region
    pub environment: DeployEnvironment,
    /// Shared properties
    pub common: CommonProperties,
    /// Environment-specific properties
    pub env: EnvDepProperties,
    namer: ResourceNamer,
}

impl DeployContext {
    pub fn new(
        environment: DeployEnvironment,
        common: CommonProperties,
        env: EnvDepProperties,
    ) -> Self {
        let namer = ResourceNamer::from_props(&environment.name, &common);
        Self {
            run_id: Uuid::new_v4(),
            environment,
            common,
            env,
            namer,
        }
    }

    pub fn from_properties(environment: DeployEnvironment, props: DeploymentProperties) -> Self {
        Self::new(environment, props.common, props.env)
    }

    pub fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    /// Shorthand for the identifier of `resource_name`.
    pub fn id(&self, resource_name: &str) -> String {
        self.namer.name(resource_name)
    }

    pub fn account(&self) -> &str {
        &self.environment.account
    }

    pub fn region(&self) -> &str {
        &self.environment.region
    }

    /// ARN of a regional resource in the deployment account.
    pub fn regional_arn(&self, service: &str, resource: &str) -> String {
        arn(service, self.region(), self.account(), resource)
    }

    /// ARN of an IAM role in the deployment account.
    pub fn role_arn(&self, role_name: &str) -> String {
        arn("iam", "", self.account(), &format!("role/{role_name}"))
    }

    /// ARN of a parameter published under `name`.
    pub fn parameter_arn(&self, name: &str) -> String {
        self.regional_arn("ssm", &format!("parameter/{name}"))
    }
}
