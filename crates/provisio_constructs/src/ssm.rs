//! String parameters shared through the parameter store.

use provisio_core::{CoreResult, StackScope, Token};

/// A parameter published under the deployment's naming convention.
#[derive(Debug, Clone)]
pub struct StringParameter {
    construct_id: String,
    resource_name: String,
    value: Token,
    description: Option<String>,
}

impl StringParameter {
    /// `resource_name` is expanded to `{prefix}-{env}-{resource_name}`.
    pub fn new(
        construct_id: impl Into<String>,
        resource_name: impl Into<String>,
        value: impl Into<Token>,
    ) -> Self {
        Self {
            construct_id: construct_id.into(),
            resource_name: resource_name.into(),
            value: value.into(),
            description: None,
        }
    }

    /// A parameter whose construct id is the resource name.
    pub fn named(resource_name: &str, value: impl Into<Token>) -> Self {
        Self::new(resource_name, resource_name, value)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare and publish the parameter. Returns its full name.
    pub fn publish(self, scope: &mut StackScope<'_>) -> CoreResult<String> {
        scope.publish(
            &self.construct_id,
            &self.resource_name,
            self.value,
            self.description.as_deref(),
        )
    }

    /// Deploy-time value of a parameter published by an earlier stack.
    pub fn value_for(scope: &mut StackScope<'_>, resource_name: &str) -> CoreResult<Token> {
        scope.read_parameter(resource_name)
    }
}
