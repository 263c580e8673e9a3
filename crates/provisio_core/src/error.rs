//! Error types for the core module.

use thiserror::Error;

use provisio_config::ConfigError;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while composing and synthesizing stacks.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Environment selector {0} is not set. Give an environment name, for example DEPLOY_ENV=dev")]
    MissingEnvironmentSelector(String),

    #[error("Required environment variable {0} is not set")]
    MissingEnvironmentVariable(String),

    #[error("Invalid environment name '{0}': use lowercase alphanumerics and dashes")]
    InvalidEnvironment(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stack already defined: {0}")]
    DuplicateStack(String),

    #[error("Construct '{id}' already defined in stack {stack}")]
    DuplicateConstruct { stack: String, id: String },

    #[error("Physical name collision: {kind} '{name}' is already claimed")]
    DuplicatePhysicalName { kind: String, name: String },

    #[error("Parameter already published: {0}")]
    ParameterAlreadyPublished(String),

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("No room for {count} subnets of /{mask} in {cidr}")]
    SubnetExhausted { cidr: String, mask: u8, count: usize },

    #[error("Unsupported region: {0}")]
    UnsupportedRegion(String),

    #[error("Stack {stack} failed: {source}")]
    StackFailed {
        stack: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Composition aborted after stack {0} failed")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether this error was raised while declaring resources, as opposed
    /// to resolving the environment or loading configuration.
    pub fn is_provisioning_error(&self) -> bool {
        match self {
            CoreError::MissingEnvironmentSelector(_)
            | CoreError::MissingEnvironmentVariable(_)
            | CoreError::InvalidEnvironment(_)
            | CoreError::Config(_)
            | CoreError::Io(_)
            | CoreError::Serialization(_) => false,
            CoreError::StackFailed { source, .. } => source.is_provisioning_error(),
            _ => true,
        }
    }

    /// The innermost error, unwrapping stack failures.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::StackFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
