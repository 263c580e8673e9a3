//! Deployment environment resolution from process variables.

use serde::{Deserialize, Serialize};
use tracing::debug;

use provisio_config::is_valid_name_segment;

use crate::error::{CoreError, CoreResult};

/// Variable selecting the deployment environment (e.g. `dev`, `prod`).
pub const DEPLOY_ENV_VAR: &str = "DEPLOY_ENV";
/// Variable holding the target account id.
pub const ACCOUNT_VAR: &str = "CDK_DEFAULT_ACCOUNT";
/// Variable holding the target region.
pub const REGION_VAR: &str = "CDK_DEFAULT_REGION";

/// Where and as what a deployment runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEnvironment {
    pub name: String,
    pub account: String,
    pub region: String,
}

impl DeployEnvironment {
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> CoreResult<Self> {
        let name = name.into();
        if !is_valid_name_segment(&name) {
            return Err(CoreError::InvalidEnvironment(name));
        }
        Ok(Self {
            name,
            account: account.into(),
            region: region.into(),
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve through an arbitrary variable lookup.
    ///
    /// An explicit environment name (e.g. from a command-line flag) can be
    /// injected by the lookup; the selector is checked before the account
    /// and region so that a missing selector is always reported first.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let name = get(DEPLOY_ENV_VAR)
            .ok_or_else(|| CoreError::MissingEnvironmentSelector(DEPLOY_ENV_VAR.to_string()))?;
        let account = get(ACCOUNT_VAR)
            .ok_or_else(|| CoreError::MissingEnvironmentVariable(ACCOUNT_VAR.to_string()))?;
        let region = get(REGION_VAR)
            .ok_or_else(|| CoreError::MissingEnvironmentVariable(REGION_VAR.to_string()))?;

        debug!("Resolved deployment environment {} ({}/{})", name, account, region);
        Self::new(name, account, region)
    }
}
