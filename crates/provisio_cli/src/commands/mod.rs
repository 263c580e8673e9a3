//! CLI command definitions.
//!
//! This module defines the command structure for the provisio CLI.
//! Each subcommand maps to one operation on a deployment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use provisio_config::PropertiesLoader;
use provisio_core::{CoreResult, DeployContext, DeployEnvironment, DEPLOY_ENV_VAR};

pub mod alb_controller_repo;
pub mod params;
pub mod synth;
pub mod trust_policy;
pub mod validate;
pub mod whitelist_ips;

/// provisio - infrastructure templates for the nm platform
#[derive(Parser)]
#[command(name = "provisio")]
#[command(version, about = "provisio - synthesize deployment stacks into a cloud assembly")]
#[command(long_about = r#"
provisio composes the stacks of one deployment environment from its property
files and writes a cloud assembly: one template per stack, a manifest with
the deployment order, and the parameters published by each stack.

COMMANDS:
  synth               → Compose and write the cloud assembly
  validate            → Load and validate property files
  whitelist-ips       → Print the EKS whitelist of an environment
  trust-policy        → Render the ECR read-only role trust policy
  alb-controller-repo → Print the load balancer controller image repository
  params              → List parameters published by an assembly

ENVIRONMENT:
  DEPLOY_ENV          Environment name when --env is not given
  CDK_DEFAULT_ACCOUNT Target account
  CDK_DEFAULT_REGION  Target region

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or missing environment
  3 - Validation failure
  5 - IaC error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compose all stacks and write the cloud assembly
    Synth(synth::SynthArgs),

    /// Validate the property files of one or all environments
    Validate(validate::ValidateArgs),

    /// Print the comma-separated EKS whitelist of an environment
    #[command(name = "whitelist-ips")]
    WhitelistIps(whitelist_ips::WhitelistIpsArgs),

    /// Render the trust policy letting the backend task role assume the ECR read-only role
    #[command(name = "trust-policy")]
    TrustPolicy(trust_policy::TrustPolicyArgs),

    /// Print the AWS load balancer controller image repository for a region
    #[command(name = "alb-controller-repo")]
    AlbControllerRepo(alb_controller_repo::AlbControllerRepoArgs),

    /// List the parameters published by a synthesized assembly
    Params(params::ParamsArgs),
}

/// Resolve the target environment. An explicit name replaces `DEPLOY_ENV`.
pub fn resolve_environment(env: Option<&str>) -> CoreResult<DeployEnvironment> {
    DeployEnvironment::from_lookup(|key| match (key, env) {
        (DEPLOY_ENV_VAR, Some(name)) => Some(name.to_string()),
        _ => std::env::var(key).ok(),
    })
}

/// Resolve the environment and load its properties.
pub fn load_context(env: Option<&str>, loader: &PropertiesLoader) -> Result<DeployContext> {
    let environment = resolve_environment(env)?;
    let props = loader
        .load_pair(&environment.name)
        .with_context(|| format!("Failed to load properties for '{}'", environment.name))?;
    Ok(DeployContext::from_properties(environment, props))
}
