//! Trust-policy command - Render the ECR read-only role trust policy.
//!
//! The backend tasks pull local images by assuming the ECR read-only role.
//! This renders the trust document for that role from a synthesized
//! assembly, ready to be applied with the cloud provider's tooling.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use provisio_constructs::assume_role_trust_policy;
use provisio_core::{ParameterManifest, DEFAULT_ASSEMBLY_DIR};

/// Parameter holding the backend task role ARN.
const BACKEND_TASK_ROLE_PARAM: &str = "ssm-backend-task-role";

/// Parameter holding the ECR read-only role ARN.
const ECR_READONLY_ROLE_PARAM: &str = "ssm-ecr-readonly-role";

#[derive(Args)]
pub struct TrustPolicyArgs {
    /// Cloud assembly directory
    #[arg(short, long, default_value = DEFAULT_ASSEMBLY_DIR)]
    assembly: PathBuf,

    /// Principal to trust instead of the published backend task role
    #[arg(long)]
    principal_arn: Option<String>,
}

pub async fn execute(args: TrustPolicyArgs) -> Result<()> {
    let manifest = ParameterManifest::load(&args.assembly)
        .with_context(|| format!("Failed to read parameters from {}", args.assembly.display()))?;
    let principal = match args.principal_arn {
        Some(arn) => arn,
        None => published_literal(&manifest, BACKEND_TASK_ROLE_PARAM)?,
    };
    info!("Trusting {} in environment {}", principal, manifest.environment);

    if let Ok(role) = published_literal(&manifest, ECR_READONLY_ROLE_PARAM) {
        eprintln!("🔐 Trust policy for {}", role);
    }
    let policy = assume_role_trust_policy(&[principal]);
    println!("{}", serde_json::to_string_pretty(&policy)?);
    Ok(())
}

/// Literal value of a published parameter, looked up by its resource name.
fn published_literal(manifest: &ParameterManifest, resource_name: &str) -> Result<String> {
    let parameter = manifest.lookup(resource_name).with_context(|| {
        format!(
            "Parameter {} was not published",
            manifest.namer().name(resource_name)
        )
    })?;
    parameter
        .value
        .as_literal()
        .map(str::to_string)
        .with_context(|| {
            format!(
                "Parameter {} is only known at deploy time ({}); pass --principal-arn",
                parameter.name, parameter.value
            )
        })
}
