//! Synth command - Compose the stacks and write the cloud assembly.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::info;

use provisio_config::{PropertiesLoader, DEFAULT_CONF_DIR};
use provisio_core::{App, SynthState, DEFAULT_ASSEMBLY_DIR};
use provisio_stacks::{compose, ComputeTarget};

use super::load_context;

/// Compute target accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Compute {
    Eks,
    Fargate,
}

impl From<Compute> for ComputeTarget {
    fn from(value: Compute) -> Self {
        match value {
            Compute::Eks => ComputeTarget::Eks,
            Compute::Fargate => ComputeTarget::Fargate,
        }
    }
}

#[derive(Args)]
pub struct SynthArgs {
    /// Environment to synthesize (defaults to DEPLOY_ENV)
    #[arg(short, long)]
    env: Option<String>,

    /// Directory holding the property files
    #[arg(short, long, default_value = DEFAULT_CONF_DIR)]
    conf_dir: PathBuf,

    /// Output directory of the cloud assembly
    #[arg(short, long, default_value = DEFAULT_ASSEMBLY_DIR)]
    out: PathBuf,

    /// Where containers run
    #[arg(long, value_enum, default_value_t = Compute::Eks)]
    compute: Compute,
}

pub async fn execute(args: SynthArgs) -> Result<()> {
    let loader = PropertiesLoader::new(&args.conf_dir);
    let context = load_context(args.env.as_deref(), &loader)?;
    let target = ComputeTarget::from(args.compute);

    info!(
        "Synthesizing {} ({}/{}) into {:?}",
        context.environment.name, context.environment.account, context.environment.region, args.out
    );
    println!(
        "🏗️  Synthesizing {} with {} compute...",
        context.environment.name, target
    );

    let mut app = App::new(context);
    if let Err(e) = compose(&mut app, target) {
        println!();
        for entry in &app.log().stacks {
            let icon = match entry.state {
                SynthState::Completed => "✅",
                SynthState::Failed => "❌",
                _ => "⏳",
            };
            println!("   {} {}", icon, entry.stack_id);
        }
        return Err(e.into());
    }

    let assembly = app.synth(&args.out)?;

    println!();
    println!("Stacks (deployment order):");
    for stack in &assembly.manifest.stacks {
        if stack.dependencies.is_empty() {
            println!("  📦 {}", stack.id);
        } else {
            println!("  📦 {} ← {}", stack.id, stack.dependencies.join(", "));
        }
    }
    println!();
    println!(
        "✅ Wrote {} templates and {} parameters to {}",
        assembly.templates.len(),
        assembly.parameters.parameters.len(),
        args.out.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_core::{AssemblyManifest, ParameterManifest};
    use std::path::Path;
    use tempfile::tempdir;

    fn conf_dir() -> PathBuf {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf")).to_path_buf()
    }

    #[tokio::test]
    async fn test_synth_writes_assembly() {
        std::env::set_var("CDK_DEFAULT_ACCOUNT", "111122223333");
        std::env::set_var("CDK_DEFAULT_REGION", "us-east-1");
        let out = tempdir().unwrap();

        execute(SynthArgs {
            env: Some("dev".to_string()),
            conf_dir: conf_dir(),
            out: out.path().to_path_buf(),
            compute: Compute::Fargate,
        })
        .await
        .unwrap();

        let manifest = AssemblyManifest::load(out.path()).unwrap();
        assert_eq!(manifest.stacks.len(), 5);
        assert_eq!(manifest.environment.name, "dev");
        let params = ParameterManifest::load(out.path()).unwrap();
        assert!(params.find("nm-dev-ssm-fargate-cluster-name").is_some());
    }

    #[tokio::test]
    async fn test_unknown_environment_fails_before_synthesis() {
        std::env::set_var("CDK_DEFAULT_ACCOUNT", "111122223333");
        std::env::set_var("CDK_DEFAULT_REGION", "us-east-1");
        let out = tempdir().unwrap();

        let result = execute(SynthArgs {
            env: Some("qa".to_string()),
            conf_dir: conf_dir(),
            out: out.path().join("cdk.out"),
            compute: Compute::Eks,
        })
        .await;
        assert!(result.is_err());
        assert!(!out.path().join("cdk.out").exists());
    }
}
