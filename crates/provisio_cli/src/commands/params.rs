//! Params command - List parameters published by an assembly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use provisio_core::{ParameterManifest, DEFAULT_ASSEMBLY_DIR};

#[derive(Args)]
pub struct ParamsArgs {
    /// Cloud assembly directory
    #[arg(short, long, default_value = DEFAULT_ASSEMBLY_DIR)]
    assembly: PathBuf,

    /// Only list parameters published by this stack id
    #[arg(short, long)]
    stack: Option<String>,

    /// Print the manifest as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: ParamsArgs) -> Result<()> {
    let manifest = ParameterManifest::load(&args.assembly)
        .with_context(|| format!("Failed to read parameters from {}", args.assembly.display()))?;
    print!("{}", render(manifest, &args)?);
    Ok(())
}

fn render(mut manifest: ParameterManifest, args: &ParamsArgs) -> Result<String> {
    if let Some(stack) = &args.stack {
        manifest.parameters.retain(|p| &p.stack == stack);
    }

    if args.json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&manifest)?));
    }

    let mut out = format!(
        "📋 Parameters of {} ({}):\n",
        manifest.environment,
        manifest.parameters.len()
    );
    for parameter in &manifest.parameters {
        out.push_str(&format!("  {} = {}\n", parameter.name, parameter.value));
        out.push_str(&format!("      from {}\n", parameter.stack));
    }
    Ok(out)
}
