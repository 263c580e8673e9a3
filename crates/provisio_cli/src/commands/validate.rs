//! Validate command - Load and validate property files.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use provisio_config::{ConfigError, PropertiesLoader, DEFAULT_CONF_DIR};
use provisio_core::DEPLOY_ENV_VAR;

#[derive(Args)]
pub struct ValidateArgs {
    /// Environment to validate (defaults to DEPLOY_ENV, then every environment)
    #[arg(short, long)]
    env: Option<String>,

    /// Directory holding the property files
    #[arg(short, long, default_value = DEFAULT_CONF_DIR)]
    conf_dir: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> Result<()> {
    let loader = PropertiesLoader::new(&args.conf_dir);
    let environments = selected_environments(
        args.env.as_deref(),
        std::env::var(DEPLOY_ENV_VAR).ok(),
        &loader,
    );
    info!("Validating {} environment(s) in {:?}", environments.len(), args.conf_dir);

    if environments.is_empty() {
        anyhow::bail!("No environment property files found in {}", args.conf_dir.display());
    }

    let mut failures: Vec<ConfigError> = Vec::new();

    println!("📋 Validating shared properties...");
    match loader.load_common() {
        Ok(common) => println!("   ✅ {} (prefix '{}')", loader.common_path().display(), common.product_prefix),
        Err(e) => {
            println!("   ❌ {}", e);
            failures.push(e);
        }
    }

    println!("📋 Validating environment properties...");
    for env in &environments {
        match loader.load_env(env) {
            Ok(props) => println!(
                "   ✅ {} ({} node groups, {} whitelisted ips)",
                env,
                props.eks_cluster_cfg.node_group.len(),
                props.whitelist_ips.len()
            ),
            Err(e) => {
                println!("   ❌ {}: {}", env, e);
                failures.push(e);
            }
        }
    }

    println!();
    match failures.into_iter().next() {
        None => {
            println!("✅ All validations passed!");
            Ok(())
        }
        Some(first) => {
            println!("❌ Some validations failed. Please fix the issues above.");
            Err(first.into())
        }
    }
}

/// The explicit environment, else a non-blank `DEPLOY_ENV`, else every
/// environment with a property file.
fn selected_environments(
    explicit: Option<&str>,
    deploy_env: Option<String>,
    loader: &PropertiesLoader,
) -> Vec<String> {
    let non_blank = |v: String| Some(v.trim().to_string()).filter(|v| !v.is_empty());
    explicit
        .map(str::to_string)
        .and_then(non_blank)
        .or_else(|| deploy_env.and_then(non_blank))
        .map(|env| vec![env])
        .unwrap_or_else(|| loader.environments())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn conf_dir() -> PathBuf {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf")).to_path_buf()
    }

    #[tokio::test]
    async fn test_shipped_properties_are_valid() {
        let result = execute(ValidateArgs {
            env: Some("dev".to_string()),
            conf_dir: conf_dir(),
        })
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_blank_deploy_env_selects_every_environment() {
        let loader = PropertiesLoader::new(conf_dir());
        assert_eq!(
            selected_environments(None, Some("  ".to_string()), &loader),
            loader.environments()
        );
        assert_eq!(
            selected_environments(None, Some("staging".to_string()), &loader),
            vec!["staging"]
        );
        assert_eq!(
            selected_environments(Some("dev"), Some("staging".to_string()), &loader),
            vec!["dev"]
        );
    }

    #[tokio::test]
    async fn test_invalid_document_fails() {
        let dir = tempdir().unwrap();
        fs::copy(conf_dir().join("comm_props.yaml"), dir.path().join("comm_props.yaml")).unwrap();
        fs::write(dir.path().join("env_props.broken.yaml"), "whitelist_ips: 3\n").unwrap();

        let err = execute(ValidateArgs {
            env: Some("broken".to_string()),
            conf_dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
