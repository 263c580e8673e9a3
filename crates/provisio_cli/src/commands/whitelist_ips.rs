//! Whitelist-ips command - Print the EKS whitelist of an environment.
//!
//! Prints a single comma-separated line so the output can be passed to
//! cluster tooling as is.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use provisio_config::{PropertiesLoader, DEFAULT_CONF_DIR};

#[derive(Args)]
pub struct WhitelistIpsArgs {
    /// Environment name
    env: String,

    /// Directory holding the property files
    #[arg(short, long, default_value = DEFAULT_CONF_DIR)]
    conf_dir: PathBuf,
}

pub async fn execute(args: WhitelistIpsArgs) -> Result<()> {
    let csv = whitelist_csv(&args)?;
    debug!("Whitelist of {}: {}", args.env, csv);
    println!("{}", csv);
    Ok(())
}

fn whitelist_csv(args: &WhitelistIpsArgs) -> Result<String> {
    let props = PropertiesLoader::new(&args.conf_dir)
        .load_env(&args.env)
        .with_context(|| format!("Failed to load properties for '{}'", args.env))?;
    Ok(props.eks_whitelist_csv())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_whitelist_of_dev() {
        let args = WhitelistIpsArgs {
            env: "dev".to_string(),
            conf_dir: Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf")).to_path_buf(),
        };
        assert_eq!(
            whitelist_csv(&args).unwrap(),
            "203.0.113.10/32,198.51.100.0/24"
        );
    }

    #[test]
    fn test_unknown_environment() {
        let args = WhitelistIpsArgs {
            env: "prod".to_string(),
            conf_dir: Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf")).to_path_buf(),
        };
        assert!(whitelist_csv(&args).is_err());
    }
}
