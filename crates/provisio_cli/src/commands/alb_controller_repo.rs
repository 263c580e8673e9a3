//! Alb-controller-repo command - Print the controller image repository.

use anyhow::Result;
use clap::Args;

use provisio_constructs::alb_controller_repo;

#[derive(Args)]
pub struct AlbControllerRepoArgs {
    /// Region of the cluster
    #[arg(short, long, env = "CDK_DEFAULT_REGION")]
    region: String,
}

pub async fn execute(args: AlbControllerRepoArgs) -> Result<()> {
    println!("{}", alb_controller_repo(&args.region)?);
    Ok(())
}
