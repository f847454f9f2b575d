//! kubegames operator binary

use clap::Parser;

use kubegames_common::telemetry::init_logging;
use kubegames_operator::{crd_manifest, run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install TLS crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifest()?);
        return Ok(());
    }

    init_logging(cli.log_format)?;
    run(cli).await
}
