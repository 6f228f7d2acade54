use clap::{Parser, Subcommand};
use snafu::ResultExt;
use timber_observability::{MetricsExporter, init_observability};
use tokio_util::sync::CancellationToken;

use crate::{
    dev::DevArgs,
    error::{ObservabilitySnafu, Result},
};

mod dev;
mod error;

#[derive(Parser)]
#[command(name = "timber")]
#[command(about = "Timber log aggregation service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Timber ingester in development mode
    Dev {
        #[clap(flatten)]
        inner: DevArgs,
    },
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<()> {
    init_observability(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        MetricsExporter::default(),
    )
    .context(ObservabilitySnafu {})?;

    let cli = Cli::parse();

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Dev { inner } => inner.run(ct).await,
    }
}
