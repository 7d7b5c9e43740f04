use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kratt::cli::{self, Cli};
use kratt::shutdown::cancel_on_shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose only changes the fallback.
    let fallback = if cli.verbose { "info,kratt=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = CancellationToken::new();
    let listener = cancel_on_shutdown(cancel.clone());

    let result = cli::execute(cli, cancel.clone()).await;

    // Stop the signal listener once the run is over.
    cancel.cancel();
    let _ = listener.await;
    result
}
