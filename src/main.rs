//! Sortie CLI binary entry point.

use sortie::cli::{handlers, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Logs go to stderr so chat output on stdout stays clean.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sortie=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse_args();
    if let Err(e) = handlers::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
