//! camlink terminal console

use anyhow::Context;
use camlink::{console, AppConfig, CaptureApp, Services};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the QR code on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting camlink v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        "Signaling relay {}, analysis endpoint {}",
        config.signaling_url,
        config.analyze_url
    );
    let services = Services::from_config(&config).context("setting up capture and upload")?;
    let app = CaptureApp::new(config, services);

    console::run(app, BufReader::new(tokio::io::stdin())).await
}
