//! Demo client - connects, sends one request/response and closes.
//!
//! The server only accepts the setup data "setup"; pass `--setup-data` with
//! anything else to watch the rejection.
//!
//! ```text
//! RUST_LOG=debug cargo run --example client -- --url ws://127.0.0.1:7878/events
//! ```

use std::time::Duration;

use clap::Parser;
use rsocket_wire::transport::{TcpClientTransport, WebSocketClientTransport};
use rsocket_wire::{Client, ClientBuilder, Payload, RSocketError, SetupPayload};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rsocket-client", about = "Demo request/response client")]
struct Cli {
    /// `ws://host:port/path` or `tcp://host:port`.
    #[arg(long, env = "RSOCKET_URL", default_value = "ws://127.0.0.1:7878/events")]
    url: String,

    /// Connect timeout in milliseconds.
    #[arg(long, env = "RSOCKET_CONNECT_TIMEOUT_MS", default_value_t = 1000)]
    connect_timeout_ms: u64,

    /// Request timeout in milliseconds.
    #[arg(long, env = "RSOCKET_REQUEST_TIMEOUT_MS", default_value_t = 1000)]
    request_timeout_ms: u64,

    #[arg(long, env = "RSOCKET_SETUP_DATA", default_value = "setup")]
    setup_data: String,

    #[arg(long, env = "RSOCKET_SETUP_METADATA", default_value = "metadata")]
    setup_metadata: String,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let cli = Cli::parse();
    let builder = Client::builder()
        .setup(SetupPayload::from_str(&cli.setup_data, &cli.setup_metadata))
        .connect_timeout(Duration::from_millis(cli.connect_timeout_ms))
        .request_timeout(Duration::from_millis(cli.request_timeout_ms))
        .on_close(|cause| tracing::error!(error = %cause, "callback"));

    let client = match connect(builder, &cli.url).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "connect to server");
            return Ok(());
        }
    };

    match client
        .request_response(Payload::from_str("data", "metadata"))
        .await
    {
        Ok(response) => tracing::debug!(
            data = response.data_utf8().unwrap_or_default(),
            metadata = response.metadata_utf8().unwrap_or_default(),
            "response"
        ),
        Err(RSocketError::EmptyResponse) => tracing::debug!("empty response"),
        Err(e) => tracing::error!(error = %e, "do request"),
    }

    client.close().await;
    tracing::debug!("close ok");
    Ok(())
}

async fn connect(builder: ClientBuilder, url: &str) -> rsocket_wire::Result<Client> {
    match url.strip_prefix("tcp://") {
        Some(addr) => builder.connect(TcpClientTransport::new(addr)).await,
        None => builder.connect(WebSocketClientTransport::new(url)).await,
    }
}
