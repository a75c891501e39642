//! Demo server - accepts connections whose setup data is "setup".
//!
//! Every request/response is answered with `Payload { data: "data", metadata: "meta" }`.
//! Other interactions are logged and completed empty.
//!
//! ```text
//! RUST_LOG=debug cargo run --example server -- --addr 127.0.0.1:7878 --path /events
//! ```

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use rsocket_wire::handler::{setup_data_equals, AcceptResult, BoxFuture, BoxStream};
use rsocket_wire::transport::{TcpServerTransport, WebSocketServerTransport};
use rsocket_wire::{Payload, RSocket, Requester, Result, Server, SetupPayload};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Ws,
    Tcp,
}

#[derive(Parser, Debug)]
#[command(name = "rsocket-server", about = "Demo request/response server")]
struct Cli {
    #[arg(long, env = "RSOCKET_ADDR", default_value = "127.0.0.1:7878")]
    addr: String,

    /// WebSocket upgrade path.
    #[arg(long, env = "RSOCKET_PATH", default_value = "/events")]
    path: String,

    #[arg(long, value_enum, env = "RSOCKET_TRANSPORT", default_value = "ws")]
    transport: TransportKind,

    /// Setup data a client must send, compared ignoring case.
    #[arg(long, env = "RSOCKET_EXPECTED_SETUP", default_value = "setup")]
    expected_setup: String,
}

struct DemoServer;

impl RSocket for DemoServer {
    fn fire_and_forget(&self, payload: Payload) {
        tracing::debug!(method = "FireAndForget", data = ?payload.data_utf8());
    }

    fn metadata_push(&self, payload: Payload) {
        tracing::debug!(method = "MetadataPush", metadata = ?payload.metadata_utf8());
    }

    fn request_response(&self, payload: Payload) -> BoxFuture<'static, Result<Payload>> {
        tracing::debug!(
            method = "RequestResponse",
            data = payload.data_utf8().unwrap_or_default(),
            meta = payload.metadata_utf8().unwrap_or_default(),
        );
        Box::pin(async { Ok(Payload::from_str("data", "meta")) })
    }

    fn request_stream(&self, _payload: Payload) -> BoxStream<'static, Result<Payload>> {
        tracing::debug!(method = "RequestStream");
        Box::pin(futures_util::stream::empty())
    }

    fn request_channel(
        &self,
        _inputs: BoxStream<'static, Payload>,
    ) -> BoxStream<'static, Result<Payload>> {
        tracing::debug!(method = "RequestChannel");
        Box::pin(futures_util::stream::empty())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let cli = Cli::parse();
    let responder: Arc<dyn RSocket> = Arc::new(DemoServer);
    let expected = cli.expected_setup.clone();

    let server = Server::builder()
        .acceptor_fn(move |setup: &SetupPayload, _requester: Requester| -> AcceptResult {
            tracing::debug!(
                version = %setup.version(),
                data = setup.data_utf8().unwrap_or_default(),
                metadata_mime_type = %setup.metadata_mime_type,
                "setup"
            );
            if !setup_data_equals(setup, &expected) {
                tracing::debug!("reject");
                return Err("unknown message".to_string());
            }
            Ok(responder.clone())
        })
        .on_connection_close(|peer, cause| {
            tracing::error!(%peer, error = %cause, "close");
        })
        .build();

    tracing::debug!("start");
    match cli.transport {
        TransportKind::Ws => {
            let transport = WebSocketServerTransport::bind(&cli.addr, cli.path).await?;
            server
                .serve_with_shutdown(transport, shutdown_signal())
                .await?;
        }
        TransportKind::Tcp => {
            let transport = TcpServerTransport::bind(&cli.addr).await?;
            server
                .serve_with_shutdown(transport, shutdown_signal())
                .await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
