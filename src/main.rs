// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use simplestream::config::{CliArgs, ConnConfig, ServerConfig};
use simplestream::core::{Gate, PassThroughGate, PrivateAddressGate, Server};
use simplestream::logger::{self, log};
use simplestream::server_runner;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = CliArgs::parse_args();
    cli.validate()?;

    // Initialize logger
    logger::init_logger(&cli.log_mode);

    let server_config = ServerConfig::from_cli(&cli)?;
    let conn_config = ConnConfig::from_cli(&cli);
    log::info!(config = ?server_config, "Starting simple stream server");

    let gate: Arc<dyn Gate> = if server_config.block_private_ip {
        Arc::new(PrivateAddressGate)
    } else {
        Arc::new(PassThroughGate)
    };

    let server = Arc::new(
        Server::builder()
            .secret(server_config.secret)
            .gate(gate)
            .conn_config(conn_config)
            .build(),
    );

    let listener = server_runner::bind_listener(server_config.listen, conn_config.tcp_backlog)?;

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let cancel_token_clone = cancel_token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                    _ => {
                        log::warn!("Failed to install signal handlers, falling back to ctrl-c");
                        tokio::signal::ctrl_c().await.ok();
                        cancel_token_clone.cancel();
                        return;
                    }
                };

            tokio::select! {
                _ = sigint.recv() => {
                    log::info!("SIGINT received, shutting down...");
                }
                _ = sigterm.recv() => {
                    log::info!("SIGTERM received, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown signal received...");
        }

        cancel_token_clone.cancel();
    });

    let result = server_runner::run_server(Arc::clone(&server), listener, cancel_token).await;
    log::info!(
        active_connections = server.active_connections(),
        "Shutdown complete"
    );
    result
}
