use tokio::signal::unix::{signal, SignalKind};

use xdp_document_portal::dispatch::Builder;

// Run with
// RUST_LOG=xdp_document_portal=debug cargo run

#[tokio::main]
async fn main() -> xdp_document_portal::Result<()> {
    tracing_subscriber::fmt::init();

    // The original service forces GIO's local-only VFS backend before
    // touching the bus, so a document's host path is never routed through a
    // network-transparent filesystem layer. We open files with direct
    // syscalls (`std::fs`/`nix`) throughout, so there is no GVfs-equivalent
    // setting to carry over here.
    let state = Builder::new().build().await?;

    wait_for_shutdown(&state).await;

    // Matches the service's "Save on bus-connection close" guarantee: a
    // termination signal or the bus connection dropping both run a final
    // flush before the process exits.
    state.flush_now().await;
    Ok(())
}

/// Waits for whichever comes first: SIGINT, SIGTERM, or the bus connection
/// itself going away (`ServiceState::connection_closed`).
async fn wait_for_shutdown(state: &xdp_document_portal::dispatch::ServiceState) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = state.connection_closed() => {
            tracing::info!("bus connection closed, shutting down");
        }
    }
}
