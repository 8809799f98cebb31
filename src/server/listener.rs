//! TCP listener and graceful serving of the relay router.

use axum::Router;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::shutdown::ShutdownCoordinator;

/// Bind the relay's TCP listener.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|source| RelayError::Bind {
        addr: config.listen_addr.clone(),
        source,
    })?;

    tracing::info!(addr = %listener.local_addr()?, "Relay listener bound");
    Ok(listener)
}

/// Serve `app` until shutdown is signaled and open connections have closed.
///
/// Stream sessions watch the same coordinator, so their responses end as
/// soon as shutdown starts and the connections can drain.
pub async fn serve(listener: TcpListener, app: Router, shutdown: ShutdownCoordinator) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.signalled().await })
        .await?;

    tracing::info!("Relay server stopped");
    Ok(())
}
