use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::ListenerConfig;
use crate::http::connection::Connection;
use crate::routing::Scheme;
use crate::server::Gateway;

/// Binds the configured address and serves connections until an error.
pub async fn run(
    listener_cfg: &ListenerConfig,
    scheme: Scheme,
    gateway: Arc<Gateway>,
    tls: Option<TlsAcceptor>,
) -> anyhow::Result<()> {
    let addr = listener_cfg.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {scheme} listener on {addr}"))?;

    serve(listener, scheme, gateway, tls).await
}

/// Accepts connections on an already bound listener, one task each.
///
/// With `tls` set the handshake happens inside the connection task, so a
/// slow or broken client never holds up the accept loop.
pub async fn serve(
    listener: TcpListener,
    scheme: Scheme,
    gateway: Arc<Gateway>,
    tls: Option<TlsAcceptor>,
) -> anyhow::Result<()> {
    info!("Listening for {} on {}", scheme, listener.local_addr()?);

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);
        socket.set_nodelay(true).ok();

        let gateway = Arc::clone(&gateway);
        let tls = tls.clone();
        tokio::spawn(async move {
            let result = match tls {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(stream) => Connection::new(stream, scheme, gateway).run().await,
                    Err(e) => Err(anyhow::Error::new(e).context("TLS handshake failed")),
                },
                None => Connection::new(socket, scheme, gateway).run().await,
            };

            if let Err(e) = result {
                tracing::error!("Connection error from {}: {:#}", peer, e);
            }
        });
    }
}
