//! Listening side of an offer: bind, then accept exactly one peer.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ChannelError;

/// Listener for the single receiver of one offered file.
pub struct OfferListener {
    listener: TcpListener,
    cancel: CancellationToken,
}

impl OfferListener {
    /// Binds `addr` (port 0 picks an ephemeral port).
    pub async fn bind(addr: &str, cancel: CancellationToken) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        info!(port, "offer listener bound");
        Ok(Self { listener, cancel })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map_or(0, |a| a.port())
    }

    /// Waits for one connection, then stops listening.
    pub async fn accept(self, timeout: Duration) -> Result<(TcpStream, SocketAddr), ChannelError> {
        let accepted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ChannelError::Cancelled);
            }
            result = tokio::time::timeout(timeout, self.listener.accept()) => {
                match result {
                    Ok(Ok((stream, addr))) => {
                        info!(%addr, "peer connected");
                        (stream, addr)
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ChannelError::Timeout),
                }
            }
        };

        // Only one connection per offer.
        drop(self.listener);
        Ok(accepted)
    }
}
