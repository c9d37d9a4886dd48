//! Framed RPC listener.
//!
//! Each TCP connection carries a sequence of length-delimited frames; every
//! inbound frame is one CBOR [`Request`] and is answered by exactly one CBOR
//! [`Response`] frame, in order. A frame that fails to decode gets an error
//! response and the connection stays open.
//!
//! Gateways are recognised by source address: a peer whose IP is in the
//! trusted set may push notification batches, anyone else is a client.

use std::{collections::HashSet, net::IpAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use pushgate_core::{
    directory::Directory,
    env::Environment,
    intake::AuthContext,
    service::NotificationService,
    storage::Storage,
};
use pushgate_proto::{MAX_DOCUMENT_SIZE, Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::error::ServerError;

/// Accepts connections and feeds their requests to a [`NotificationService`].
pub struct Listener<E, S, D> {
    service: Arc<NotificationService<E, S, D>>,
    trusted: Arc<HashSet<IpAddr>>,
}

impl<E, S, D> Listener<E, S, D>
where
    E: Environment,
    S: Storage,
    D: Directory,
{
    /// Serve `service`, treating peers in `trusted` as gateways.
    pub fn new(
        service: Arc<NotificationService<E, S, D>>,
        trusted: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        Self { service, trusted: Arc::new(trusted.into_iter().collect()) }
    }

    /// Authentication context for a peer.
    pub fn auth_for(&self, peer: IpAddr) -> AuthContext {
        if self.trusted.contains(&peer) { AuthContext::gateway() } else { AuthContext::client() }
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Accept errors are logged and skipped; open connections are closed at
    /// their next frame boundary once cancelled.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, trusted = self.trusted.len(), "listening");
        }

        loop {
            let (stream, peer) = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };

            let auth = self.auth_for(peer.ip());
            let service = Arc::clone(&self.service);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                debug!(%peer, gateway = auth.is_gateway, "connection opened");
                match serve_connection(&service, stream, auth, &cancel).await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(err) => debug!(%peer, error = %err, "connection dropped"),
                }
            });
        }

        info!("listener stopped");
    }
}

/// Codec used on every connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_DOCUMENT_SIZE).new_codec()
}

async fn serve_connection<E, S, D>(
    service: &Arc<NotificationService<E, S, D>>,
    stream: TcpStream,
    auth: AuthContext,
    cancel: &CancellationToken,
) -> Result<(), ServerError>
where
    E: Environment,
    S: Storage,
    D: Directory,
{
    let mut framed = Framed::new(stream, frame_codec());

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame?;

        let response = match Request::decode(&frame) {
            Ok(request) => {
                // Registration writes commit to disk
                let service = Arc::clone(service);
                tokio::task::spawn_blocking(move || service.handle(request, &auth))
                    .await
                    .unwrap_or_else(|err| Response::error(format!("request handler failed: {err}")))
            },
            Err(err) => {
                debug!(error = %err, "undecodable request");
                Response::error(err)
            },
        };

        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(err) => Response::error(err).encode()?,
        };
        framed.send(bytes).await?;
    }
}
