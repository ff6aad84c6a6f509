use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use super::manager::{BoxedReader, PresenceRelay, Session};
use crate::error::RelayError;
use crate::stanza::{opens_stanza, Assembly, RewriteOptions, StanzaAssembler, PRESENCE_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Game client to chat server; the side that gets masked
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client -> server"),
            Direction::ServerToClient => f.write_str("server -> client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossCause {
    PeerClosed,
    Fault(String),
}

/// Raised once per connection, by whichever pump stops first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLost {
    pub direction: Direction,
    pub cause: LossCause,
}

/// Diverts client presence into the rewriter and filters fake contact traffic
pub(super) struct PresenceInterceptor {
    assembler: StanzaAssembler,
    fake_contact: String,
}

impl PresenceInterceptor {
    pub(super) fn new(
        max_pending_bytes: usize,
        max_pending_reads: usize,
        fake_contact: String,
    ) -> Self {
        Self {
            assembler: StanzaAssembler::new(max_pending_bytes, max_pending_reads),
            fake_contact,
        }
    }

    async fn handle(
        &mut self,
        relay: &PresenceRelay,
        session: &Session,
        chunk: &[u8],
    ) -> Result<(), RelayError> {
        let masking = relay.masking();
        let content = String::from_utf8_lossy(chunk);

        if self.assembler.is_assembling() {
            if content.contains(self.fake_contact.as_str()) {
                let held = self.assembler.abandon();
                tracing::warn!(
                    "Dropping partial presence ({} bytes) joined to fake contact traffic",
                    held
                );
                tracing::trace!("<!--CLIENT TO SERVER REMOVED-->{}", content);
                return Ok(());
            }
            if opens_stanza(chunk) {
                let held = self.assembler.abandon();
                tracing::warn!("Dropping truncated presence ({} bytes)", held);
            }
        }

        if self.assembler.is_assembling() || (masking.enabled && content.contains(PRESENCE_MARKER))
        {
            tracing::trace!("<!--CLIENT TO SERVER ORIGINAL-->{}", content);

            match self.assembler.push(chunk) {
                Assembly::Pending => {
                    tracing::debug!("Waiting for the rest of a partial presence stanza");
                }
                Assembly::Complete(bytes) => match String::from_utf8(bytes) {
                    Ok(raw) => {
                        session
                            .rewrite_and_send(raw, RewriteOptions::for_config(&masking))
                            .await?;
                    }
                    Err(e) => tracing::warn!("Dropping presence that is not UTF-8: {}", e),
                },
                Assembly::Discarded(reason) => {
                    tracing::warn!("Dropping presence fragment: {}", reason);
                }
            }
            return Ok(());
        }

        if content.contains(self.fake_contact.as_str()) {
            tracing::trace!("<!--CLIENT TO SERVER REMOVED-->{}", content);
            return Ok(());
        }

        session.send(Direction::ClientToServer, chunk).await?;
        tracing::trace!("<!--CLIENT TO SERVER-->{}", content);
        Ok(())
    }
}

pub(super) async fn run_pump(
    relay: PresenceRelay,
    session: Arc<Session>,
    direction: Direction,
    source: BoxedReader,
    interceptor: Option<PresenceInterceptor>,
) {
    let cause = match pump(&relay, &session, direction, source, interceptor).await {
        Ok(()) => {
            tracing::info!("{} closed", direction);
            LossCause::PeerClosed
        }
        Err(e) => {
            tracing::error!("{} errored: {}", direction, e);
            LossCause::Fault(e.to_string())
        }
    };

    relay.persist_status();

    if session.disconnect() {
        relay.notify(ConnectionLost { direction, cause });
        session.shutdown().await;
    }
}

async fn pump(
    relay: &PresenceRelay,
    session: &Session,
    direction: Direction,
    mut source: BoxedReader,
    mut interceptor: Option<PresenceInterceptor>,
) -> Result<(), RelayError> {
    let mut buf = vec![0u8; relay.config().chunk_size.max(1)];

    loop {
        let byte_count = source.read(&mut buf).await?;
        if byte_count == 0 {
            return Ok(());
        }
        let chunk = buf.get(..byte_count).unwrap_or_default();

        match interceptor.as_mut() {
            Some(interceptor) => interceptor.handle(relay, session, chunk).await?,
            None => {
                session.send(direction, chunk).await?;
                tracing::trace!("<!--SERVER TO CLIENT-->{}", String::from_utf8_lossy(chunk));
            }
        }

        if !session.is_connected() {
            return Ok(());
        }
    }
}
