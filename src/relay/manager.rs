//! Owns the masking settings and the live connection, and exposes the
//! controls the tray menu drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::pump::{run_pump, ConnectionLost, Direction, PresenceInterceptor};
use crate::config::RelayConfig;
use crate::masking::{MaskingConfig, MaskingState, Visibility};
use crate::stanza::{rewrite_presence, RewriteOptions};
use crate::status::StatusStore;

pub(super) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established, already-encrypted byte stream to one of the peers
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// State for one client/server stream pair
pub(super) struct Session {
    connected: AtomicBool,
    to_server: tokio::sync::Mutex<BoxedWriter>,
    to_client: tokio::sync::Mutex<BoxedWriter>,
    /// Raw presence as the client sent it; resent when the masking changes
    last_presence: Mutex<Option<String>>,
    version: OnceLock<String>,
}

impl Session {
    fn new(to_server: BoxedWriter, to_client: BoxedWriter) -> Self {
        Self {
            connected: AtomicBool::new(true),
            to_server: tokio::sync::Mutex::new(to_server),
            to_client: tokio::sync::Mutex::new(to_client),
            last_presence: Mutex::new(None),
            version: OnceLock::new(),
        }
    }

    pub(super) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns true only for the caller that actually tore the session down.
    pub(super) fn disconnect(&self) -> bool {
        self.connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) async fn send(&self, direction: Direction, bytes: &[u8]) -> std::io::Result<()> {
        let writer = match direction {
            Direction::ClientToServer => &self.to_server,
            Direction::ServerToClient => &self.to_client,
        };
        let mut writer = writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Close both write halves so each peer sees the relay go away.
    pub(super) async fn shutdown(&self) {
        for writer in [&self.to_server, &self.to_client] {
            if let Err(e) = writer.lock().await.shutdown().await {
                tracing::debug!("Failed to close stream: {}", e);
            }
        }
    }

    /// Cache `raw`, rewrite it and forward the result to the server.
    /// Content that can't be rewritten is dropped; only write failures error.
    pub(super) async fn rewrite_and_send(
        &self,
        raw: String,
        options: RewriteOptions,
    ) -> std::io::Result<()> {
        let rewritten = rewrite_presence(&raw, &options, &self.version);
        *self.last_presence.lock() = Some(raw);

        let output = match rewritten {
            Ok(output) => output,
            Err(e) if e.is_content_fault() => {
                tracing::warn!("Error rewriting presence, dropping it: {}", e);
                return Ok(());
            }
            Err(e) => {
                tracing::error!("Unexpected error rewriting presence, dropping it: {}", e);
                return Ok(());
            }
        };

        if output.is_empty() {
            tracing::debug!("Nothing left to send after rewriting presence");
            return Ok(());
        }

        self.send(Direction::ClientToServer, output.as_bytes()).await?;
        tracing::trace!("<!--RELAY TO SERVER-->{}", output);
        Ok(())
    }

    fn last_presence(&self) -> Option<String> {
        self.last_presence.lock().clone()
    }
}

struct Shared {
    config: RelayConfig,
    masking: MaskingState,
    store: Arc<dyn StatusStore>,
    session: Mutex<Option<Arc<Session>>>,
    events: broadcast::Sender<ConnectionLost>,
}

#[derive(Clone)]
pub struct PresenceRelay {
    shared: Arc<Shared>,
}

impl PresenceRelay {
    pub fn new(config: RelayConfig, store: Arc<dyn StatusStore>) -> Self {
        let visibility = store.load();
        tracing::info!("Loaded status: {}", visibility);

        let masking = MaskingState::new(MaskingConfig {
            enabled: config.start_enabled,
            visibility,
            relay_lobby_chat: config.relay_lobby_chat,
        });
        let (events, _) = broadcast::channel(16);

        Self {
            shared: Arc::new(Shared {
                config,
                masking,
                store,
                session: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    pub fn masking(&self) -> MaskingConfig {
        self.shared.masking.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionLost> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.current_session()
            .is_some_and(|session| session.is_connected())
    }

    /// Version scraped from the client's own VALORANT presence, if seen yet
    pub fn captured_version(&self) -> Option<String> {
        self.current_session()
            .and_then(|session| session.version.get().cloned())
    }

    pub fn last_presence(&self) -> Option<String> {
        self.current_session()
            .and_then(|session| session.last_presence())
    }

    /// Begin relaying between the client-facing `incoming` stream and the
    /// server-facing `outgoing` stream. Must be called inside a tokio runtime.
    pub fn start<I, O>(&self, incoming: I, outgoing: O) -> ConnectionHandle
    where
        I: DuplexStream,
        O: DuplexStream,
    {
        let (from_client, to_client) = tokio::io::split(incoming);
        let (from_server, to_server) = tokio::io::split(outgoing);

        let session = Arc::new(Session::new(Box::new(to_server), Box::new(to_client)));

        let previous = self.shared.session.lock().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            if previous.disconnect() {
                tracing::info!("Replacing a connection that was still open");
            }
        }

        tracing::info!("Relay connected");

        let interceptor = PresenceInterceptor::new(
            self.shared.config.max_pending_bytes,
            self.shared.config.max_pending_reads,
            self.shared.config.fake_contact.clone(),
        );

        let client_to_server = tokio::spawn(run_pump(
            self.clone(),
            Arc::clone(&session),
            Direction::ClientToServer,
            Box::new(from_client),
            Some(interceptor),
        ));
        let server_to_client = tokio::spawn(run_pump(
            self.clone(),
            session,
            Direction::ServerToClient,
            Box::new(from_server),
            None,
        ));

        ConnectionHandle {
            tasks: vec![client_to_server, server_to_client],
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        tracing::debug!("Masking enabled: {}", enabled);
        let config = self.shared.masking.set_enabled(enabled);
        self.persist_status();
        self.resend(&config).await;
    }

    pub async fn set_visibility(&self, visibility: Visibility) {
        tracing::debug!("Visibility set to {}", visibility);
        let config = self.shared.masking.set_visibility(visibility);
        self.persist_status();
        self.resend(&config).await;
    }

    /// Only affects presence sent after this call.
    pub fn set_lobby_relay(&self, relay_lobby_chat: bool) {
        tracing::debug!("Lobby chat relay: {}", relay_lobby_chat);
        self.shared.masking.set_lobby_relay(relay_lobby_chat);
        self.persist_status();
    }

    pub fn persist_status(&self) {
        let visibility = self.masking().visibility;
        if let Err(e) = self.shared.store.save(visibility) {
            tracing::error!("Failed to save status: {}", e);
        }
    }

    pub(super) fn notify(&self, event: ConnectionLost) {
        tracing::warn!("Connection lost ({}): {:?}", event.direction, event.cause);
        let _ = self.shared.events.send(event);
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.shared.session.lock().clone()
    }

    async fn resend(&self, config: &MaskingConfig) {
        let Some(session) = self.current_session() else {
            return;
        };
        if !session.is_connected() {
            return;
        }
        let Some(raw) = session.last_presence() else {
            return;
        };

        if let Err(e) = session
            .rewrite_and_send(raw, RewriteOptions::for_config(config))
            .await
        {
            tracing::warn!("Failed to resend presence: {}", e);
        }
    }
}

/// The two pump tasks of a started connection
pub struct ConnectionHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Wait until both directions have stopped
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Relay task failed: {}", e);
            }
        }
    }
}
