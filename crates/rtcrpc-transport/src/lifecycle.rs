use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{DataChannel, IceConnectionState, PeerConnection};

/// Whether the data channel has opened yet.
///
/// Leaves `Pending` exactly once; a channel that opened stays `Open` even
/// after it later closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Open,
    Failed(TransportError),
}

#[derive(Debug, Default)]
struct CloseState {
    closed: bool,
    reason: Option<TransportError>,
}

/// Owns one peer connection and its data channel.
///
/// Exposes a single readiness future, explicit close semantics and the one
/// outbound write primitive everything else funnels through. Events from
/// the underlying connection are fed in through the `on_*` methods.
pub struct ChannelLifecycle {
    connection: Arc<dyn PeerConnection>,
    channel: Arc<dyn DataChannel>,
    close_state: Mutex<CloseState>,
    readiness: watch::Sender<Readiness>,
}

impl ChannelLifecycle {
    /// Wrap a peer connection and data channel. Starts out pending.
    pub fn new(connection: Arc<dyn PeerConnection>, channel: Arc<dyn DataChannel>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            connection,
            channel,
            close_state: Mutex::new(CloseState::default()),
            readiness,
        }
    }

    /// Wait until the data channel opens.
    ///
    /// Fails if ICE reaches a terminal state, or the channel closes, before
    /// the open event arrives.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.readiness.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                Readiness::Open => return Ok(()),
                Readiness::Failed(err) => return Err(err),
                Readiness::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(TransportError::Shutdown);
            }
        }
    }

    /// Current readiness without waiting.
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// The data channel reported "open".
    pub fn on_channel_open(&self) {
        if self.is_closed() {
            debug!("ignoring open event on closed channel");
            return;
        }
        if self.settle(Readiness::Open) {
            info!(label = self.channel.label(), "data channel open");
        }
    }

    /// The data channel reported "close".
    pub fn on_channel_close(&self) {
        self.close_with_reason(Some(TransportError::ConnectionClosed(
            "data channel closed".to_string(),
        )));
    }

    /// The data channel reported an error.
    pub fn on_channel_error(&self, message: &str) {
        error!(error = message, "data channel error");
        self.close_with_reason(Some(TransportError::Channel(message.to_string())));
    }

    /// The peer connection's ICE state changed.
    ///
    /// Returns true if the new state is terminal. A terminal state before
    /// the channel opened rejects [`ready`](Self::ready).
    pub fn on_ice_connection_state_change(&self, state: IceConnectionState) -> bool {
        debug!(%state, "ICE connection state changed");
        if !state.is_terminal() {
            return false;
        }
        self.settle(Readiness::Failed(TransportError::IceFailed(state)));
        true
    }

    /// Close without a reason. Idempotent.
    pub fn close(&self) {
        self.close_with_reason(None);
    }

    /// Close and record `reason`. The first call wins; later calls are
    /// no-ops. Returns true if this call performed the close.
    pub fn close_with_reason(&self, reason: Option<TransportError>) -> bool {
        {
            let mut state = self.lock_state();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.reason = reason.clone();
        }

        let failure = reason
            .clone()
            .unwrap_or_else(|| TransportError::ConnectionClosed("channel closed".to_string()));
        self.settle(Readiness::Failed(failure));

        match &reason {
            Some(err) => debug!(error = %err, "closing channel"),
            None => debug!("closing channel"),
        }
        self.connection.close();
        true
    }

    /// Returns true once the channel has been closed by any path.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// The reason recorded by the first close, if any.
    pub fn closed_reason(&self) -> Option<TransportError> {
        self.lock_state().reason.clone()
    }

    /// Serialize `message` and send it on the data channel.
    ///
    /// Writes after close are rejected rather than handed to the channel.
    pub fn write<M: prost::Message>(&self, message: &M) -> Result<()> {
        {
            let state = self.lock_state();
            if state.closed {
                return Err(state.reason.clone().unwrap_or_else(|| {
                    TransportError::ConnectionClosed("channel closed".to_string())
                }));
            }
        }

        let payload = message.encode_to_vec();
        debug!(
            len = payload.len(),
            label = self.channel.label(),
            "writing message to channel"
        );
        self.channel.send(Bytes::from(payload))
    }

    /// The underlying peer connection.
    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    fn settle(&self, outcome: Readiness) -> bool {
        self.readiness.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CloseState> {
        self.close_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ChannelLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ChannelLifecycle")
            .field("label", &self.channel.label())
            .field("readiness", &*self.readiness.borrow())
            .field("closed", &state.closed)
            .field("reason", &state.reason)
            .finish()
    }
}
