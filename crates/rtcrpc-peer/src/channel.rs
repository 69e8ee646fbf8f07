use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rtcrpc_frame::wire::{Request, RequestHeaders, RequestMessage};
use rtcrpc_frame::{decode_response, MetadataMap};
use rtcrpc_transport::{
    ChannelEvent, ChannelLifecycle, DataChannel, EventReceiver, PeerConnection, TransportError,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::call::Call;
use crate::config::ChannelConfig;
use crate::error::{PeerError, Result};
use crate::stream::{ClientStream, StreamSink};
use crate::transport::{
    check_kind, complete_unary, MethodDescriptor, MethodKind, RpcTransport, ServerStreamResponse,
    UnaryResponse,
};

/// Client end of one data channel, multiplexing many RPC streams.
///
/// Stream ids start at 0 and are never reused. Inbound frames are routed by
/// stream id; frames that fail to decode or name an unknown stream are
/// logged and dropped. When the connection terminates every open stream
/// receives a connection-closed error.
pub struct ClientChannel {
    lifecycle: ChannelLifecycle,
    config: ChannelConfig,
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, Arc<ClientStream>>>,
    self_ref: Weak<ClientChannel>,
}

impl ClientChannel {
    /// Wrap a peer connection and its data channel with default limits.
    pub fn new(connection: Arc<dyn PeerConnection>, data_channel: Arc<dyn DataChannel>) -> Arc<Self> {
        Self::with_config(connection, data_channel, ChannelConfig::default())
    }

    /// Wrap a peer connection and its data channel with explicit limits.
    pub fn with_config(
        connection: Arc<dyn PeerConnection>,
        data_channel: Arc<dyn DataChannel>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            lifecycle: ChannelLifecycle::new(connection, data_channel),
            config,
            next_id: AtomicU64::new(0),
            streams: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Feed `events` into this channel on a background task.
    ///
    /// The task holds the channel weakly and stops when the event source
    /// closes or the channel is dropped.
    pub fn spawn_event_pump(self: &Arc<Self>, mut events: EventReceiver) -> JoinHandle<()> {
        let channel = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(channel) = channel.upgrade() else {
                    break;
                };
                channel.handle_event(event);
            }
            debug!("channel event source closed");
        })
    }

    /// Apply one event from the data channel or peer connection.
    pub fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.lifecycle.on_channel_open(),
            ChannelEvent::Message(data) => self.on_channel_message(&data),
            ChannelEvent::Close => {
                self.lifecycle.on_channel_close();
                self.on_connection_terminated();
            }
            ChannelEvent::Error(message) => {
                self.lifecycle.on_channel_error(&message);
                self.on_connection_terminated();
            }
            ChannelEvent::IceConnectionStateChange(state) => {
                if self.lifecycle.on_ice_connection_state_change(state) {
                    self.on_connection_terminated();
                }
            }
        }
    }

    /// Wait until the data channel opens.
    pub async fn ready(&self) -> Result<()> {
        Ok(self.lifecycle.ready().await?)
    }

    /// Allocate the next stream id.
    pub fn next_stream_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a stream on a fresh id.
    pub fn new_stream(&self) -> Arc<ClientStream> {
        self.open_stream(self.next_stream_id())
    }

    /// Get or create the stream for `id`.
    ///
    /// On a closed channel, or with the table full, returns a stream that
    /// is already closed with the corresponding error and is never added to
    /// the table.
    pub fn open_stream(&self, id: u64) -> Arc<ClientStream> {
        let frame_config = self.config.frame_config();
        // Checked under the table lock: termination closes the lifecycle
        // before it snapshots the table, so an insert seen as open here is
        // always in that snapshot.
        let mut streams = self.lock_streams();
        if self.lifecycle.is_closed() {
            return Arc::new(ClientStream::failing(
                id,
                PeerError::ConnectionClosed("connection closed".to_string()),
                frame_config,
            ));
        }
        if let Some(stream) = streams.get(&id) {
            return stream.clone();
        }
        if streams.len() >= self.config.max_streams {
            warn!(
                stream_id = id,
                max = self.config.max_streams,
                "stream limit hit"
            );
            return Arc::new(ClientStream::failing(
                id,
                PeerError::StreamLimitExceeded(self.config.max_streams),
                frame_config,
            ));
        }

        let sink: Weak<dyn StreamSink> = self.self_ref.clone();
        let stream = Arc::new(ClientStream::new(id, sink, frame_config));
        streams.insert(id, stream.clone());
        debug!(stream_id = id, active = streams.len(), "opened stream");
        stream
    }

    /// Decode one inbound data channel message and route it.
    pub fn on_channel_message(&self, data: &[u8]) {
        let response = match decode_response(data) {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "error deserializing message");
                return;
            }
        };

        let Some(id) = response.stream_id() else {
            error!("no stream id; discarding");
            return;
        };

        let stream = self.lock_streams().get(&id).cloned();
        match stream {
            Some(stream) => stream.on_response(response),
            None => error!(stream_id = id, "no stream for id; discarding"),
        }
    }

    /// Mark the channel closed and fail every open stream. Idempotent.
    pub fn on_connection_terminated(&self) {
        self.lifecycle
            .close_with_reason(Some(TransportError::ConnectionClosed(
                "data channel closed".to_string(),
            )));
        self.fail_open_streams("connection terminated");
    }

    /// Close the channel and the peer connection, failing open streams.
    pub fn close(&self) {
        self.lifecycle.close();
        self.fail_open_streams("channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Number of streams currently in the table.
    pub fn stream_count(&self) -> usize {
        self.lock_streams().len()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &ChannelLifecycle {
        &self.lifecycle
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        self.lifecycle.connection()
    }

    fn fail_open_streams(&self, reason: &str) {
        // Streams remove themselves from the table as they close, so take a
        // snapshot and release the lock first.
        let open: Vec<Arc<ClientStream>> = self.lock_streams().values().cloned().collect();
        if !open.is_empty() {
            debug!(count = open.len(), reason, "failing open streams");
        }
        for stream in open {
            stream.close_with_recv_error(Some(PeerError::ConnectionClosed(reason.to_string())));
        }
    }

    fn write(&self, request: &Request) -> Result<()> {
        Ok(self.lifecycle.write(request)?)
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<u64, Arc<ClientStream>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StreamSink for ClientChannel {
    fn write_headers(&self, stream_id: u64, headers: RequestHeaders) -> Result<()> {
        self.write(&Request::headers(stream_id, headers))
    }

    fn write_message(&self, stream_id: u64, message: RequestMessage) -> Result<()> {
        self.write(&Request::message(stream_id, message))
    }

    fn write_reset(&self, stream_id: u64) -> Result<()> {
        self.write(&Request::reset(stream_id))
    }

    fn remove_stream(&self, stream_id: u64) {
        if self.lock_streams().remove(&stream_id).is_some() {
            debug!(stream_id, "removed stream");
        }
    }
}

#[async_trait]
impl RpcTransport for ClientChannel {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<UnaryResponse> {
        check_kind(method, MethodKind::Unary)?;
        debug!(method = %method.path(), "starting unary call");

        let stream = self.new_stream();
        stream.keep_latest_message_only();
        let mut call = Call::new(stream.clone(), method.clone());
        call.start(&headers, timeout)?;
        call.send(message)?;
        call.finish_send()?;
        complete_unary(&stream, timeout).await
    }

    async fn server_stream(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<ServerStreamResponse> {
        check_kind(method, MethodKind::ServerStreaming)?;
        debug!(method = %method.path(), "starting server-streaming call");

        let stream = self.new_stream();
        let mut call = Call::new(stream.clone(), method.clone());
        call.start(&headers, timeout)?;
        call.send(message)?;
        call.finish_send()?;
        Ok(ServerStreamResponse::new(stream, timeout))
    }
}

impl fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientChannel")
            .field("lifecycle", &self.lifecycle)
            .field("config", &self.config)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("streams", &self.stream_count())
            .finish()
    }
}
