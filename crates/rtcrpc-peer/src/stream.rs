use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use rtcrpc_frame::wire::{
    RequestHeaders, RequestMessage, Response, ResponseHeaders, ResponseMessage, ResponseTrailers,
    ResponseType,
};
use rtcrpc_frame::{
    code_from_http_status, envelope_message, packetize, Code, FrameConfig, MetadataMap,
    PacketReassembler, Status,
};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::{PeerError, Result};
use crate::transport::MethodKind;

/// The write side a stream needs from its owning multiplexer.
///
/// Streams hold this weakly and never touch the stream table directly.
pub trait StreamSink: Send + Sync {
    fn write_headers(&self, stream_id: u64, headers: RequestHeaders) -> Result<()>;
    fn write_message(&self, stream_id: u64, message: RequestMessage) -> Result<()>;
    fn write_reset(&self, stream_id: u64) -> Result<()>;
    /// Drop the stream from the table. Must be idempotent.
    fn remove_stream(&self, stream_id: u64);
}

type OnEnd = Box<dyn FnOnce(Option<PeerError>) + Send>;

struct StreamState {
    closed: bool,
    error: Option<PeerError>,
    headers_received: bool,
    trailers_received: bool,
    response_headers: Option<MetadataMap>,
    response_trailers: Option<MetadataMap>,
    response_message: Option<Bytes>,
    // Unbounded; a slow `next_message` consumer lets it grow.
    pending_messages: VecDeque<Bytes>,
    queue_messages: bool,
    reassembler: PacketReassembler,
    on_end: Option<OnEnd>,
}

/// Client side of one multiplexed RPC.
///
/// Outbound: headers, then packetized messages, then an optional half-close
/// or a reset. Inbound: headers, then messages, then trailers. The first
/// terminal condition closes the stream; every method is a no-op after
/// that.
pub struct ClientStream {
    id: u64,
    sink: Option<Weak<dyn StreamSink>>,
    frame_config: FrameConfig,
    state: Mutex<StreamState>,
    changes: watch::Sender<u64>,
}

impl ClientStream {
    pub(crate) fn new(id: u64, sink: Weak<dyn StreamSink>, frame_config: FrameConfig) -> Self {
        Self::with_sink(id, Some(sink), frame_config)
    }

    /// A stream that was never registered and reports `err` to its caller.
    pub(crate) fn failing(id: u64, err: PeerError, frame_config: FrameConfig) -> Self {
        let stream = Self::with_sink(id, None, frame_config);
        {
            let mut state = stream.lock_state();
            state.closed = true;
            state.error = Some(err);
        }
        stream
    }

    fn with_sink(id: u64, sink: Option<Weak<dyn StreamSink>>, frame_config: FrameConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id,
            sink,
            frame_config,
            state: Mutex::new(StreamState {
                closed: false,
                error: None,
                headers_received: false,
                trailers_received: false,
                response_headers: None,
                response_trailers: None,
                response_message: None,
                pending_messages: VecDeque::new(),
                queue_messages: true,
                reassembler: PacketReassembler::with_max_message_size(
                    frame_config.max_message_size,
                ),
                on_end: None,
            }),
            changes,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send the headers frame opening this call.
    ///
    /// Calling this twice writes headers twice; the [`Call`](crate::Call)
    /// wrapper is what rejects that.
    pub fn start(&self, method: &str, metadata: &MetadataMap, timeout: Option<Duration>) {
        if self.is_closed() {
            return;
        }
        let headers = RequestHeaders {
            method: method.to_string(),
            metadata: metadata.to_proto(),
            timeout: timeout.map(to_proto_duration),
        };
        debug!(stream_id = self.id, method, "starting stream");

        let result = self
            .sink()
            .and_then(|sink| sink.write_headers(self.id, headers));
        if let Err(err) = result {
            error!(stream_id = self.id, error = %err, "error writing headers");
            self.close_with_recv_error(Some(err));
        }
    }

    /// Packetize and send one request message.
    pub fn send_message(&self, message: Option<Bytes>) {
        self.write_message(false, message);
    }

    /// Half-close for methods that stream requests; no-op otherwise.
    pub fn finish_send(&self, kind: MethodKind) {
        if !kind.client_streams() {
            return;
        }
        self.write_message(true, None);
    }

    /// Send a reset frame and close locally without waiting for the peer.
    pub fn cancel(&self) {
        if self.is_closed() {
            return;
        }
        let result = self.sink().and_then(|sink| sink.write_reset(self.id));
        match result {
            Ok(()) => self.close_with_recv_error(Some(PeerError::Cancelled)),
            Err(err) => {
                error!(stream_id = self.id, error = %err, "error writing reset");
                self.close_with_recv_error(Some(err));
            }
        }
    }

    /// Alias for [`cancel`](Self::cancel).
    pub fn reset(&self) {
        self.cancel();
    }

    fn write_message(&self, eos: bool, message: Option<Bytes>) {
        if self.is_closed() {
            return;
        }
        let result = packetize(message, eos, &self.frame_config)
            .map_err(PeerError::from)
            .and_then(|packets| {
                let sink = self.sink()?;
                for packet in packets {
                    sink.write_message(self.id, packet)?;
                }
                Ok(())
            });
        if let Err(err) = result {
            error!(stream_id = self.id, error = %err, "error writing message");
            self.close_with_recv_error(Some(err));
        }
    }

    /// Handle one inbound frame routed to this stream.
    pub fn on_response(&self, response: Response) {
        let Some(kind) = response.kind else {
            warn!(stream_id = self.id, "response without a known type; ignoring");
            return;
        };

        let outcome = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            match kind {
                ResponseType::Headers(headers) => self.process_headers(&mut state, headers),
                ResponseType::Message(message) => self.process_message(&mut state, message),
                ResponseType::Trailers(trailers) => self.process_trailers(&mut state, trailers),
            }
        };

        self.changes.send_modify(|version| *version += 1);
        if let Some(err) = outcome {
            self.close_with_recv_error(err);
        }
    }

    // Each process_* returns Some(close reason) when the frame ends the
    // stream, with the inner None meaning a clean close.

    fn process_headers(
        &self,
        state: &mut StreamState,
        headers: ResponseHeaders,
    ) -> Option<Option<PeerError>> {
        debug!(stream_id = self.id, "got headers");
        if state.headers_received {
            return Some(Some(violation("headers already received")));
        }
        if state.trailers_received {
            return Some(Some(violation("headers received after trailers")));
        }
        state.headers_received = true;

        let metadata = MetadataMap::from_proto(headers.metadata.as_ref());
        state.response_headers = Some(metadata.clone());

        // A grpc-status in headers means a trailers-only response.
        if let Some(raw) = metadata.get("grpc-status") {
            let code = raw.trim().parse().map(Code::from_i32).unwrap_or(Code::Unknown);
            let message = metadata.get("grpc-message").unwrap_or_default().to_string();
            state.trailers_received = true;
            state.response_trailers = Some(metadata);
            return Some(remote_status(code, message));
        }

        let http_status = metadata
            .get(":status")
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .unwrap_or(200);
        code_from_http_status(http_status).map(|code| {
            let message = metadata.get("grpc-message").unwrap_or_default().to_string();
            Some(PeerError::RemoteStatus(Status::new(code, message)))
        })
    }

    fn process_message(
        &self,
        state: &mut StreamState,
        message: ResponseMessage,
    ) -> Option<Option<PeerError>> {
        if !state.headers_received {
            return Some(Some(violation("headers not yet received")));
        }
        if state.trailers_received {
            return Some(Some(violation("message received after trailers")));
        }
        let Some(packet) = message.packet_message else {
            warn!(stream_id = self.id, "message without packet; ignoring");
            return None;
        };

        let complete = state.reassembler.push(packet)?;
        debug!(stream_id = self.id, len = complete.len(), "message reassembled");
        match envelope_message(&complete) {
            Ok(enveloped) => {
                if state.queue_messages {
                    state.pending_messages.push_back(enveloped.clone());
                }
                state.response_message = Some(enveloped);
                None
            }
            Err(err) => Some(Some(err.into())),
        }
    }

    fn process_trailers(
        &self,
        state: &mut StreamState,
        trailers: ResponseTrailers,
    ) -> Option<Option<PeerError>> {
        debug!(stream_id = self.id, "got trailers");
        state.trailers_received = true;

        let mut metadata = MetadataMap::from_proto(trailers.metadata.as_ref());
        let status = match &trailers.status {
            Some(status) => {
                let status = Status::from_proto(status);
                metadata.insert("grpc-status", status.code.as_i32().to_string());
                metadata.insert("grpc-message", status.message.clone());
                status
            }
            None => {
                metadata.insert("grpc-status", "0");
                Status::ok()
            }
        };

        let block = metadata.to_header_block();
        state.response_trailers = Some(metadata);
        if let Err(err) = block {
            return Some(Some(err.into()));
        }
        Some(remote_status(status.code, status.message))
    }

    /// Close the stream. Idempotent: only the first call records its error,
    /// removes the stream from the table and runs the end callback.
    pub fn close_with_recv_error(&self, err: Option<PeerError>) {
        let on_end = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.error = err.clone();
            state.on_end.take()
        };

        match &err {
            Some(err) => debug!(stream_id = self.id, error = %err, "stream closed with error"),
            None => debug!(stream_id = self.id, "stream closed"),
        }
        self.changes.send_modify(|version| *version += 1);

        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.remove_stream(self.id);
        }
        if let Some(on_end) = on_end {
            on_end(err);
        }
    }

    /// Register the end-of-stream callback. Runs immediately if the stream
    /// is already closed.
    pub fn on_end(&self, callback: impl FnOnce(Option<PeerError>) + Send + 'static) {
        let mut state = self.lock_state();
        if state.closed {
            let err = state.error.clone();
            drop(state);
            callback(err);
        } else {
            state.on_end = Some(Box::new(callback));
        }
    }

    /// Resolve once the stream has completed or closed.
    ///
    /// Returns the error that closed the stream, if any.
    pub async fn wait_until_complete(&self) -> Result<()> {
        let mut changes = self.changes.subscribe();
        loop {
            {
                let state = self.lock_state();
                if state.closed {
                    return match &state.error {
                        Some(err) => Err(err.clone()),
                        None => Ok(()),
                    };
                }
            }
            if changes.changed().await.is_err() {
                return Err(PeerError::ConnectionClosed("stream dropped".to_string()));
            }
        }
    }

    /// Next reassembled response message, still enveloped.
    ///
    /// Returns `Ok(None)` after a clean close once every message has been
    /// taken, or the closing error.
    pub async fn next_message(&self) -> Result<Option<Bytes>> {
        let mut changes = self.changes.subscribe();
        loop {
            {
                let mut state = self.lock_state();
                if let Some(message) = state.pending_messages.pop_front() {
                    return Ok(Some(message));
                }
                if state.closed {
                    return match &state.error {
                        Some(err) => Err(err.clone()),
                        None => Ok(None),
                    };
                }
            }
            if changes.changed().await.is_err() {
                return Err(PeerError::ConnectionClosed("stream dropped".to_string()));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// True once trailers were processed or the stream closed.
    pub fn is_completed(&self) -> bool {
        let state = self.lock_state();
        state.closed || state.trailers_received
    }

    /// The error that closed the stream, if any.
    pub fn error(&self) -> Option<PeerError> {
        self.lock_state().error.clone()
    }

    pub fn response_headers(&self) -> Option<MetadataMap> {
        self.lock_state().response_headers.clone()
    }

    pub fn response_trailers(&self) -> Option<MetadataMap> {
        self.lock_state().response_trailers.clone()
    }

    /// The most recent reassembled message, enveloped.
    pub fn response_message(&self) -> Option<Bytes> {
        self.lock_state().response_message.clone()
    }

    /// Stop queueing messages for [`next_message`](Self::next_message);
    /// only [`response_message`](Self::response_message) is kept. Unary
    /// calls read nothing else.
    pub fn keep_latest_message_only(&self) {
        let mut state = self.lock_state();
        state.queue_messages = false;
        state.pending_messages.clear();
    }

    fn sink(&self) -> Result<Arc<dyn StreamSink>> {
        self.sink
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| PeerError::ConnectionClosed("channel dropped".to_string()))
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ClientStream")
            .field("id", &self.id)
            .field("closed", &state.closed)
            .field("headers_received", &state.headers_received)
            .field("trailers_received", &state.trailers_received)
            .field("error", &state.error)
            .finish_non_exhaustive()
    }
}

fn violation(message: &str) -> PeerError {
    PeerError::ProtocolViolation(message.to_string())
}

fn remote_status(code: Code, message: String) -> Option<PeerError> {
    if code == Code::Ok {
        None
    } else {
        Some(PeerError::RemoteStatus(Status::new(code, message)))
    }
}

fn to_proto_duration(timeout: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(timeout.subsec_nanos()).unwrap_or(0),
    }
}
