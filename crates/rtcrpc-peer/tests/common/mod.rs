#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use rtcrpc_frame::wire::{
    PacketMessage, Request, Response, ResponseHeaders, ResponseTrailers, RpcStatus,
};
use rtcrpc_frame::{decode_request, encode_response, envelope_message, MetadataMap};
use rtcrpc_peer::signaling::{
    CallRequest, CallResponse, CallResponseStream, CallUpdateRequest, CallUpdateResponse,
    SignalingClient, SignalingError,
};
use rtcrpc_peer::{ChannelConfig, ClientChannel};
use rtcrpc_transport::{
    ChannelEvent, DataChannel, IceCandidateInit, IceConnectionState, PeerConnection,
    PeerConnectionFactory, PeerConnectionParts, SessionDescription, TransportError,
};
use tokio::sync::mpsc;

/// Peer connection that records what the client applied to it.
#[derive(Default)]
pub struct MockPeerConnection {
    pub remote_descriptions: Mutex<Vec<SessionDescription>>,
    pub remote_candidates: Mutex<Vec<IceCandidateInit>>,
    pub closes: AtomicUsize,
    pub reject_candidates: bool,
}

impl MockPeerConnection {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> rtcrpc_transport::Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n"))
    }

    async fn set_local_description(
        &self,
        _desc: SessionDescription,
    ) -> rtcrpc_transport::Result<()> {
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        None
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> rtcrpc_transport::Result<()> {
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateInit,
    ) -> rtcrpc_transport::Result<()> {
        if self.reject_candidates {
            return Err(TransportError::PeerConnection(
                "candidate rejected".to_string(),
            ));
        }
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        IceConnectionState::New
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Data channel that forwards every sent message to a test receiver.
pub struct MockDataChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        "data"
    }

    fn send(&self, data: Bytes) -> rtcrpc_transport::Result<()> {
        self.outbound
            .send(data)
            .map_err(|_| TransportError::Send("receiver dropped".to_string()))
    }
}

/// A client channel wired to mocks, with helpers that play the server.
pub struct Harness {
    pub channel: Arc<ClientChannel>,
    pub connection: Arc<MockPeerConnection>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        let connection = Arc::new(MockPeerConnection::default());
        let (tx, outbound) = mpsc::unbounded_channel();
        let data_channel = Arc::new(MockDataChannel { outbound: tx });
        let channel = ClientChannel::with_config(connection.clone(), data_channel, config);
        Self {
            channel,
            connection,
            outbound,
        }
    }

    /// A harness whose data channel is already open.
    pub fn open() -> Self {
        let harness = Self::new();
        harness.channel.handle_event(ChannelEvent::Open);
        harness
    }

    pub async fn next_request(&mut self) -> Request {
        let raw = self.outbound.recv().await.expect("channel sent nothing");
        decode_request(&raw).expect("client sent an undecodable frame")
    }

    pub fn try_next_request(&mut self) -> Option<Request> {
        let raw = self.outbound.try_recv().ok()?;
        Some(decode_request(&raw).expect("client sent an undecodable frame"))
    }

    pub fn deliver(&self, response: Response) {
        self.deliver_raw(encode_response(&response));
    }

    pub fn deliver_raw(&self, raw: Bytes) {
        self.channel.handle_event(ChannelEvent::Message(raw));
    }

    pub fn send_headers(&self, stream_id: u64) {
        let metadata: MetadataMap = [(":status", "200")].into_iter().collect();
        self.deliver(Response::headers(
            stream_id,
            ResponseHeaders {
                metadata: metadata.to_proto(),
            },
        ));
    }

    /// One complete message in a single packet.
    pub fn send_message(&self, stream_id: u64, payload: &[u8]) {
        let enveloped = envelope_message(payload).unwrap();
        self.deliver(Response::message(
            stream_id,
            PacketMessage {
                data: enveloped,
                eom: true,
            },
        ));
    }

    pub fn send_trailers(&self, stream_id: u64, code: i32, message: &str) {
        self.deliver(Response::trailers(
            stream_id,
            ResponseTrailers {
                status: Some(RpcStatus {
                    code,
                    message: message.to_string(),
                    details: Vec::new(),
                }),
                metadata: None,
            },
        ));
    }

    pub fn respond_ok(&self, stream_id: u64, payload: &[u8]) {
        self.send_headers(stream_id);
        self.send_message(stream_id, payload);
        self.send_trailers(stream_id, 0, "");
    }
}

/// What the signaling server saw.
#[derive(Default)]
pub struct SignalingLog {
    pub calls: Vec<(MetadataMap, CallRequest)>,
    pub updates: Vec<CallUpdateRequest>,
}

/// Signaling client that replays a fixed list of responses.
pub struct ScriptedSignaling {
    script: Mutex<Option<Vec<Result<CallResponse, SignalingError>>>>,
    hold_open: bool,
    pub log: Mutex<SignalingLog>,
}

impl ScriptedSignaling {
    /// Replay `script`, then end the call.
    pub fn new(script: Vec<Result<CallResponse, SignalingError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            hold_open: false,
            log: Mutex::new(SignalingLog::default()),
        })
    }

    /// Replay `script`, then keep the call open indefinitely.
    pub fn held_open(script: Vec<Result<CallResponse, SignalingError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            hold_open: true,
            log: Mutex::new(SignalingLog::default()),
        })
    }

    pub fn updates(&self) -> Vec<CallUpdateRequest> {
        self.log.lock().unwrap().updates.clone()
    }

    pub fn calls(&self) -> Vec<(MetadataMap, CallRequest)> {
        self.log.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl SignalingClient for ScriptedSignaling {
    async fn call(
        &self,
        metadata: MetadataMap,
        request: CallRequest,
    ) -> Result<CallResponseStream, SignalingError> {
        self.log.lock().unwrap().calls.push((metadata, request));
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        let replay = futures_util::stream::iter(script);
        if self.hold_open {
            Ok(replay.chain(futures_util::stream::pending()).boxed())
        } else {
            Ok(replay.boxed())
        }
    }

    async fn call_update(
        &self,
        _metadata: MetadataMap,
        request: CallUpdateRequest,
    ) -> Result<CallUpdateResponse, SignalingError> {
        self.log.lock().unwrap().updates.push(request);
        Ok(CallUpdateResponse {})
    }
}

/// Hands out one pre-built peer connection, keeping the test's ends of its
/// event and candidate queues.
pub struct MockFactory {
    parts: Mutex<Option<PeerConnectionParts>>,
    pub connection: Arc<MockPeerConnection>,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    pub candidates: mpsc::UnboundedSender<Option<IceCandidateInit>>,
    pub outbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::with_connection(MockPeerConnection::default())
    }

    pub fn with_connection(connection: MockPeerConnection) -> Self {
        let connection = Arc::new(connection);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (candidates_tx, local_candidates) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let parts = PeerConnectionParts {
            connection: connection.clone(),
            data_channel: Arc::new(MockDataChannel {
                outbound: outbound_tx,
            }),
            events,
            local_candidates,
        };
        Self {
            parts: Mutex::new(Some(parts)),
            connection,
            events: events_tx,
            candidates: candidates_tx,
            outbound: Mutex::new(outbound),
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(&self, _disable_trickle_ice: bool) -> rtcrpc_transport::Result<PeerConnectionParts> {
        self.parts
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::PeerConnection("already created".to_string()))
    }
}

pub fn candidate(line: &str) -> IceCandidateInit {
    IceCandidateInit {
        candidate: line.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}
