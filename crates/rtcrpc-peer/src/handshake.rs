use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use rtcrpc_frame::{Code, MetadataMap, Status};
use rtcrpc_transport::{
    CandidateReceiver, IceCandidateInit, PeerConnection, PeerConnectionFactory,
    PeerConnectionParts,
};
use tracing::{debug, error, info, warn};

use crate::auth::{bearer_metadata, AuthenticatedTransport, TokenSource};
use crate::channel::ClientChannel;
use crate::error::{PeerError, Result};
use crate::options::{validate_dial_options, DialOptions, DialWebRtcOptions};
use crate::signaling::{
    decode_sdp, encode_sdp, CallRequest, CallResponse, CallResponseStage, CallUpdate,
    CallUpdateRequest, IceCandidate, SignalingClient, SignalingError,
};
use crate::transport::RpcTransport;

/// A negotiated WebRTC connection.
pub struct WebRtcConnection {
    /// Multiplexed RPC channel over the data channel.
    pub channel: Arc<ClientChannel>,
    /// The channel with the dial's authorization applied. Issue calls here.
    pub transport: Arc<dyn RpcTransport>,
    /// The raw peer connection, for introspection.
    pub peer_connection: Arc<dyn PeerConnection>,
}

impl fmt::Debug for WebRtcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcConnection")
            .field("channel", &self.channel)
            .field("ice_state", &self.peer_connection.ice_connection_state())
            .finish_non_exhaustive()
    }
}

/// Token sources used when dial options carry credentials.
#[derive(Clone, Default)]
pub struct DialAuth {
    token_source: Option<Arc<dyn TokenSource>>,
    signaling_token_source: Option<Arc<dyn TokenSource>>,
}

impl DialAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source for the channel's token. Also serves signaling unless a
    /// signaling source is set.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn with_signaling_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.signaling_token_source = Some(source);
        self
    }

    fn signaling_source(&self) -> Option<&Arc<dyn TokenSource>> {
        self.signaling_token_source
            .as_ref()
            .or(self.token_source.as_ref())
    }
}

impl fmt::Debug for DialAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialAuth")
            .field("token_source", &self.token_source.is_some())
            .field(
                "signaling_token_source",
                &self.signaling_token_source.is_some(),
            )
            .finish()
    }
}

/// Metadata sent with every signaling call for `host`.
///
/// Fetches a token when the signaling options carry credentials, and fails
/// with `InvalidOptions` when they do and `auth` has no source for them.
pub async fn signaling_metadata(
    host: &str,
    opts: &DialOptions,
    auth: &DialAuth,
) -> Result<MetadataMap> {
    let mut metadata = match opts.signaling_auth(host).resolve(auth.signaling_source())? {
        Some((source, request)) => {
            debug!(entity = %request.entity, "fetching signaling token");
            bearer_metadata(&source.token(&request).await?)
        }
        None => MetadataMap::new(),
    };
    metadata.insert("rpc-host", host);
    Ok(metadata)
}

/// Establish a WebRTC connection to `host` through a signaling server.
///
/// Sends the local offer over the signaling `Call`, applies the answer and
/// remote candidates, trickles local candidates back through `CallUpdate`,
/// and returns once the data channel is open. The peer connection is closed
/// on every failure path.
///
/// Options carrying credentials need a token source; use
/// [`dial_webrtc_with_auth`] for those.
pub async fn dial_webrtc(
    signaling: Arc<dyn SignalingClient>,
    factory: &dyn PeerConnectionFactory,
    host: &str,
    opts: &DialOptions,
) -> Result<WebRtcConnection> {
    dial_webrtc_with_auth(signaling, factory, host, opts, &DialAuth::default()).await
}

/// Like [`dial_webrtc`], with token sources for credential-based auth.
pub async fn dial_webrtc_with_auth(
    signaling: Arc<dyn SignalingClient>,
    factory: &dyn PeerConnectionFactory,
    host: &str,
    opts: &DialOptions,
    auth: &DialAuth,
) -> Result<WebRtcConnection> {
    validate_dial_options(opts)?;
    let webrtc = opts.webrtc_options.clone().unwrap_or_default();
    let channel_auth = opts
        .channel_auth(host)
        .resolve(auth.token_source.as_ref())?;
    let metadata = signaling_metadata(host, opts, auth).await?;

    let parts = factory.create(webrtc.disable_trickle_ice).await?;
    let connection = parts.connection.clone();

    let negotiation = negotiate(signaling, parts, metadata, &webrtc);
    let result = match webrtc.connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, negotiation).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::DeadlineExceeded(limit)),
        },
        None => negotiation.await,
    };

    match &result {
        Ok(_) => info!(host, "webrtc connection established"),
        Err(err) => {
            warn!(host, error = %err, "webrtc dial failed");
            connection.close();
        }
    }
    let connection = result?;
    let transport: Arc<dyn RpcTransport> = match channel_auth {
        Some((source, request)) => Arc::new(
            AuthenticatedTransport::new(connection.channel.clone(), source).with_request(request),
        ),
        None => connection.channel.clone(),
    };
    Ok(WebRtcConnection {
        transport,
        ..connection
    })
}

async fn negotiate(
    signaling: Arc<dyn SignalingClient>,
    parts: PeerConnectionParts,
    metadata: MetadataMap,
    webrtc: &DialWebRtcOptions,
) -> Result<WebRtcConnection> {
    let PeerConnectionParts {
        connection,
        data_channel,
        events,
        mut local_candidates,
    } = parts;
    let trickle = !webrtc.disable_trickle_ice;

    let channel = ClientChannel::with_config(connection.clone(), data_channel, webrtc.channel);
    channel.spawn_event_pump(events);

    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;
    if !trickle {
        wait_for_gathering(&mut local_candidates).await;
    }
    let local = connection.local_description().await.unwrap_or(offer);

    let request = CallRequest {
        sdp: encode_sdp(&local)?,
        disable_trickle: !trickle,
    };
    let mut responses = signaling
        .call(metadata.clone(), request)
        .await
        .map_err(dial_error)?;
    debug!(trickle, "signaling call started");

    let mut exchange = Exchange {
        signaling,
        metadata,
        connection: connection.clone(),
        trickle,
        uuid: None,
        pending_candidates: Vec::new(),
        gathering_done: !trickle,
        sent_done_or_error: false,
    };
    let mut signaling_done = false;

    {
        let ready = channel.ready();
        tokio::pin!(ready);
        loop {
            tokio::select! {
                biased;

                candidate = local_candidates.recv(), if !exchange.gathering_done => {
                    match candidate {
                        Some(Some(candidate)) => exchange.on_local_candidate(candidate).await,
                        Some(None) | None => exchange.on_gathering_complete().await,
                    }
                }
                response = responses.next(), if !signaling_done => {
                    match response {
                        Some(Ok(response)) => exchange.on_response(response).await?,
                        Some(Err(err)) => {
                            if matches!(err, SignalingError::NoHeaders) {
                                return Err(dial_error(err));
                            }
                            error!(error = %err, "signaling call ended with error");
                            signaling_done = true;
                        }
                        None => {
                            debug!("signaling call ended");
                            signaling_done = true;
                        }
                    }
                }
                ready_result = &mut ready => {
                    ready_result?;
                    break;
                }
            }
        }
    }

    exchange.send_done().await;
    Ok(WebRtcConnection {
        transport: channel.clone(),
        channel,
        peer_connection: connection,
    })
}

async fn wait_for_gathering(candidates: &mut CandidateReceiver) {
    while let Some(Some(_)) = candidates.recv().await {}
    debug!("local ICE gathering complete");
}

fn dial_error(err: SignalingError) -> PeerError {
    match err {
        SignalingError::NoHeaders => PeerError::ConnectionClosed("failed to dial".to_string()),
        other => PeerError::Signaling(other),
    }
}

/// Signaling state for one dial.
struct Exchange {
    signaling: Arc<dyn SignalingClient>,
    metadata: MetadataMap,
    connection: Arc<dyn PeerConnection>,
    trickle: bool,
    uuid: Option<String>,
    pending_candidates: Vec<IceCandidateInit>,
    gathering_done: bool,
    // The exchange may end through either ICE or signaling; done and error
    // share this guard so only the first of them is sent.
    sent_done_or_error: bool,
}

impl Exchange {
    async fn on_response(&mut self, response: CallResponse) -> Result<()> {
        match response.stage {
            Some(CallResponseStage::Init(init)) => {
                if self.uuid.is_some() {
                    self.send_error("got init stage more than once").await;
                    return Ok(());
                }
                debug!(uuid = %response.uuid, "got init stage");
                self.uuid = Some(response.uuid);

                let remote = decode_sdp(&init.sdp)?;
                self.connection.set_remote_description(remote).await?;

                if !self.trickle {
                    self.send_done().await;
                    return Ok(());
                }
                for candidate in std::mem::take(&mut self.pending_candidates) {
                    self.send_candidate(candidate).await;
                }
                if self.gathering_done {
                    self.send_done().await;
                }
            }
            Some(CallResponseStage::Update(update)) => {
                let Some(uuid) = self.uuid.as_deref() else {
                    self.send_error("got update stage before init stage").await;
                    return Ok(());
                };
                if response.uuid != uuid {
                    let message = format!("uuid mismatch; have={} want={}", response.uuid, uuid);
                    self.send_error(&message).await;
                    return Ok(());
                }
                let Some(candidate) = update.candidate else {
                    self.send_error("update stage without candidate").await;
                    return Ok(());
                };
                debug!(candidate = %candidate.candidate, "adding remote candidate");
                if let Err(err) = self.connection.add_ice_candidate(candidate.into()).await {
                    self.send_error(&err.to_string()).await;
                }
            }
            None => self.send_error("unknown CallResponse stage").await,
        }
        Ok(())
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidateInit) {
        if self.uuid.is_none() {
            self.pending_candidates.push(candidate);
            return;
        }
        self.send_candidate(candidate).await;
    }

    async fn on_gathering_complete(&mut self) {
        debug!("local ICE gathering complete");
        self.gathering_done = true;
        if self.uuid.is_some() {
            self.send_done().await;
        }
    }

    async fn send_candidate(&mut self, candidate: IceCandidateInit) {
        let request = CallUpdateRequest {
            uuid: self.uuid.clone().unwrap_or_default(),
            update: Some(CallUpdate::Candidate(IceCandidate::from(&candidate))),
        };
        if let Err(err) = self
            .signaling
            .call_update(self.metadata.clone(), request)
            .await
        {
            if !self.sent_done_or_error {
                error!(error = %err, "error sending candidate");
            }
        }
    }

    async fn send_done(&mut self) {
        if self.sent_done_or_error {
            return;
        }
        self.sent_done_or_error = true;
        debug!("sending done");
        self.send_update(CallUpdate::Done(true)).await;
    }

    async fn send_error(&mut self, message: &str) {
        if self.sent_done_or_error {
            return;
        }
        self.sent_done_or_error = true;
        warn!(error = message, "reporting signaling error");
        let status = Status::new(Code::Unknown, message);
        self.send_update(CallUpdate::Error(status.to_proto())).await;
    }

    async fn send_update(&self, update: CallUpdate) {
        let request = CallUpdateRequest {
            uuid: self.uuid.clone().unwrap_or_default(),
            update: Some(update),
        };
        if let Err(err) = self
            .signaling
            .call_update(self.metadata.clone(), request)
            .await
        {
            error!(error = %err, "error sending call update");
        }
    }
}
