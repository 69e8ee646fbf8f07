use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use rtcrpc_frame::{unwrap_message, Code, MetadataMap, Status};
use tokio::time::Instant;

use crate::error::{PeerError, Result};
use crate::stream::ClientStream;

/// Request/response shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl MethodKind {
    /// True if the client sends a stream of requests.
    pub fn client_streams(self) -> bool {
        matches!(self, MethodKind::ClientStreaming | MethodKind::BidiStreaming)
    }

    /// True if the server sends a stream of responses.
    pub fn server_streams(self) -> bool {
        matches!(self, MethodKind::ServerStreaming | MethodKind::BidiStreaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Unary => "unary",
            MethodKind::ServerStreaming => "server-streaming",
            MethodKind::ClientStreaming => "client-streaming",
            MethodKind::BidiStreaming => "bidi-streaming",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Fully qualified service name, e.g. `pkg.Echo`.
    pub service: String,
    /// Method name, e.g. `Echo`.
    pub name: String,
    pub kind: MethodKind,
}

impl MethodDescriptor {
    pub fn new(service: impl Into<String>, name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            kind,
        }
    }

    /// Request path, `/service/name`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.name)
    }
}

/// Result of a completed unary call.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryResponse {
    pub headers: MetadataMap,
    /// Serialized response message, envelope stripped.
    pub message: Bytes,
    pub trailers: MetadataMap,
}

/// In-progress server-streaming call.
///
/// There is no backpressure: messages the caller has not yet taken are
/// queued in memory.
#[derive(Debug)]
pub struct ServerStreamResponse {
    stream: Arc<ClientStream>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl ServerStreamResponse {
    pub(crate) fn new(stream: Arc<ClientStream>, timeout: Option<Duration>) -> Self {
        Self {
            stream,
            timeout,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// Next response message, envelope stripped. `Ok(None)` after the
    /// server finished with an OK status.
    pub async fn message(&mut self) -> Result<Option<Bytes>> {
        let next = match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) => {
                match tokio::time::timeout_at(deadline, self.stream.next_message()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.stream.cancel();
                        return Err(PeerError::DeadlineExceeded(timeout));
                    }
                }
            }
            _ => self.stream.next_message().await,
        };
        match next? {
            Some(enveloped) => Ok(Some(unwrap_message(&enveloped)?)),
            None => Ok(None),
        }
    }

    /// Consume into a stream of response messages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut response = state?;
            match response.message().await {
                Ok(Some(message)) => Some((Ok(message), Some(response))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Response headers, once received.
    pub fn headers(&self) -> Option<MetadataMap> {
        self.stream.response_headers()
    }

    /// Response trailers, once received.
    pub fn trailers(&self) -> Option<MetadataMap> {
        self.stream.response_trailers()
    }

    /// Cancel the call.
    pub fn cancel(&self) {
        self.stream.cancel();
    }
}

/// The outward RPC surface built on multiplexed streams.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// One request, one response.
    async fn unary(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<UnaryResponse>;

    /// One request, a stream of responses.
    async fn server_stream(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<ServerStreamResponse>;
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<UnaryResponse> {
        (**self).unary(method, timeout, headers, message).await
    }

    async fn server_stream(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<ServerStreamResponse> {
        (**self).server_stream(method, timeout, headers, message).await
    }
}

/// Wait for a unary stream to finish and collect its response.
pub(crate) async fn complete_unary(
    stream: &ClientStream,
    timeout: Option<Duration>,
) -> Result<UnaryResponse> {
    let completed = match timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.wait_until_complete()).await {
            Ok(completed) => completed,
            Err(_) => {
                stream.cancel();
                return Err(PeerError::DeadlineExceeded(limit));
            }
        },
        None => stream.wait_until_complete().await,
    };
    completed?;

    let headers = stream
        .response_headers()
        .ok_or_else(|| internal("no response headers"))?;
    let message = stream
        .response_message()
        .ok_or_else(|| internal("no response message"))?;
    let trailers = stream
        .response_trailers()
        .ok_or_else(|| internal("no response trailers"))?;

    Ok(UnaryResponse {
        headers,
        message: unwrap_message(&message)?,
        trailers,
    })
}

pub(crate) fn check_kind(method: &MethodDescriptor, expected: MethodKind) -> Result<()> {
    if method.kind == expected {
        return Ok(());
    }
    Err(PeerError::InvalidState(format!(
        "{} call cannot be used with {} method {}",
        expected,
        method.kind,
        method.path()
    )))
}

fn internal(message: &str) -> PeerError {
    PeerError::RemoteStatus(Status::new(Code::Internal, message))
}
