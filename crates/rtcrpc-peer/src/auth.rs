use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rtcrpc_frame::MetadataMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::options::Credentials;
use crate::transport::{MethodDescriptor, RpcTransport, ServerStreamResponse, UnaryResponse};

/// What a [`TokenSource`] is asked to authenticate.
///
/// Either `credentials` or `access_token` is set. When both external auth
/// fields are present the source is expected to authenticate against the
/// external auth service and then exchange the result for a token scoped
/// to `external_auth_to_entity`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    /// Entity to authenticate as.
    pub entity: String,
    pub credentials: Option<Credentials>,
    /// A token to exchange rather than credentials to present.
    pub access_token: Option<String>,
    pub external_auth_address: Option<String>,
    pub external_auth_to_entity: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("TokenRequest");
        dbg.field("entity", &self.entity)
            .field("credentials", &self.credentials);
        match &self.access_token {
            Some(token) => dbg.field(
                "access_token",
                &format_args!("<redacted:{} bytes>", token.len()),
            ),
            None => dbg.field("access_token", &Option::<String>::None),
        };
        dbg.field("external_auth_address", &self.external_auth_address)
            .field("external_auth_to_entity", &self.external_auth_to_entity)
            .finish()
    }
}

/// Produces a bearer token for outgoing calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, request: &TokenRequest) -> Result<String>;
}

/// How calls on one connection are authorized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthPlan {
    /// No `authorization` header.
    Anonymous,
    /// A pre-issued token sent as is.
    AccessToken(StaticToken),
    /// A token fetched from a [`TokenSource`].
    Fetch(TokenRequest),
}

impl AuthPlan {
    /// Pair the plan with the source that serves it.
    ///
    /// Fails with `InvalidOptions` when the plan needs a token fetched but
    /// no source was supplied.
    pub fn resolve(
        self,
        source: Option<&Arc<dyn TokenSource>>,
    ) -> Result<Option<(Arc<dyn TokenSource>, TokenRequest)>> {
        match self {
            AuthPlan::Anonymous => Ok(None),
            AuthPlan::AccessToken(token) => {
                let source: Arc<dyn TokenSource> = Arc::new(token);
                Ok(Some((source, TokenRequest::default())))
            }
            AuthPlan::Fetch(request) => match source {
                Some(source) => Ok(Some((source.clone(), request))),
                None => Err(PeerError::InvalidOptions(format!(
                    "authenticating as {:?} requires a token source",
                    request.entity
                ))),
            },
        }
    }
}

/// A pre-issued access token.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _request: &TokenRequest) -> Result<String> {
        Ok(self.0.clone())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&format_args!("<redacted:{} bytes>", self.0.len()))
            .finish()
    }
}

/// Build `authorization: Bearer <token>` metadata.
pub fn bearer_metadata(token: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.insert("authorization", format!("Bearer {token}"));
    metadata
}

/// Wraps a transport and adds a bearer token to every call.
///
/// The token is fetched from the source on first use and reused after.
pub struct AuthenticatedTransport<T> {
    inner: T,
    source: Arc<dyn TokenSource>,
    request: TokenRequest,
    extra_metadata: OnceCell<MetadataMap>,
}

impl<T: RpcTransport> AuthenticatedTransport<T> {
    pub fn new(inner: T, source: Arc<dyn TokenSource>) -> Self {
        Self {
            inner,
            source,
            request: TokenRequest::default(),
            extra_metadata: OnceCell::new(),
        }
    }

    /// Set what the source is asked to authenticate.
    pub fn with_request(mut self, request: TokenRequest) -> Self {
        self.request = request;
        self
    }

    /// Shorthand for a fixed access token.
    pub fn with_access_token(inner: T, token: impl Into<String>) -> Self {
        Self::new(inner, Arc::new(StaticToken::new(token)))
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn with_extra(&self, mut headers: MetadataMap) -> Result<MetadataMap> {
        let extra = self
            .extra_metadata
            .get_or_try_init(|| async {
                debug!(entity = %self.request.entity, "fetching access token");
                let token = self.source.token(&self.request).await?;
                Ok::<_, PeerError>(bearer_metadata(&token))
            })
            .await?;
        headers.merge(extra);
        Ok(headers)
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for AuthenticatedTransport<T> {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<UnaryResponse> {
        let headers = self.with_extra(headers).await?;
        self.inner.unary(method, timeout, headers, message).await
    }

    async fn server_stream(
        &self,
        method: &MethodDescriptor,
        timeout: Option<Duration>,
        headers: MetadataMap,
        message: Bytes,
    ) -> Result<ServerStreamResponse> {
        let headers = self.with_extra(headers).await?;
        self.inner
            .server_stream(method, timeout, headers, message)
            .await
    }
}

impl<T> fmt::Debug for AuthenticatedTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("AuthenticatedTransport");
        match self.extra_metadata.get().and_then(|md| md.get("authorization")) {
            Some(value) => dbg.field(
                "authorization",
                &format_args!("<redacted:{} bytes>", value.len()),
            ),
            None => dbg.field("authorization", &Option::<String>::None),
        };
        dbg.finish_non_exhaustive()
    }
}
