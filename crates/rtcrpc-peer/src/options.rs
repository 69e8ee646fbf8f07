use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{AuthPlan, StaticToken, TokenRequest};
use crate::config::ChannelConfig;
use crate::error::{PeerError, Result};

/// Credentials presented to an auth service.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub payload: String,
}

impl Credentials {
    pub fn new(credential_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            credential_type: credential_type.into(),
            payload: payload.into(),
        }
    }
}

/// Options for dialing a host.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DialOptions {
    /// Entity to authenticate as. Defaults to the dialed host.
    pub auth_entity: Option<String>,
    /// Exchanged for a token by the dial's token source.
    pub credentials: Option<Credentials>,
    pub webrtc_options: Option<DialWebRtcOptions>,
    /// Auth service to authenticate against instead of the host.
    pub external_auth_address: Option<String>,
    /// With `external_auth_address`, the entity the final token is for.
    pub external_auth_to_entity: Option<String>,
    /// Pre-issued token, sent as a bearer token on signaling calls and on
    /// every call over the channel. With both external auth fields set it
    /// is exchanged through the token source instead.
    pub access_token: Option<String>,
}

/// WebRTC-specific dial options.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DialWebRtcOptions {
    /// Gather every local candidate before sending the offer.
    pub disable_trickle_ice: bool,
    pub signaling_auth_entity: Option<String>,
    pub signaling_external_auth_address: Option<String>,
    pub signaling_external_auth_to_entity: Option<String>,
    pub signaling_credentials: Option<Credentials>,
    /// Pre-issued token for the signaling server only.
    pub signaling_access_token: Option<String>,
    /// Bound on the whole negotiation. None waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Limits for the resulting channel.
    pub channel: ChannelConfig,
}

impl DialOptions {
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_auth_entity(mut self, entity: impl Into<String>) -> Self {
        self.auth_entity = Some(entity.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_webrtc_options(mut self, options: DialWebRtcOptions) -> Self {
        self.webrtc_options = Some(options);
        self
    }

    /// How calls over the channel to `host` are authorized.
    pub fn channel_auth(&self, host: &str) -> AuthPlan {
        let external = external_pair(&self.external_auth_address, &self.external_auth_to_entity);
        let request = |credentials: Option<Credentials>, access_token: Option<String>| TokenRequest {
            entity: self
                .auth_entity
                .clone()
                .unwrap_or_else(|| strip_scheme(host).to_string()),
            credentials,
            access_token,
            external_auth_address: self.external_auth_address.clone(),
            external_auth_to_entity: self.external_auth_to_entity.clone(),
        };
        match (non_empty(&self.access_token), &self.credentials) {
            (Some(token), _) if !external => AuthPlan::AccessToken(StaticToken::new(token)),
            (Some(token), _) => AuthPlan::Fetch(request(None, Some(token.to_string()))),
            (None, Some(credentials)) => AuthPlan::Fetch(request(Some(credentials.clone()), None)),
            (None, None) => AuthPlan::Anonymous,
        }
    }

    /// How signaling calls for `host` are authorized.
    ///
    /// A dial-wide `access_token` wins. Otherwise the `signaling_*` options
    /// apply; the dial's own credentials are never sent to signaling.
    pub fn signaling_auth(&self, host: &str) -> AuthPlan {
        let fallback = DialWebRtcOptions::default();
        let webrtc = self.webrtc_options.as_ref().unwrap_or(&fallback);
        let external = external_pair(
            &webrtc.signaling_external_auth_address,
            &webrtc.signaling_external_auth_to_entity,
        );
        let request = |credentials: Option<Credentials>, access_token: Option<String>| TokenRequest {
            entity: webrtc
                .signaling_auth_entity
                .clone()
                .or_else(|| {
                    self.external_auth_address
                        .as_deref()
                        .map(|address| strip_scheme(address).to_string())
                })
                .unwrap_or_else(|| strip_scheme(host).to_string()),
            credentials,
            access_token,
            external_auth_address: webrtc.signaling_external_auth_address.clone(),
            external_auth_to_entity: webrtc.signaling_external_auth_to_entity.clone(),
        };
        let token =
            non_empty(&self.access_token).or_else(|| non_empty(&webrtc.signaling_access_token));
        match (token, &webrtc.signaling_credentials) {
            (Some(token), _) if !external => AuthPlan::AccessToken(StaticToken::new(token)),
            (Some(token), _) => AuthPlan::Fetch(request(None, Some(token.to_string()))),
            (None, Some(credentials)) => AuthPlan::Fetch(request(Some(credentials.clone()), None)),
            (None, None) => AuthPlan::Anonymous,
        }
    }
}

impl DialWebRtcOptions {
    pub fn with_disable_trickle_ice(mut self, disable: bool) -> Self {
        self.disable_trickle_ice = disable;
        self
    }

    pub fn with_signaling_credentials(mut self, credentials: Credentials) -> Self {
        self.signaling_credentials = Some(credentials);
        self
    }

    pub fn with_signaling_auth_entity(mut self, entity: impl Into<String>) -> Self {
        self.signaling_auth_entity = Some(entity.into());
        self
    }

    pub fn with_signaling_access_token(mut self, token: impl Into<String>) -> Self {
        self.signaling_access_token = Some(token.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel = config;
        self
    }
}

/// Reject conflicting credential combinations.
pub fn validate_dial_options(opts: &DialOptions) -> Result<()> {
    if non_empty(&opts.access_token).is_some() {
        if opts.auth_entity.is_some() {
            return Err(invalid("cannot set auth_entity with access_token"));
        }
        if opts.credentials.is_some() {
            return Err(invalid("cannot set credentials with access_token"));
        }
        if let Some(webrtc) = &opts.webrtc_options {
            if non_empty(&webrtc.signaling_access_token).is_some() {
                return Err(invalid(
                    "cannot set webrtc_options.signaling_access_token with access_token",
                ));
            }
            if webrtc.signaling_auth_entity.is_some() {
                return Err(invalid(
                    "cannot set webrtc_options.signaling_auth_entity with access_token",
                ));
            }
            if webrtc.signaling_credentials.is_some() {
                return Err(invalid(
                    "cannot set webrtc_options.signaling_credentials with access_token",
                ));
            }
        }
    }

    if let Some(webrtc) = &opts.webrtc_options {
        if non_empty(&webrtc.signaling_access_token).is_some() {
            if webrtc.signaling_auth_entity.is_some() {
                return Err(invalid(
                    "cannot set webrtc_options.signaling_auth_entity with webrtc_options.signaling_access_token",
                ));
            }
            if webrtc.signaling_credentials.is_some() {
                return Err(invalid(
                    "cannot set webrtc_options.signaling_credentials with webrtc_options.signaling_access_token",
                ));
            }
        }
    }

    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn external_pair(address: &Option<String>, to_entity: &Option<String>) -> bool {
    non_empty(address).is_some() && non_empty(to_entity).is_some()
}

fn strip_scheme(address: &str) -> &str {
    address
        .split_once("://")
        .map_or(address, |(_, rest)| rest)
}

fn invalid(message: &str) -> PeerError {
    PeerError::InvalidOptions(message.to_string())
}

fn redacted(f: &mut fmt::DebugStruct<'_, '_>, name: &str, value: &Option<String>) {
    match value {
        Some(value) => f.field(name, &format_args!("<redacted:{} bytes>", value.len())),
        None => f.field(name, &Option::<String>::None),
    };
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("type", &self.credential_type)
            .field(
                "payload",
                &format_args!("<redacted:{} bytes>", self.payload.len()),
            )
            .finish()
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("DialOptions");
        dbg.field("auth_entity", &self.auth_entity)
            .field("credentials", &self.credentials)
            .field("webrtc_options", &self.webrtc_options)
            .field("external_auth_address", &self.external_auth_address)
            .field("external_auth_to_entity", &self.external_auth_to_entity);
        redacted(&mut dbg, "access_token", &self.access_token);
        dbg.finish()
    }
}

impl fmt::Debug for DialWebRtcOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("DialWebRtcOptions");
        dbg.field("disable_trickle_ice", &self.disable_trickle_ice)
            .field("signaling_auth_entity", &self.signaling_auth_entity)
            .field(
                "signaling_external_auth_address",
                &self.signaling_external_auth_address,
            )
            .field(
                "signaling_external_auth_to_entity",
                &self.signaling_external_auth_to_entity,
            )
            .field("signaling_credentials", &self.signaling_credentials);
        redacted(
            &mut dbg,
            "signaling_access_token",
            &self.signaling_access_token,
        );
        dbg.field("connect_timeout", &self.connect_timeout)
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_are_valid() {
        assert!(validate_dial_options(&DialOptions::default()).is_ok());
    }

    #[test]
    fn access_token_excludes_other_credentials() {
        let opts = DialOptions::default()
            .with_access_token("tok")
            .with_auth_entity("robot");
        assert!(matches!(
            validate_dial_options(&opts),
            Err(PeerError::InvalidOptions(_))
        ));

        let opts = DialOptions::default()
            .with_access_token("tok")
            .with_credentials(Credentials::new("api-key", "k"));
        assert!(validate_dial_options(&opts).is_err());

        let opts = DialOptions::default()
            .with_access_token("tok")
            .with_webrtc_options(DialWebRtcOptions::default().with_signaling_access_token("s"));
        assert!(validate_dial_options(&opts).is_err());
    }

    #[test]
    fn signaling_token_excludes_signaling_credentials() {
        let webrtc = DialWebRtcOptions {
            signaling_credentials: Some(Credentials::new("api-key", "k")),
            ..DialWebRtcOptions::default()
        }
        .with_signaling_access_token("s");
        let opts = DialOptions::default().with_webrtc_options(webrtc);
        assert!(validate_dial_options(&opts).is_err());
    }

    #[test]
    fn empty_access_token_is_ignored() {
        let opts = DialOptions::default()
            .with_access_token("")
            .with_auth_entity("robot");
        assert!(validate_dial_options(&opts).is_ok());
    }

    #[test]
    fn signaling_token_prefers_access_token() {
        let opts = DialOptions::default().with_access_token("main");
        assert_eq!(
            opts.signaling_auth("h"),
            AuthPlan::AccessToken(StaticToken::new("main"))
        );

        let opts = DialOptions::default()
            .with_webrtc_options(DialWebRtcOptions::default().with_signaling_access_token("sig"));
        assert_eq!(
            opts.signaling_auth("h"),
            AuthPlan::AccessToken(StaticToken::new("sig"))
        );
        assert_eq!(opts.channel_auth("h"), AuthPlan::Anonymous);
        assert_eq!(DialOptions::default().signaling_auth("h"), AuthPlan::Anonymous);
    }

    #[test]
    fn credentials_become_token_requests() {
        let opts = DialOptions::default()
            .with_credentials(Credentials::new("api-key", "secret"))
            .with_auth_entity("robot")
            .with_webrtc_options(
                DialWebRtcOptions::default()
                    .with_signaling_credentials(Credentials::new("api-key", "sig-secret")),
            );
        assert!(validate_dial_options(&opts).is_ok());

        assert_eq!(
            opts.channel_auth("https://robot.local"),
            AuthPlan::Fetch(TokenRequest {
                entity: "robot".into(),
                credentials: Some(Credentials::new("api-key", "secret")),
                ..TokenRequest::default()
            })
        );
        // Without a signaling entity the scheme-less host is used.
        assert_eq!(
            opts.signaling_auth("https://robot.local"),
            AuthPlan::Fetch(TokenRequest {
                entity: "robot.local".into(),
                credentials: Some(Credentials::new("api-key", "sig-secret")),
                ..TokenRequest::default()
            })
        );
    }

    #[test]
    fn dial_credentials_are_not_sent_to_signaling() {
        let opts = DialOptions::default().with_credentials(Credentials::new("api-key", "secret"));
        assert_eq!(opts.signaling_auth("h"), AuthPlan::Anonymous);
        assert!(matches!(opts.channel_auth("h"), AuthPlan::Fetch(_)));
    }

    #[test]
    fn external_auth_exchanges_access_token() {
        let opts = DialOptions {
            external_auth_address: Some("https://auth.example".into()),
            external_auth_to_entity: Some("robot.local".into()),
            ..DialOptions::default()
        }
        .with_access_token("outer");

        assert_eq!(
            opts.channel_auth("robot.local"),
            AuthPlan::Fetch(TokenRequest {
                entity: "robot.local".into(),
                access_token: Some("outer".into()),
                external_auth_address: Some("https://auth.example".into()),
                external_auth_to_entity: Some("robot.local".into()),
                ..TokenRequest::default()
            })
        );
        // Signaling has no external pair of its own, so the token goes as is.
        assert_eq!(
            opts.signaling_auth("robot.local"),
            AuthPlan::AccessToken(StaticToken::new("outer"))
        );
    }

    #[test]
    fn signaling_entity_falls_back_to_external_address() {
        let opts = DialOptions {
            external_auth_address: Some("https://auth.example".into()),
            ..DialOptions::default()
        }
        .with_webrtc_options(
            DialWebRtcOptions::default().with_signaling_credentials(Credentials::new("k", "v")),
        );
        let AuthPlan::Fetch(request) = opts.signaling_auth("robot.local") else {
            panic!("expected a token request");
        };
        assert_eq!(request.entity, "auth.example");

        let opts = opts.with_webrtc_options(
            DialWebRtcOptions::default()
                .with_signaling_credentials(Credentials::new("k", "v"))
                .with_signaling_auth_entity("signaler"),
        );
        let AuthPlan::Fetch(request) = opts.signaling_auth("robot.local") else {
            panic!("expected a token request");
        };
        assert_eq!(request.entity, "signaler");
    }

    #[test]
    fn deserializes_with_defaults() {
        let opts: DialOptions = serde_json::from_str(
            r#"{"webrtc_options": {"disable_trickle_ice": true, "connect_timeout": {"secs": 5, "nanos": 0}}}"#,
        )
        .unwrap();
        let webrtc = opts.webrtc_options.unwrap();
        assert!(webrtc.disable_trickle_ice);
        assert_eq!(webrtc.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(webrtc.channel, ChannelConfig::default());
    }

    #[test]
    fn debug_redacts_secrets() {
        let opts = DialOptions::default()
            .with_access_token("supersecret")
            .with_webrtc_options(DialWebRtcOptions {
                signaling_credentials: Some(Credentials::new("api-key", "pa55")),
                ..DialWebRtcOptions::default()
            });
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("supersecret"));
        assert!(!rendered.contains("pa55"));
        assert!(rendered.contains("<redacted:11 bytes>"));
    }
}
