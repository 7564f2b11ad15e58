//! WebSocket upgrade negotiation.
//!
//! Validates the RFC 6455 handshake, evaluates the origin policy, computes
//! the accept key and hands back a `101 Switching Protocols` response plus
//! a future resolving to the hijacked [`Conn`] once hyper performs the
//! protocol switch.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::conn::{Conn, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{WsError, WsResult};

/// RFC 6455 handshake GUID
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Server-side connection type produced by an upgrade
pub type ServerConn = Conn<TokioIo<Upgraded>>;

/// Compute `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(digest.finalize())
}

/// Origin policy callback: request headers plus the effective host
pub type OriginCheck = Arc<dyn Fn(&HeaderMap, &str) -> bool + Send + Sync>;

/// Pre-upgrade hook; an error terminates the handshake with the given
/// status and message
pub type BeforeUpgrade =
    Arc<dyn Fn(&HeaderMap) -> Result<(), (StatusCode, String)> + Send + Sync>;

/// Handshake rejection
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// Malformed or incomplete upgrade request
    #[error("bad websocket handshake: {0}")]
    BadRequest(String),

    /// Origin policy rejected the request
    #[error("origin not allowed")]
    OriginDenied,

    /// No offered subprotocol matched the required set
    #[error("no acceptable websocket subprotocol")]
    ProtocolMismatch,

    /// The before-upgrade hook rejected the handshake
    #[error("upgrade rejected: {1}")]
    Rejected(StatusCode, String),
}

impl UpgradeError {
    /// HTTP status to answer the failed handshake with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::ProtocolMismatch => StatusCode::BAD_REQUEST,
            Self::OriginDenied => StatusCode::FORBIDDEN,
            Self::Rejected(status, _) => *status,
        }
    }
}

/// Upgrade negotiator
///
/// The default origin policy is same-origin: requests without an `Origin`
/// header are rejected (non-browser clients should install an explicit
/// check), and present origins must match the request host
/// case-insensitively.
#[derive(Clone)]
pub struct Upgrader {
    /// Cap on assembled message size for accepted connections
    pub max_message_size: usize,
    /// Read deadline installed on accepted connections
    pub read_deadline: Option<std::time::Duration>,
    /// Required subprotocols; empty means none negotiated
    pub require_protocol: Vec<String>,
    /// Extra headers merged into the 101 response
    pub response_headers: HeaderMap,
    check_origin: Option<OriginCheck>,
    before_upgrade: Option<BeforeUpgrade>,
}

impl Default for Upgrader {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_deadline: None,
            require_protocol: Vec::new(),
            response_headers: HeaderMap::new(),
            check_origin: None,
            before_upgrade: None,
        }
    }
}

impl fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrader")
            .field("max_message_size", &self.max_message_size)
            .field("read_deadline", &self.read_deadline)
            .field("require_protocol", &self.require_protocol)
            .field("custom_origin_check", &self.check_origin.is_some())
            .field("before_upgrade", &self.before_upgrade.is_some())
            .finish()
    }
}

impl Upgrader {
    /// Upgrader with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a custom origin policy
    pub fn with_check_origin(mut self, check: OriginCheck) -> Self {
        self.check_origin = Some(check);
        self
    }

    /// Allow exactly the given origins
    pub fn with_allowed_origins(self, origins: Vec<String>) -> Self {
        self.with_check_origin(check_origin_with_allowed_list(origins))
    }

    /// Install a pre-upgrade hook (telemetry counters, admission control)
    pub fn with_before_upgrade(mut self, hook: BeforeUpgrade) -> Self {
        self.before_upgrade = Some(hook);
        self
    }

    /// Negotiate the handshake.
    ///
    /// On success returns the `101` response to send and a future resolving
    /// to the connection once the protocol switch completes. The caller
    /// returns the response from its handler and typically spawns the
    /// future.
    pub fn upgrade<B>(
        &self,
        mut req: Request<B>,
    ) -> Result<(Response<()>, impl Future<Output = WsResult<ServerConn>> + use<B>), UpgradeError>
    where
        B: Send + 'static,
    {
        let headers = req.headers();

        if !header_contains_token(headers, header::UPGRADE, "websocket") {
            return Err(UpgradeError::BadRequest(
                "missing Upgrade: websocket".into(),
            ));
        }
        if !header_contains_token(headers, header::CONNECTION, "upgrade") {
            return Err(UpgradeError::BadRequest(
                "missing Connection: upgrade".into(),
            ));
        }
        match headers
            .get(header::SEC_WEBSOCKET_VERSION)
            .and_then(|v| v.to_str().ok())
        {
            Some("13") => {}
            _ => {
                return Err(UpgradeError::BadRequest(
                    "unsupported Sec-WebSocket-Version".into(),
                ));
            }
        }
        let key = headers
            .get(header::SEC_WEBSOCKET_KEY)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UpgradeError::BadRequest("missing Sec-WebSocket-Key".into()))?
            .to_string();

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let origin_ok = match &self.check_origin {
            Some(check) => check(headers, &host),
            None => default_check_origin(headers, &host),
        };
        if !origin_ok {
            debug!(host = %host, "websocket origin rejected");
            return Err(UpgradeError::OriginDenied);
        }

        if let Some(hook) = &self.before_upgrade {
            hook(headers).map_err(|(status, message)| UpgradeError::Rejected(status, message))?;
        }

        let negotiated_protocol = if self.require_protocol.is_empty() {
            None
        } else {
            let offered = headers
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let selected = offered
                .split(',')
                .map(str::trim)
                .find(|offer| self.require_protocol.iter().any(|p| p == offer))
                .map(str::to_string);
            match selected {
                Some(p) => Some(p),
                None => return Err(UpgradeError::ProtocolMismatch),
            }
        };

        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .header(header::SEC_WEBSOCKET_ACCEPT, accept_key(&key))
            .body(())
            .map_err(|e| UpgradeError::BadRequest(e.to_string()))?;
        if let Some(protocol) = &negotiated_protocol
            && let Ok(value) = HeaderValue::from_str(protocol)
        {
            response
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
        for (name, value) in &self.response_headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }

        let on_upgrade = hyper::upgrade::on(&mut req);
        let max_message_size = self.max_message_size;
        let read_deadline = self.read_deadline;
        let conn_future = async move {
            let upgraded = on_upgrade
                .await
                .map_err(|e| WsError::Protocol(format!("upgrade failed: {e}")))?;
            let conn = Conn::server(TokioIo::new(upgraded), max_message_size);
            conn.set_read_deadline(read_deadline);
            Ok(conn)
        };

        Ok((response, conn_future))
    }
}

/// Default same-origin policy: absent `Origin` rejects; present origins
/// must match the request host case-insensitively.
pub fn default_check_origin(headers: &HeaderMap, host: &str) -> bool {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let authority = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();
    !authority.is_empty() && authority.eq_ignore_ascii_case(host)
}

/// Origin policy permitting an exact-match override set
pub fn check_origin_with_allowed_list(origins: Vec<String>) -> OriginCheck {
    Arc::new(move |headers: &HeaderMap, _host: &str| {
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|origin| origins.iter().any(|o| o.eq_ignore_ascii_case(origin)))
    })
}

fn header_contains_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}
