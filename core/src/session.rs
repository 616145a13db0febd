//! Authenticated session and request executor.
//!
//! # Design
//! A `Session` is single-owner mutable state for one server: host, port,
//! response format, decoding mode, credentials, verbosity and the last
//! result. Every call goes through `execute`, which is split into two pure
//! halves, `build_request` and `parse_response`, around one
//! `Transport::send`. The executor never returns `Err`; failures of every
//! kind are encoded in the returned `ApiResult`.
//!
//! A session is not meant to be shared between threads without a lock.
//! Independent sessions can run concurrently.

use std::net::Ipv6Addr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::auth::{ApiToken, Ticket, CSRF_HEADER};
use crate::config::SessionConfig;
use crate::error::{Error, Result, TransportError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::params::Params;
use crate::result::{ApiResult, Body, Envelope};
use crate::transport::{UreqTransport, DEFAULT_TIMEOUT};
use crate::types::{Decoding, ResponseFormat, Verbosity};

pub const DEFAULT_PORT: u16 = 8006;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// Login answer fields masked in response logs.
const SECRET_FIELDS: [&str; 2] = ["ticket", CSRF_HEADER];

/// Builder for `Session`.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    hostname: String,
    port: u16,
    response_format: ResponseFormat,
    decoding: Decoding,
    verbosity: Verbosity,
    api_token: Option<String>,
    timeout: Duration,
    verify_tls: bool,
}

impl SessionBuilder {
    fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            response_format: ResponseFormat::default(),
            decoding: Decoding::default(),
            verbosity: Verbosity::default(),
            api_token: None,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: false,
        }
    }

    /// Start from a loaded `SessionConfig`.
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            hostname: config.hostname,
            port: config.port,
            response_format: config.response_format,
            decoding: config.decoding,
            verbosity: config.verbosity,
            api_token: config.api_token,
            timeout: Duration::from_secs(config.timeout_secs),
            verify_tls: config.verify_tls,
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    #[must_use]
    pub fn decoding(mut self, decoding: Decoding) -> Self {
        self.decoding = decoding;
        self
    }

    #[must_use]
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// `USER@REALM!TOKENID=UUID`; validated by `build`.
    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Per-request timeout of the default transport.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verify TLS certificates (off by default for self-signed hosts).
    #[must_use]
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Build a session over the default `ureq` transport.
    pub fn build(self) -> Result<Session<UreqTransport>> {
        let transport = UreqTransport::with_verification(self.timeout, self.verify_tls);
        self.build_with_transport(transport)
    }

    /// Build a session over a caller-supplied transport.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<Session<T>> {
        let hostname = self.hostname.trim();
        let hostname = hostname
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(hostname);
        if hostname.is_empty() {
            return Err(Error::config("hostname must not be empty"));
        }
        if hostname.contains('/') {
            return Err(Error::config(format!(
                "hostname must not contain a scheme or path: {hostname}"
            )));
        }
        if hostname.contains(':') && hostname.parse::<Ipv6Addr>().is_err() {
            return Err(Error::config(format!(
                "hostname must not contain a port: {hostname}"
            )));
        }
        if self.port == 0 {
            return Err(Error::config("port must not be 0"));
        }
        let api_token = self.api_token.as_deref().map(ApiToken::parse).transpose()?;

        Ok(Session {
            hostname: hostname.to_string(),
            port: self.port,
            response_format: self.response_format,
            decoding: self.decoding,
            verbosity: self.verbosity,
            ticket: None,
            api_token,
            last_result: None,
            transport,
        })
    }
}

/// Connection state for one Proxmox VE server.
#[derive(Debug)]
pub struct Session<T = UreqTransport> {
    hostname: String,
    port: u16,
    response_format: ResponseFormat,
    decoding: Decoding,
    verbosity: Verbosity,
    ticket: Option<Ticket>,
    api_token: Option<ApiToken>,
    last_result: Option<ApiResult>,
    transport: T,
}

impl Session {
    pub fn builder(hostname: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(hostname)
    }
}

impl<T: Transport> Session<T> {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `https://{hostname}:{port}/api2/{format}`; IPv6 literals are bracketed.
    pub fn base_url(&self) -> String {
        let (host, port, format) = (&self.hostname, self.port, self.response_format);
        if host.contains(':') {
            format!("https://[{host}]:{port}/api2/{format}")
        } else {
            format!("https://{host}:{port}/api2/{format}")
        }
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
    }

    pub fn set_response_format(&mut self, format: ResponseFormat) {
        self.response_format = format;
    }

    pub fn decoding(&self) -> Decoding {
        self.decoding
    }

    pub fn set_decoding(&mut self, decoding: Decoding) {
        self.decoding = decoding;
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn api_token(&self) -> Option<&ApiToken> {
        self.api_token.as_ref()
    }

    /// Replace or remove the API token. Nothing changes on parse failure.
    pub fn set_api_token(&mut self, token: Option<&str>) -> Result<()> {
        self.api_token = token.map(ApiToken::parse).transpose()?;
        Ok(())
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    pub(crate) fn set_ticket(&mut self, ticket: Ticket) {
        self.ticket = Some(ticket);
    }

    /// Forget the ticket and the API token.
    pub fn clear_credentials(&mut self) {
        self.ticket = None;
        self.api_token = None;
    }

    pub fn last_result(&self) -> Option<&ApiResult> {
        self.last_result.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Describe the wire call for `execute` without sending it.
    pub fn build_request(&self, path: &str, method: HttpMethod, params: &Params) -> HttpRequest {
        let mut url = self.base_url();
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);

        let encoded = params.encode();
        let mut request = HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: None,
        };
        if method.carries_body() {
            request
                .headers
                .push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
            request.body = Some(encoded);
        } else if method == HttpMethod::Get && !encoded.is_empty() {
            request.url.push('?');
            request.url.push_str(&encoded);
        }
        self.attach_credentials(&mut request);
        request
    }

    /// Turn a transport outcome into an `ApiResult` using the current
    /// response format and decoding mode.
    pub fn parse_response(&self, outcome: std::result::Result<HttpResponse, TransportError>) -> ApiResult {
        let response = match outcome {
            Ok(response) => response,
            Err(err) => return ApiResult::transport_failure(err.0, self.decoding),
        };
        let body = match self.response_format {
            ResponseFormat::Json => decode_json(&response.body, self.decoding),
            ResponseFormat::Png => Body::Image(format!(
                "{PNG_DATA_URI_PREFIX}{}",
                STANDARD.encode(&response.body)
            )),
        };
        ApiResult::new(response.status, "", body, self.decoding)
    }

    /// Perform one API call and remember its result.
    pub fn execute(&mut self, path: &str, method: HttpMethod, params: &Params) -> ApiResult {
        let request = self.build_request(path, method, params);

        if self.verbosity >= Verbosity::Requests {
            if method == HttpMethod::Get {
                tracing::info!(%method, url = %request.url, "dispatching request");
            } else {
                tracing::info!(
                    %method,
                    url = %request.url,
                    params = %params.redacted(),
                    "dispatching request"
                );
            }
        }
        if method == HttpMethod::Delete && !params.is_empty() {
            tracing::debug!(url = %request.url, "DELETE parameters are not sent");
        }

        let outcome = self.transport.send(&request);
        if let Err(err) = &outcome {
            tracing::warn!(%method, url = %request.url, error = %err, "transport failure");
        }
        let result = self.parse_response(outcome);

        if self.verbosity >= Verbosity::Responses {
            tracing::info!(
                status = result.status(),
                transport_error = result.transport_error(),
                has_errors = result.has_errors(),
                error_text = %result.error_text(),
                body = ?redacted_body(result.body()),
                "received response"
            );
        }

        self.last_result = Some(result.clone());
        result
    }

    /// `GET` a resource.
    pub fn get(&mut self, path: &str, params: &Params) -> ApiResult {
        self.execute(path, HttpMethod::Get, params)
    }

    /// `PUT` (update) a resource.
    pub fn set(&mut self, path: &str, params: &Params) -> ApiResult {
        self.execute(path, HttpMethod::Put, params)
    }

    /// `POST` (create) a resource.
    pub fn create(&mut self, path: &str, params: &Params) -> ApiResult {
        self.execute(path, HttpMethod::Post, params)
    }

    /// `DELETE` a resource.
    pub fn delete(&mut self, path: &str, params: &Params) -> ApiResult {
        self.execute(path, HttpMethod::Delete, params)
    }
}

/// Copy of `body` for logs with login secrets masked.
fn redacted_body(body: &Body) -> Body {
    let mut body = body.clone();
    let data = match &mut body {
        Body::Structured(envelope) => Some(&mut envelope.data),
        Body::Mapping(value) => value.get_mut("data"),
        Body::Image(_) | Body::Empty => None,
    };
    if let Some(Value::Object(fields)) = data {
        for key in SECRET_FIELDS {
            if let Some(value) = fields.get_mut(key) {
                *value = Value::String("***".to_string());
            }
        }
    }
    body
}

fn decode_json(bytes: &[u8], decoding: Decoding) -> Body {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return Body::Empty;
    };
    match decoding {
        Decoding::Mapping => Body::Mapping(value),
        Decoding::Structured => match serde_json::from_value::<Envelope>(value.clone()) {
            Ok(envelope) => Body::Structured(envelope),
            Err(_) => Body::Mapping(value),
        },
    }
}
