//! Blocking HTTPS transport backed by `ureq`.
//!
//! # Trust model
//! Hypervisor endpoints are usually reached by IP or an internal name and
//! present a self-signed certificate, so `UreqTransport::new` does not
//! verify certificates or hostnames. This is an explicit trust decision:
//! use `UreqTransport::verified` (or `SessionBuilder::verify_tls(true)`) to
//! turn verification on.

use std::fmt;
use std::time::Duration;

use ureq::tls::TlsConfig;
use ureq::{Agent, RequestBuilder};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are read whole, whatever their size.
const BODY_LIMIT: u64 = u64::MAX;

/// `Transport` implementation over a single `ureq::Agent`.
///
/// Headers (including the form content type) are taken from the request
/// as-is.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    /// Transport with certificate verification disabled.
    pub fn new(timeout: Duration) -> Self {
        Self::with_verification(timeout, false)
    }

    /// Transport that verifies certificates against the system roots.
    pub fn verified(timeout: Duration) -> Self {
        Self::with_verification(timeout, true)
    }

    pub(crate) fn with_verification(timeout: Duration, verify: bool) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .tls_config(TlsConfig::builder().disable_verification(!verify).build())
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let body = request.body.as_deref().unwrap_or("");

        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), request).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), request).call(),
            HttpMethod::Post => with_headers(self.agent.post(url), request).send(body.as_bytes()),
            HttpMethod::Put => with_headers(self.agent.put(url), request).send(body.as_bytes()),
        };

        let mut response = result.map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (key.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(BODY_LIMIT)
            .read_to_vec()
            .map_err(|e| TransportError::new(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Serve one plain HTTP response with `body` on a random local port.
    fn serve_once(body: Vec<u8>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
        });
        addr
    }

    #[test]
    fn large_body_is_read_in_full() {
        let payload = "x".repeat(11 * 1024 * 1024);
        let body = format!(r#"{{"data":"{payload}"}}"#).into_bytes();
        let expected_len = body.len();
        let addr = serve_once(body);

        let mut transport = UreqTransport::new(Duration::from_secs(30));
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://{addr}/api2/json/cluster/resources"),
            headers: Vec::new(),
            body: None,
        };
        let response = transport.send(&request).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), expected_len);
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = UreqTransport::new(Duration::from_secs(2));
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://{addr}/api2/json/version"),
            headers: Vec::new(),
            body: None,
        };
        let err = transport.send(&request).unwrap_err();
        assert!(!err.0.is_empty());
    }
}
