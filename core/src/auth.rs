//! Credentials and the ticket login flow.
//!
//! Two mechanisms exist. A ticket (session cookie plus CSRF token) is
//! obtained from `POST /access/ticket`; an API token is configured up front
//! and never expires with the session. When both are present the API token
//! is used and the ticket is not sent.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::http::{HttpRequest, Transport};
use crate::params::Params;
use crate::session::Session;
use crate::types::{AuthMode, Decoding};

pub const DEFAULT_REALM: &str = "pam";

pub(crate) const TICKET_PATH: &str = "/access/ticket";
pub(crate) const COOKIE_NAME: &str = "PVEAuthCookie";
pub(crate) const CSRF_HEADER: &str = "CSRFPreventionToken";
const TOKEN_SCHEME: &str = "PVEAPIToken";

/// Ticket credentials returned by a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct Ticket {
    pub csrf_token: String,
    pub cookie: String,
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("csrf_token", &"***")
            .field("cookie", &"***")
            .finish()
    }
}

/// Static credential of the form `USER@REALM!TOKENID=UUID`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken {
    token_id: String,
    secret: String,
}

impl ApiToken {
    pub fn parse(token: &str) -> Result<Self> {
        let (token_id, secret) = token.split_once('=').unwrap_or((token, ""));
        let invalid = || Error::InvalidApiToken {
            token_id: token_id.to_string(),
        };

        let (user_realm, name) = token_id.split_once('!').ok_or_else(invalid)?;
        let (user, realm) = user_realm.split_once('@').ok_or_else(invalid)?;
        if user.is_empty() || realm.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Uuid::parse_str(secret).map_err(|_| invalid())?;

        Ok(Self {
            token_id: token_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// `USER@REALM!TOKENID`, safe to log.
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub(crate) fn header_value(&self) -> String {
        format!("{TOKEN_SCHEME} {}={}", self.token_id, self.secret)
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("token_id", &self.token_id)
            .field("secret", &"***")
            .finish()
    }
}

/// Split `user@realm` into its parts; a bare user keeps `default_realm`.
pub fn split_username<'a>(username: &'a str, default_realm: &'a str) -> (&'a str, &'a str) {
    username.split_once('@').unwrap_or((username, default_realm))
}

/// Credential headers for a request, applying token-over-ticket precedence.
pub(crate) fn credential_headers(
    api_token: Option<&ApiToken>,
    ticket: Option<&Ticket>,
) -> Vec<(String, String)> {
    if let Some(token) = api_token {
        return vec![("Authorization".to_string(), token.header_value())];
    }
    match ticket {
        Some(ticket) => vec![
            (
                "Cookie".to_string(),
                format!("{COOKIE_NAME}={}", ticket.cookie),
            ),
            (CSRF_HEADER.to_string(), ticket.csrf_token.clone()),
        ],
        None => Vec::new(),
    }
}

impl<T: Transport> Session<T> {
    /// Log in against the `pam` realm unless `username` names a realm.
    pub fn login(&mut self, username: &str, password: &str) -> bool {
        self.login_with_realm(username, password, DEFAULT_REALM)
    }

    /// Exchange username and password for a ticket.
    ///
    /// A realm embedded in `username` (`user@pve`) overrides `realm`.
    /// Returns false on any non-200 answer and leaves existing credentials
    /// untouched.
    pub fn login_with_realm(&mut self, username: &str, password: &str, realm: &str) -> bool {
        let (user, realm) = split_username(username, realm);
        let params = Params::new()
            .with("username", user)
            .with("password", password)
            .with("realm", realm);

        let previous = self.decoding();
        self.set_decoding(Decoding::Structured);
        let result = self.create(TICKET_PATH, &params);
        self.set_decoding(previous);

        if !result.is_success() {
            tracing::debug!(user, realm, status = result.status(), "login rejected");
            return false;
        }

        let data = result.data();
        let csrf_token = data.get("CSRFPreventionToken").and_then(|v| v.as_str());
        let cookie = data.get("ticket").and_then(|v| v.as_str());
        match (csrf_token, cookie) {
            (Some(csrf_token), Some(cookie)) => {
                self.set_ticket(Ticket {
                    csrf_token: csrf_token.to_string(),
                    cookie: cookie.to_string(),
                });
                tracing::debug!(user, realm, "login succeeded");
                true
            }
            _ => {
                tracing::debug!(user, realm, "login response is missing ticket fields");
                false
            }
        }
    }

    /// Which credential the next request will carry.
    pub fn auth_mode(&self) -> AuthMode {
        if self.api_token().is_some() {
            AuthMode::ApiToken
        } else if self.ticket().is_some() {
            AuthMode::Ticket
        } else {
            AuthMode::Anonymous
        }
    }

    pub(crate) fn attach_credentials(&self, request: &mut HttpRequest) {
        request
            .headers
            .extend(credential_headers(self.api_token(), self.ticket()));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::fake::FakeTransport;
    use crate::http::HttpMethod;

    const SECRET: &str = "5a2c8f4e-1b7d-4c3a-9e6f-0d8b2a4c6e10";

    fn session(transport: FakeTransport) -> Session<FakeTransport> {
        Session::builder("pve.local")
            .build_with_transport(transport)
            .unwrap()
    }

    fn ticket_reply() -> String {
        json!({
            "data": {
                "CSRFPreventionToken": "csrf-1",
                "ticket": "PVE:root@pam:TICKET",
                "username": "root@pam"
            }
        })
        .to_string()
    }

    #[test]
    fn parses_well_formed_token() {
        let token = ApiToken::parse(&format!("root@pam!ci={SECRET}")).unwrap();
        assert_eq!(token.token_id(), "root@pam!ci");
        assert_eq!(
            token.header_value(),
            format!("PVEAPIToken root@pam!ci={SECRET}")
        );
    }

    #[test]
    fn rejects_malformed_tokens_without_leaking_secret() {
        for bad in [
            format!("root@pam={SECRET}"),
            format!("root!ci={SECRET}"),
            "root@pam!ci=not-a-uuid".to_string(),
            "root@pam!ci".to_string(),
            format!("@pam!ci={SECRET}"),
        ] {
            let err = ApiToken::parse(&bad).unwrap_err();
            assert!(matches!(err, Error::InvalidApiToken { .. }), "{bad}");
            assert!(!err.to_string().contains(SECRET), "{bad}");
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let token = ApiToken::parse(&format!("root@pam!ci={SECRET}")).unwrap();
        assert!(!format!("{token:?}").contains(SECRET));
        let ticket = Ticket {
            csrf_token: "csrf-secret".to_string(),
            cookie: "ticket-secret".to_string(),
        };
        assert!(!format!("{ticket:?}").contains("secret"));
    }

    #[test]
    fn username_realm_overrides_argument() {
        assert_eq!(split_username("user@pve", "pam"), ("user", "pve"));
        assert_eq!(split_username("root", "pam"), ("root", "pam"));
    }

    #[test]
    fn login_posts_credentials_and_stores_ticket() {
        let mut session = session(FakeTransport::new().reply(200, &ticket_reply()));

        assert!(session.login("user@pve", "s3cret"));

        let req = &session.transport().requests[0];
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://pve.local:8006/api2/json/access/ticket");
        assert_eq!(
            req.body.as_deref(),
            Some("username=user&password=s3cret&realm=pve")
        );
        let ticket = session.ticket().unwrap();
        assert_eq!(ticket.csrf_token, "csrf-1");
        assert_eq!(ticket.cookie, "PVE:root@pam:TICKET");
        assert_eq!(session.auth_mode(), AuthMode::Ticket);
    }

    #[test]
    fn login_uses_explicit_realm_for_bare_user() {
        let mut session = session(FakeTransport::new().reply(200, &ticket_reply()));
        assert!(session.login_with_realm("admin", "pw", "pve"));
        let body = session.transport().requests[0].body.clone().unwrap();
        assert!(body.ends_with("realm=pve"));
    }

    #[test]
    fn failed_login_keeps_previous_ticket() {
        let mut session = session(
            FakeTransport::new()
                .reply(200, &ticket_reply())
                .reply(401, r#"{"data":null,"message":"authentication failure\n"}"#),
        );
        assert!(session.login("root", "right"));
        assert!(!session.login("root", "wrong"));
        assert_eq!(session.ticket().unwrap().csrf_token, "csrf-1");
        assert_eq!(session.last_result().unwrap().status(), 401);
    }

    #[test]
    fn login_restores_decoding_mode() {
        let mut session = session(FakeTransport::new().reply(200, &ticket_reply()));
        assert_eq!(session.decoding(), Decoding::Mapping);
        assert!(session.login("root", "pw"));
        assert_eq!(session.decoding(), Decoding::Mapping);
        assert_eq!(
            session.last_result().unwrap().decoding(),
            Decoding::Structured
        );
    }

    #[test]
    fn login_without_ticket_fields_fails() {
        let mut session = session(FakeTransport::new().reply(200, r#"{"data":{}}"#));
        assert!(!session.login("root", "pw"));
        assert!(session.ticket().is_none());
        assert_eq!(session.auth_mode(), AuthMode::Anonymous);
    }

    #[test]
    fn token_wins_over_ticket() {
        let mut session = session(
            FakeTransport::new()
                .reply(200, &ticket_reply())
                .reply(200, r#"{"data":{}}"#),
        );
        assert!(session.login("root", "pw"));
        session
            .set_api_token(Some(format!("root@pam!ci={SECRET}").as_str()))
            .unwrap();
        assert_eq!(session.auth_mode(), AuthMode::ApiToken);

        session.get("/version", &Params::new());

        let req = &session.transport().requests[1];
        assert_eq!(
            req.header("Authorization"),
            Some(format!("PVEAPIToken root@pam!ci={SECRET}").as_str())
        );
        assert_eq!(req.header("Cookie"), None);
        assert_eq!(req.header(CSRF_HEADER), None);
    }

    #[test]
    fn ticket_headers_are_sent_without_token() {
        let mut session = session(
            FakeTransport::new()
                .reply(200, &ticket_reply())
                .reply(200, r#"{"data":{}}"#),
        );
        assert!(session.login("root", "pw"));
        session.get("/nodes", &Params::new());

        let req = &session.transport().requests[1];
        assert_eq!(req.header("Cookie"), Some("PVEAuthCookie=PVE:root@pam:TICKET"));
        assert_eq!(req.header("CSRFPreventionToken"), Some("csrf-1"));
        assert_eq!(req.header("Authorization"), None);
    }
}
