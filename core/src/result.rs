//! Uniform envelope around one completed API call.
//!
//! # Design
//! Transport status and API-reported errors are two independent axes: a
//! call can return HTTP 200 and still carry an `errors` member, and a
//! transport failure leaves the status at 0 with a non-empty
//! `transport_error`. Callers inspect both through `ApiResult`.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::Decoding;

static NULL: Value = Value::Null;

/// Typed schema of a JSON API response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// JSON decoded into the typed `Envelope`.
    Structured(Envelope),
    /// JSON kept as a generic value.
    Mapping(Value),
    /// Binary payload re-encoded as a `data:image/png;base64,` URI.
    Image(String),
    /// No body, or a body that was not valid JSON.
    Empty,
}

/// Outcome of one request. Built once by the executor and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    status: u16,
    transport_error: String,
    body: Body,
    decoding: Decoding,
}

impl ApiResult {
    pub fn new(
        status: u16,
        transport_error: impl Into<String>,
        body: Body,
        decoding: Decoding,
    ) -> Self {
        Self {
            status,
            transport_error: transport_error.into(),
            body,
            decoding,
        }
    }

    /// Envelope for a call that never produced an HTTP response.
    pub fn transport_failure(message: impl Into<String>, decoding: Decoding) -> Self {
        Self::new(0, message, Body::Empty, decoding)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Empty unless the transport failed.
    pub fn transport_error(&self) -> &str {
        &self.transport_error
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn decoding(&self) -> Decoding {
        self.decoding
    }

    /// True only for status 200; other 2xx codes do not count.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn has_errors(&self) -> bool {
        self.errors().is_some()
    }

    /// `key : value` lines from the `errors` member, in server order.
    pub fn error_text(&self) -> String {
        let Some(errors) = self.errors() else {
            return String::new();
        };
        errors
            .into_iter()
            .map(|(key, value)| format!("{key} : {}", value_text(value)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The `data` member, or null when absent.
    pub fn data(&self) -> &Value {
        match &self.body {
            Body::Structured(envelope) => &envelope.data,
            Body::Mapping(value) => value.get("data").unwrap_or(&NULL),
            Body::Image(_) | Body::Empty => &NULL,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.body {
            Body::Structured(envelope) => envelope.message.as_deref(),
            Body::Mapping(value) => value.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    /// The data URI of an image response.
    pub fn image(&self) -> Option<&str> {
        match &self.body {
            Body::Image(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.data()).map_err(|e| Error::Decode {
            message: e.to_string(),
        })
    }

    /// `Err` unless the call succeeded without API-reported errors.
    pub fn error_for_status(&self) -> Result<&Self> {
        if !self.transport_error.is_empty() {
            return Err(Error::Http {
                status: self.status,
                message: self.transport_error.clone(),
            });
        }
        if !self.is_success() || self.has_errors() {
            let message = if self.has_errors() {
                self.error_text()
            } else {
                self.message().unwrap_or_default().trim_end().to_string()
            };
            return Err(Error::Http {
                status: self.status,
                message,
            });
        }
        Ok(self)
    }

    pub fn into_data_as<T: DeserializeOwned>(self) -> Result<T> {
        self.error_for_status()?.data_as()
    }

    /// Entries of a non-null `errors` member. The typed envelope exposes it
    /// as an optional field; a generic body is searched by key.
    fn errors(&self) -> Option<Vec<(&str, &Value)>> {
        match &self.body {
            Body::Structured(envelope) => envelope
                .errors
                .as_ref()
                .map(|errors| errors.iter().map(|(k, v)| (k.as_str(), v)).collect()),
            Body::Mapping(value) => match value.get("errors") {
                Some(Value::Object(map)) => {
                    Some(map.iter().map(|(k, v)| (k.as_str(), v)).collect())
                }
                Some(Value::Null) | None => None,
                Some(other) => Some(vec![("errors", other)]),
            },
            Body::Image(_) | Body::Empty => None,
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn mapping(status: u16, body: Value) -> ApiResult {
        ApiResult::new(status, "", Body::Mapping(body), Decoding::Mapping)
    }

    fn structured(status: u16, body: Value) -> ApiResult {
        let envelope: Envelope = serde_json::from_value(body).unwrap();
        ApiResult::new(status, "", Body::Structured(envelope), Decoding::Structured)
    }

    #[test]
    fn success_means_exactly_200() {
        assert!(mapping(200, json!({})).is_success());
        assert!(!mapping(199, json!({})).is_success());
        assert!(!mapping(201, json!({})).is_success());
        assert!(!mapping(204, json!({})).is_success());
    }

    #[test]
    fn error_text_keeps_insertion_order_in_both_modes() {
        let body = json!({"errors": {"field1": "bad", "field2": "missing"}, "data": null});
        for result in [mapping(400, body.clone()), structured(400, body)] {
            assert!(result.has_errors());
            assert_eq!(result.error_text(), "field1 : bad\nfield2 : missing");
        }
    }

    #[test]
    fn null_errors_member_is_not_an_error() {
        let body = json!({"data": {"ok": 1}, "errors": null});
        assert!(!mapping(200, body.clone()).has_errors());
        assert!(!structured(200, body).has_errors());
        assert_eq!(mapping(200, json!({"data": 1})).error_text(), "");
    }

    #[test]
    fn non_string_error_values_render_as_json() {
        let result = mapping(400, json!({"errors": {"vmid": 100}}));
        assert_eq!(result.error_text(), "vmid : 100");
    }

    #[test]
    fn transport_failure_has_zero_status_and_text() {
        let result = ApiResult::transport_failure("dns error", Decoding::Mapping);
        assert_eq!(result.status(), 0);
        assert_eq!(result.transport_error(), "dns error");
        assert!(!result.is_success());
        assert!(!result.has_errors());
        assert_eq!(result.data(), &Value::Null);
    }

    #[test]
    fn data_is_read_from_either_shape() {
        let body = json!({"data": {"version": "8.2.4"}});
        assert_eq!(mapping(200, body.clone()).data()["version"], "8.2.4");
        assert_eq!(structured(200, body).data()["version"], "8.2.4");
    }

    #[test]
    fn data_as_decodes_typed_values() {
        #[derive(Debug, Deserialize)]
        struct Version {
            release: String,
        }
        let result = mapping(200, json!({"data": {"release": "8.2"}}));
        let version: Version = result.data_as().unwrap();
        assert_eq!(version.release, "8.2");

        let err = mapping(200, json!({"data": 3})).data_as::<Version>().unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn error_for_status_reports_api_errors() {
        let result = mapping(200, json!({"errors": {"name": "invalid"}}));
        let err = result.error_for_status().unwrap_err();
        assert!(matches!(err, Error::Http { status: 200, ref message } if message == "name : invalid"));

        let denied = mapping(401, json!({"message": "authentication failure\n"}));
        let err = denied.into_data_as::<Value>().unwrap_err();
        assert!(matches!(err, Error::Http { status: 401, ref message } if message == "authentication failure"));
    }

    #[test]
    fn image_body_exposes_data_uri() {
        let result = ApiResult::new(
            200,
            "",
            Body::Image("data:image/png;base64,AAAA".to_string()),
            Decoding::Mapping,
        );
        assert_eq!(result.image(), Some("data:image/png;base64,AAAA"));
        assert_eq!(result.data(), &Value::Null);
    }
}
