//! Small value types shared by the session, the executor and the envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Response format segment of the API URL (`/api2/{format}/...`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    /// Raw PNG, used by rrd graph exports.
    Png,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Png => "png",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a JSON body is represented in the `ApiResult`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoding {
    /// Typed `Envelope` with an optional `errors` field.
    Structured,
    /// Generic `serde_json::Value`.
    #[default]
    Mapping,
}

/// Debug output level of a session.
///
/// Observability only: the level never changes what is sent or returned.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Verbosity {
    #[default]
    Silent = 0,
    /// Log method, URL and parameters before dispatch.
    Requests = 1,
    /// Also log the decoded result after dispatch.
    Responses = 2,
}

impl TryFrom<u8> for Verbosity {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Verbosity::Silent),
            1 => Ok(Verbosity::Requests),
            2 => Ok(Verbosity::Responses),
            other => Err(Error::config(format!(
                "verbosity must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<Verbosity> for u8 {
    fn from(level: Verbosity) -> u8 {
        level as u8
    }
}

/// Credential mechanism a request would use right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    ApiToken,
    Ticket,
    Anonymous,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_accepts_only_known_levels() {
        assert_eq!(Verbosity::try_from(0).unwrap(), Verbosity::Silent);
        assert_eq!(Verbosity::try_from(2).unwrap(), Verbosity::Responses);
        assert!(matches!(
            Verbosity::try_from(3),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(Verbosity::Responses >= Verbosity::Requests);
    }

    #[test]
    fn verbosity_deserializes_from_number() {
        let level: Verbosity = serde_json::from_str("1").unwrap();
        assert_eq!(level, Verbosity::Requests);
        assert!(serde_json::from_str::<Verbosity>("7").is_err());
    }

    #[test]
    fn response_format_serde_uses_url_segment() {
        assert_eq!(serde_json::to_string(&ResponseFormat::Png).unwrap(), "\"png\"");
        let format: ResponseFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, ResponseFormat::Json);
        assert_eq!(ResponseFormat::Png.to_string(), "png");
    }
}
