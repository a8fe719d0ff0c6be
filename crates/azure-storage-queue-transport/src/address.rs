//! Queue address parsing.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use url::Url;

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;

/// URI scheme identifying this transport.
pub const SCHEME: &str = "azuresq";

/// Immutable address of one backend queue, parsed from a transport URI of the
/// form `azuresq://{configuration-name}/{queue-name}[?maxMessages=N]`.
///
/// The configuration name selects the registered connection credentials; the
/// queue name selects the queue within that storage account. An out-of-range
/// `maxMessages` is clamped into `[1, 32]` rather than rejected, because host
/// configurations rely on the clamp. Unrecognized query parameters are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAddress {
    uri: String,
    configuration_name: String,
    queue_name: String,
    max_messages: Option<u32>,
}

impl QueueAddress {
    /// Parse a transport URI into a queue address
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let malformed = |message: String| TransportError::MalformedAddress {
            uri: uri.to_string(),
            message,
        };

        let parsed = Url::parse(uri).map_err(|err| malformed(err.to_string()))?;

        if !parsed.scheme().eq_ignore_ascii_case(SCHEME) {
            return Err(malformed(format!(
                "expected scheme '{}', found '{}'",
                SCHEME,
                parsed.scheme()
            )));
        }

        let configuration_name = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| malformed("missing configuration name".to_string()))?
            .to_string();

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        if segments.len() != 1 {
            return Err(malformed(format!(
                "path must contain exactly one queue name segment, as in '{}://{{configuration-name}}/{{queue-name}}'",
                SCHEME
            )));
        }

        let queue_name = segments[0].to_string();

        let mut max_messages = None;

        for (key, value) in parsed.query_pairs() {
            if key == "maxMessages" {
                let requested: u32 = value.parse().map_err(|_| {
                    malformed(format!(
                        "maxMessages must be a non-negative integer, found '{}'",
                        value
                    ))
                })?;

                max_messages = Some(requested.clamp(1, 32));
            }
        }

        Ok(Self {
            uri: uri.to_string(),
            configuration_name,
            queue_name,
            max_messages,
        })
    }

    /// Get the configuration name used to resolve backend credentials
    pub fn configuration_name(&self) -> &str {
        &self.configuration_name
    }

    /// Get the bare queue name
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Per-address batch size override, already clamped into `[1, 32]`
    pub fn max_messages(&self) -> Option<u32> {
        self.max_messages
    }

    /// Get the original transport URI
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}
