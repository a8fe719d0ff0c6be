//! Azure Storage Queue backend implementation using the HTTP REST API.
//!
//! Direct REST calls instead of the Azure SDK: requests are signed manually
//! with Shared Key Lite (HMAC-SHA256 over the canonicalized request) and XML
//! responses are parsed with quick-xml. Identity-based configurations send a
//! bearer token instead of a Shared Key signature; the token is supplied
//! through [`BackendOptions`] by the configuration's configure hook.
//!
//! Every operation is a single attempt. Retry policy belongs to the caller.

use crate::backend::{BackendError, MessageTtl, QueueBackend, RawMessage};
use crate::config::{BackendOptions, ConnectionConfig};
use crate::error::{ConfigurationError, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method, StatusCode};
use sha2::Sha256;
use std::fmt;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// Queue service REST API version sent with every request
const API_VERSION: &str = "2021-12-02";

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Credentials
// ============================================================================

/// Parsed storage connection string
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedConnectionString {
    account: String,
    /// Base64-decoded account key
    key: Vec<u8>,
    /// Explicit queue endpoint, e.g. for an emulator
    queue_endpoint: Option<String>,
}

/// Parse `AccountName=...;AccountKey=...;[QueueEndpoint=...]` pairs.
///
/// Unknown pairs (protocol, other service endpoints) are ignored.
fn parse_connection_string(
    name: &str,
    connection_string: &str,
) -> Result<ParsedConnectionString, TransportError> {
    let invalid = |message: String| {
        TransportError::Configuration(ConfigurationError::Invalid {
            name: name.to_string(),
            message,
        })
    };

    let mut account = None;
    let mut key = None;
    let mut queue_endpoint = None;

    for pair in connection_string.split(';') {
        let pair = pair.trim();

        if pair.is_empty() {
            continue;
        }

        let Some((field, value)) = pair.split_once('=') else {
            return Err(invalid(format!(
                "connection string segment '{}' is not a key=value pair",
                pair
            )));
        };

        match field {
            "AccountName" => account = Some(value.to_string()),
            "AccountKey" => key = Some(value.to_string()),
            "QueueEndpoint" => queue_endpoint = Some(value.trim_end_matches('/').to_string()),
            _ => {}
        }
    }

    let account =
        account.ok_or_else(|| invalid("connection string is missing AccountName".to_string()))?;
    let key = key.ok_or_else(|| invalid("connection string is missing AccountKey".to_string()))?;

    let key = STANDARD
        .decode(key.as_bytes())
        .map_err(|err| invalid(format!("AccountKey is not valid base64: {}", err)))?;

    Ok(ParsedConnectionString {
        account,
        key,
        queue_endpoint,
    })
}

/// Credential attached to every backend request
enum AzureCredential {
    SharedKey(SharedKeyLiteSigner),
    Bearer { token: String },
}

/// Shared Key Lite signer for the queue service.
///
/// StringToSign is `VERB \n Content-MD5 \n Content-Type \n Date \n
/// CanonicalizedHeaders CanonicalizedResource`, with the date carried in the
/// `x-ms-date` header and only the `comp` query parameter contributing to the
/// canonicalized resource.
#[derive(Clone)]
struct SharedKeyLiteSigner {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyLiteSigner {
    fn new(account: String, key: Vec<u8>) -> Self {
        Self { account, key }
    }

    fn authorization(
        &self,
        method: &Method,
        content_type: &str,
        date: &str,
        path: &str,
        comp: Option<&str>,
    ) -> String {
        let canonicalized_headers =
            format!("x-ms-date:{}\nx-ms-version:{}\n", date, API_VERSION);

        let canonicalized_resource = match comp {
            Some(comp) => format!("/{}{}?comp={}", self.account, path, comp),
            None => format!("/{}{}", self.account, path),
        };

        let string_to_sign = format!(
            "{}\n\n{}\n\n{}{}",
            method.as_str(),
            content_type,
            canonicalized_headers,
            canonicalized_resource
        );

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        format!("SharedKeyLite {}:{}", self.account, signature)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Azure Storage Queue implementation of [`QueueBackend`], bound to one queue
pub struct AzureStorageQueueBackend {
    http: HttpClient,
    credential: AzureCredential,
    endpoint: String,
    queue_name: String,
}

impl AzureStorageQueueBackend {
    /// Build a backend client for one queue from a registered configuration.
    ///
    /// The configure hook has already run against `options` by the time this
    /// is called. Connection-string configurations sign with Shared Key Lite;
    /// storage-account configurations require a bearer token in `options`.
    pub fn from_config(
        config: &ConnectionConfig,
        queue_name: &str,
        options: &BackendOptions,
    ) -> Result<Self, TransportError> {
        let (credential, default_endpoint) = if let Some(connection_string) =
            config.connection_string()
        {
            let parsed = parse_connection_string(config.name(), connection_string)?;
            let endpoint = parsed
                .queue_endpoint
                .clone()
                .unwrap_or_else(|| default_queue_endpoint(&parsed.account));

            (
                AzureCredential::SharedKey(SharedKeyLiteSigner::new(parsed.account, parsed.key)),
                endpoint,
            )
        } else {
            let account = config.storage_account().unwrap_or_default();

            let token = options.bearer_token.clone().ok_or_else(|| {
                TransportError::Configuration(ConfigurationError::Invalid {
                    name: config.name().to_string(),
                    message:
                        "storage-account credentials need a bearer token supplied via the configure hook"
                            .to_string(),
                })
            })?;

            (
                AzureCredential::Bearer { token },
                default_queue_endpoint(account),
            )
        };

        let endpoint = options
            .endpoint
            .clone()
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .unwrap_or(default_endpoint);

        let http = HttpClient::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| TransportError::Configuration(ConfigurationError::Invalid {
                name: config.name().to_string(),
                message: format!("failed to create HTTP client: {}", err),
            }))?;

        Ok(Self {
            http,
            credential,
            endpoint,
            queue_name: queue_name.to_string(),
        })
    }

    /// Issue one signed request against the queue service
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> Result<reqwest::Response, BackendError> {
        let mut url = format!("{}{}", self.endpoint, path);

        if !query.is_empty() {
            let query_string = query
                .iter()
                .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{}?{}", url, query_string);
        }

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let content_type = if body.is_some() { "application/xml" } else { "" };
        let comp = query
            .iter()
            .find(|(key, _)| *key == "comp")
            .map(|(_, value)| value.as_str());

        let authorization = match &self.credential {
            AzureCredential::SharedKey(signer) => {
                signer.authorization(&method, content_type, &date, path, comp)
            }
            AzureCredential::Bearer { token } => format!("Bearer {}", token),
        };

        let mut request = self
            .http
            .request(method, &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("Authorization", authorization);

        if let Some(body) = body {
            request = request.header("Content-Type", "application/xml").body(body);
        }

        request.send().await.map_err(|err| {
            if err.is_timeout() {
                BackendError::Network {
                    message: format!("request timeout: {}", err),
                }
            } else if err.is_connect() {
                BackendError::Network {
                    message: format!("connection failed: {}", err),
                }
            } else {
                BackendError::Network {
                    message: format!("HTTP request failed: {}", err),
                }
            }
        })
    }

    /// Read the response body and classify a non-success status
    async fn into_error(&self, response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return BackendError::Network {
                    message: format!("failed to read response body: {}", err),
                }
            }
        };

        parse_error_body(status, &body, &self.queue_name)
    }

    fn queue_path(&self) -> String {
        format!("/{}", self.queue_name)
    }

    fn messages_path(&self) -> String {
        format!("/{}/messages", self.queue_name)
    }
}

fn default_queue_endpoint(account: &str) -> String {
    format!("https://{}.queue.core.windows.net", account)
}

impl fmt::Debug for AzureStorageQueueBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStorageQueueBackend")
            .field("endpoint", &self.endpoint)
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

#[async_trait]
impl QueueBackend for AzureStorageQueueBackend {
    async fn create_if_not_exists(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::PUT, &self.queue_path(), &[], None)
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            // 409: the queue already exists, which is the desired end state
            StatusCode::CONFLICT => Ok(()),
            _ => Err(self.into_error(response).await),
        }
    }

    async fn delete_if_exists(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, &self.queue_path(), &[], None)
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.into_error(response).await),
        }
    }

    async fn clear_messages(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, &self.messages_path(), &[], None)
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            _ => Err(self.into_error(response).await),
        }
    }

    async fn approximate_message_count(&self) -> Result<u64, BackendError> {
        let query = [("comp", "metadata".to_string())];

        let response = self
            .request(Method::GET, &self.queue_path(), &query, None)
            .await?;

        if !response.status().is_success() {
            return Err(self.into_error(response).await);
        }

        let count = response
            .headers()
            .get("x-ms-approximate-messages-count")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| BackendError::MalformedResponse {
                message: "missing or unparseable x-ms-approximate-messages-count header"
                    .to_string(),
            })?;

        Ok(count)
    }

    async fn send_message(
        &self,
        message_text: &str,
        time_to_live: MessageTtl,
    ) -> Result<(), BackendError> {
        let mut query: Vec<(&str, String)> = Vec::new();

        if time_to_live == MessageTtl::Infinite {
            query.push(("messagettl", "-1".to_string()));
        }

        // Message text is base64, which contains no XML-significant characters
        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            message_text
        );

        let response = self
            .request(Method::POST, &self.messages_path(), &query, Some(body))
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            _ => Err(self.into_error(response).await),
        }
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, BackendError> {
        let mut query: Vec<(&str, String)> =
            vec![("numofmessages", max_messages.to_string())];

        if let Some(visibility) = visibility_timeout {
            query.push(("visibilitytimeout", visibility.num_seconds().to_string()));
        }

        let response = self
            .request(Method::GET, &self.messages_path(), &query, None)
            .await?;

        if !response.status().is_success() {
            return Err(self.into_error(response).await);
        }

        let body = response.text().await.map_err(|err| BackendError::Network {
            message: format!("failed to read response body: {}", err),
        })?;

        parse_message_list(&body)
    }

    async fn delete_message(
        &self,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), BackendError> {
        let path = format!("{}/{}", self.messages_path(), message_id);
        let query = [("popreceipt", pop_receipt.to_string())];

        let response = self.request(Method::DELETE, &path, &query, None).await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(BackendError::MessageNotFound {
                message_id: message_id.to_string(),
            }),
            _ => Err(self.into_error(response).await),
        }
    }
}

// ============================================================================
// XML parsing
// ============================================================================

/// Parse a `<QueueMessagesList>` response into raw message records
fn parse_message_list(xml: &str) -> Result<Vec<RawMessage>, BackendError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut in_message = false;
    let mut in_message_id = false;
    let mut in_pop_receipt = false;
    let mut in_message_text = false;
    let mut current_message_id: Option<String> = None;
    let mut current_pop_receipt: Option<String> = None;
    let mut current_message_text: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"QueueMessage" => {
                    in_message = true;
                    current_message_id = None;
                    current_pop_receipt = None;
                    current_message_text = None;
                }
                b"MessageId" if in_message => in_message_id = true,
                b"PopReceipt" if in_message => in_pop_receipt = true,
                b"MessageText" if in_message => in_message_text = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().ok().map(|s| s.into_owned());

                if in_message_id {
                    current_message_id = text;
                    in_message_id = false;
                } else if in_pop_receipt {
                    current_pop_receipt = text;
                    in_pop_receipt = false;
                } else if in_message_text {
                    current_message_text = text;
                    in_message_text = false;
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"QueueMessage" => {
                    in_message = false;

                    match (
                        current_message_id.take(),
                        current_pop_receipt.take(),
                        current_message_text.take(),
                    ) {
                        (Some(message_id), Some(pop_receipt), Some(message_text)) => {
                            messages.push(RawMessage {
                                message_id,
                                message_text,
                                pop_receipt,
                            });
                        }
                        _ => {
                            return Err(BackendError::MalformedResponse {
                                message:
                                    "QueueMessage is missing MessageId, PopReceipt, or MessageText"
                                        .to_string(),
                            });
                        }
                    }
                }
                b"MessageId" => in_message_id = false,
                b"PopReceipt" => in_pop_receipt = false,
                b"MessageText" => in_message_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BackendError::MalformedResponse {
                    message: format!("XML parsing error: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Parse an `<Error>` response body and classify it by code and status
fn parse_error_body(status: u16, xml: &str, queue_name: &str) -> BackendError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Code" => in_code = true,
                b"Message" => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| "Unknown".to_string());
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "QueueNotFound" => BackendError::QueueNotFound {
            queue_name: queue_name.to_string(),
        },
        "MessageNotFound" | "PopReceiptMismatch" => BackendError::MessageNotFound {
            message_id: message.clone(),
        },
        "AuthenticationFailed" | "AuthorizationFailure" => BackendError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        _ if status == 401 || status == 403 => BackendError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        _ => BackendError::Service {
            status,
            code,
            message,
        },
    }
}
