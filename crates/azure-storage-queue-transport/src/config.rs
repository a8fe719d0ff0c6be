//! Named connection configurations and their registry.

use crate::error::{ConfigurationError, TransportError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Options handed to the backend HTTP client before it is created.
///
/// A configuration may register a configure hook that mutates these, mirroring
/// host-side client customization (endpoint overrides for emulators, bearer
/// tokens for identity-based credentials, timeouts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Queue service endpoint override (e.g. an Azurite emulator endpoint)
    pub endpoint: Option<String>,
    /// Timeout applied to every backend HTTP request
    pub request_timeout: std::time::Duration,
    /// Bearer token for storage-account (identity) credentials
    pub bearer_token: Option<String>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: std::time::Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

/// Hook invoked to adjust [`BackendOptions`] before backend client creation
pub type ConfigureHook = Arc<dyn Fn(&mut BackendOptions) + Send + Sync>;

/// Connection parameters bound to one configuration name.
///
/// Exactly one of `connection_string` / `storage_account` must be set; the
/// registry enforces this at registration time. One instance is shared by all
/// adapters created for the same configuration name and is read-only after
/// registration.
#[derive(Clone)]
pub struct ConnectionConfig {
    name: String,
    connection_string: Option<String>,
    storage_account: Option<String>,
    max_messages: u32,
    visibility_timeout: Option<Duration>,
    configure: Option<ConfigureHook>,
}

impl ConnectionConfig {
    /// Create a configuration authenticated by a storage connection string
    pub fn with_connection_string(
        name: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string: Some(connection_string.into()),
            storage_account: None,
            max_messages: 32,
            visibility_timeout: None,
            configure: None,
        }
    }

    /// Create a configuration authenticated against a storage account identity
    pub fn with_storage_account(
        name: impl Into<String>,
        storage_account: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string: None,
            storage_account: Some(storage_account.into()),
            max_messages: 32,
            visibility_timeout: None,
            configure: None,
        }
    }

    /// Set the maximum number of messages fetched per backend receive
    pub fn max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Set the visibility timeout requested on every batch receive
    pub fn visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }

    /// Register a hook that customizes [`BackendOptions`] at client creation
    pub fn on_configure(
        mut self,
        configure: impl Fn(&mut BackendOptions) + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Arc::new(configure));
        self
    }

    /// Get the configuration name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the storage connection string, if this is a connection-string configuration
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    /// Get the storage account name, if this is an identity configuration
    pub fn storage_account(&self) -> Option<&str> {
        self.storage_account.as_deref()
    }

    /// Effective batch size for backend receives, in `[1, 32]`
    pub fn effective_max_messages(&self) -> u32 {
        self.max_messages
    }

    /// Visibility timeout override for batch receives
    pub fn effective_visibility_timeout(&self) -> Option<Duration> {
        self.visibility_timeout
    }

    /// Run the configure hook, if any, against the given options
    pub fn apply_configure(&self, options: &mut BackendOptions) {
        if let Some(configure) = &self.configure {
            configure(options);
        }
    }

    fn has_connection_string(&self) -> bool {
        self.connection_string
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    fn has_storage_account(&self) -> bool {
        self.storage_account
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("storage_account", &self.storage_account)
            .field("max_messages", &self.max_messages)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("configure", &self.configure.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// Store of named connection configurations.
///
/// Configurations are validated once when registered; lookups never
/// re-validate. A lookup miss fails with
/// [`TransportError::UnknownConfiguration`].
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    configs: HashMap<String, Arc<ConnectionConfig>>,
}

impl ConfigRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration under its name.
    ///
    /// Fails when the name is empty or when the configuration does not carry
    /// exactly one credential form. `max_messages` outside `[1, 32]` is
    /// clamped here, not rejected.
    pub fn register(&mut self, mut config: ConnectionConfig) -> Result<(), TransportError> {
        if config.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyName.into());
        }

        match (config.has_connection_string(), config.has_storage_account()) {
            (false, false) => {
                return Err(ConfigurationError::CredentialRequired {
                    name: config.name.clone(),
                }
                .into());
            }
            (true, true) => {
                return Err(ConfigurationError::CredentialAmbiguous {
                    name: config.name.clone(),
                }
                .into());
            }
            _ => {}
        }

        config.max_messages = config.max_messages.clamp(1, 32);

        self.configs
            .insert(config.name.clone(), Arc::new(config));

        Ok(())
    }

    /// Look up a configuration by name
    pub fn get(&self, name: &str) -> Result<Arc<ConnectionConfig>, TransportError> {
        self.configs
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownConfiguration {
                name: name.to_string(),
            })
    }

    /// Number of registered configurations
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Check whether the registry holds no configurations
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
