//! Tests for connection configurations and the registry.

use super::*;
use crate::error::{ConfigurationError, TransportError};
use chrono::Duration;

fn connection_string_config(name: &str) -> ConnectionConfig {
    ConnectionConfig::with_connection_string(
        name,
        "AccountName=devaccount;AccountKey=ZGV2a2V5",
    )
}

#[test]
fn register_and_get_round_trip() {
    let mut registry = ConfigRegistry::new();
    registry.register(connection_string_config("azure")).unwrap();

    let config = registry.get("azure").unwrap();

    assert_eq!(config.name(), "azure");
    assert!(config.connection_string().is_some());
    assert_eq!(config.effective_max_messages(), 32);
}

#[test]
fn lookup_miss_reports_unknown_configuration() {
    let registry = ConfigRegistry::new();

    let result = registry.get("missing");

    match result {
        Err(TransportError::UnknownConfiguration { name }) => assert_eq!(name, "missing"),
        other => panic!("expected UnknownConfiguration, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn same_name_shares_one_configuration_instance() {
    let mut registry = ConfigRegistry::new();
    registry.register(connection_string_config("azure")).unwrap();

    let first = registry.get("azure").unwrap();
    let second = registry.get("azure").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn empty_name_is_rejected_at_registration() {
    let mut registry = ConfigRegistry::new();

    let result = registry.register(connection_string_config("  "));

    assert!(matches!(
        result,
        Err(TransportError::Configuration(ConfigurationError::EmptyName))
    ));
}

#[test]
fn missing_credentials_are_rejected_at_registration() {
    let mut registry = ConfigRegistry::new();
    let config = ConnectionConfig::with_connection_string("azure", "   ");

    let result = registry.register(config);

    assert!(matches!(
        result,
        Err(TransportError::Configuration(
            ConfigurationError::CredentialRequired { .. }
        ))
    ));
}

#[test]
fn both_credential_forms_are_rejected_at_registration() {
    let mut registry = ConfigRegistry::new();

    let config = ConnectionConfig {
        name: "azure".to_string(),
        connection_string: Some("AccountName=a;AccountKey=aw==".to_string()),
        storage_account: Some("devaccount".to_string()),
        max_messages: 32,
        visibility_timeout: None,
        configure: None,
    };

    let result = registry.register(config);

    assert!(matches!(
        result,
        Err(TransportError::Configuration(
            ConfigurationError::CredentialAmbiguous { .. }
        ))
    ));
}

#[test]
fn max_messages_is_clamped_at_registration() {
    let mut registry = ConfigRegistry::new();

    registry
        .register(connection_string_config("low").max_messages(0))
        .unwrap();
    registry
        .register(connection_string_config("high").max_messages(100))
        .unwrap();

    assert_eq!(registry.get("low").unwrap().effective_max_messages(), 1);
    assert_eq!(registry.get("high").unwrap().effective_max_messages(), 32);
}

#[test]
fn visibility_timeout_is_preserved() {
    let mut registry = ConfigRegistry::new();

    registry
        .register(connection_string_config("azure").visibility_timeout(Duration::seconds(90)))
        .unwrap();

    assert_eq!(
        registry.get("azure").unwrap().effective_visibility_timeout(),
        Some(Duration::seconds(90))
    );
}

#[test]
fn configure_hook_mutates_backend_options() {
    let config = ConnectionConfig::with_storage_account("azure", "devaccount").on_configure(
        |options| {
            options.endpoint = Some("http://127.0.0.1:10001/devaccount".to_string());
            options.bearer_token = Some("token".to_string());
        },
    );

    let mut options = BackendOptions::default();
    config.apply_configure(&mut options);

    assert_eq!(
        options.endpoint.as_deref(),
        Some("http://127.0.0.1:10001/devaccount")
    );
    assert_eq!(options.bearer_token.as_deref(), Some("token"));
}

#[test]
fn backend_options_default_has_timeout_and_no_overrides() {
    let options = BackendOptions::default();

    assert_eq!(options.endpoint, None);
    assert_eq!(options.bearer_token, None);
    assert_eq!(options.request_timeout, std::time::Duration::from_secs(30));
}
