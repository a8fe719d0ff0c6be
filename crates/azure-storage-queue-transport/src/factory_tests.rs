//! Tests for adapter construction from transport URIs.

use super::*;
use crate::config::ConnectionConfig;
use crate::error::ConfigurationError;

fn registry_with(config: ConnectionConfig) -> Arc<ConfigRegistry> {
    let mut registry = ConfigRegistry::new();
    registry.register(config).unwrap();
    Arc::new(registry)
}

fn factory_with(config: ConnectionConfig) -> AzureStorageQueueFactory {
    AzureStorageQueueFactory::new(registry_with(config), CancellationToken::new())
}

#[test]
fn factory_serves_the_transport_scheme() {
    let factory = AzureStorageQueueFactory::new(
        Arc::new(ConfigRegistry::new()),
        CancellationToken::new(),
    );

    assert_eq!(factory.scheme(), "azuresq");
}

#[test]
fn creates_an_adapter_for_a_registered_configuration() {
    let factory = factory_with(ConnectionConfig::with_connection_string(
        "azure",
        "AccountName=devaccount;AccountKey=ZGV2a2V5",
    ));

    let queue = factory
        .create("azuresq://azure/work-queue?maxMessages=5")
        .unwrap();

    assert_eq!(queue.address().queue_name(), "work-queue");
    assert_eq!(queue.address().max_messages(), Some(5));
}

#[test]
fn malformed_uri_fails_at_construction() {
    let factory = factory_with(ConnectionConfig::with_connection_string(
        "azure",
        "AccountName=devaccount;AccountKey=ZGV2a2V5",
    ));

    let result = factory.create("azuresq://azure");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn unregistered_configuration_fails_at_construction() {
    let factory = AzureStorageQueueFactory::new(
        Arc::new(ConfigRegistry::new()),
        CancellationToken::new(),
    );

    let result = factory.create("azuresq://missing/work-queue");

    match result {
        Err(TransportError::UnknownConfiguration { name }) => assert_eq!(name, "missing"),
        other => panic!("expected UnknownConfiguration, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn storage_account_configuration_needs_a_token_from_the_hook() {
    let factory = factory_with(ConnectionConfig::with_storage_account("azure", "devaccount"));

    let result = factory.create("azuresq://azure/work-queue");

    assert!(matches!(
        result,
        Err(TransportError::Configuration(
            ConfigurationError::Invalid { .. }
        ))
    ));
}

#[test]
fn configure_hook_supplies_the_token_at_creation() {
    let factory = factory_with(
        ConnectionConfig::with_storage_account("azure", "devaccount").on_configure(|options| {
            options.bearer_token = Some("token".to_string());
        }),
    );

    let queue = factory.create("azuresq://azure/work-queue").unwrap();

    assert_eq!(queue.address().configuration_name(), "azure");
}

#[test]
fn shutting_down_the_factory_token_cancels_created_adapters() {
    let registry = registry_with(ConnectionConfig::with_connection_string(
        "azure",
        "AccountName=devaccount;AccountKey=ZGV2a2V5",
    ));
    let shutdown = CancellationToken::new();
    let factory = AzureStorageQueueFactory::new(registry, shutdown.clone());

    let queue = factory.create("azuresq://azure/work-queue").unwrap();

    shutdown.cancel();

    assert!(queue.is_cancelled());
}
