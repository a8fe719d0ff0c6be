//! Tests for transport URI parsing.

use super::*;
use crate::error::TransportError;

#[test]
fn parses_configuration_and_queue_name() {
    let address = QueueAddress::parse("azuresq://azure/work-queue").unwrap();

    assert_eq!(address.configuration_name(), "azure");
    assert_eq!(address.queue_name(), "work-queue");
    assert_eq!(address.max_messages(), None);
    assert_eq!(address.as_str(), "azuresq://azure/work-queue");
}

#[test]
fn scheme_comparison_is_case_insensitive() {
    let address = QueueAddress::parse("AZURESQ://azure/work-queue").unwrap();

    assert_eq!(address.queue_name(), "work-queue");
}

#[test]
fn rejects_wrong_scheme() {
    let result = QueueAddress::parse("amqp://azure/work-queue");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn rejects_missing_queue_segment() {
    let result = QueueAddress::parse("azuresq://azure");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn rejects_extra_path_segments() {
    let result = QueueAddress::parse("azuresq://azure/work-queue/extra");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn max_messages_in_range_is_kept_exactly() {
    let address = QueueAddress::parse("azuresq://cfg/queue?maxMessages=15").unwrap();

    assert_eq!(address.max_messages(), Some(15));
}

#[test]
fn max_messages_zero_clamps_to_one() {
    let address = QueueAddress::parse("azuresq://cfg/queue?maxMessages=0").unwrap();

    assert_eq!(address.max_messages(), Some(1));
}

#[test]
fn max_messages_above_limit_clamps_to_thirty_two() {
    let address = QueueAddress::parse("azuresq://cfg/queue?maxMessages=100").unwrap();

    assert_eq!(address.max_messages(), Some(32));
}

#[test]
fn rejects_non_numeric_max_messages() {
    let result = QueueAddress::parse("azuresq://cfg/queue?maxMessages=lots");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn rejects_negative_max_messages() {
    let result = QueueAddress::parse("azuresq://cfg/queue?maxMessages=-1");

    assert!(matches!(
        result,
        Err(TransportError::MalformedAddress { .. })
    ));
}

#[test]
fn ignores_unrecognized_query_parameters() {
    let address =
        QueueAddress::parse("azuresq://cfg/queue?durable=true&maxMessages=4&mode=fast").unwrap();

    assert_eq!(address.max_messages(), Some(4));
}

#[test]
fn display_round_trips_the_original_uri() {
    let uri = "azuresq://azure/work-queue?maxMessages=8";
    let address = QueueAddress::parse(uri).unwrap();

    assert_eq!(address.to_string(), uri);
}
