use std::sync::Arc;

use courier::{Broker, BrokerBuilder, BrokerConfig, JobStore, QueueAdapter};
use serde_json::{json, Value};

/// Payload used by the scenarios in the broker docs.
pub fn email_payload() -> Value {
    json!({ "to": "a@example.com" })
}

/// A spread of payload shapes, including ones that look like envelopes.
pub fn sample_payloads() -> Vec<Value> {
    vec![
        json!({}),
        json!({ "to": "a@example.com", "subject": "hi" }),
        json!([1, 2, 3]),
        json!("plain string"),
        json!(42),
        json!(null),
        json!({ "id": "not-the-envelope", "data": "{\"nested\":true}" }),
        json!({ "unicode": "caf\u{e9} \u{1f680}", "escapes": "a\"b\\c\n" }),
    ]
}

/// Build a broker over the given doubles with default configuration.
pub fn broker_with(store: Arc<dyn JobStore>, queue: Arc<dyn QueueAdapter>) -> Broker {
    broker_with_config(store, queue, BrokerConfig::default())
}

pub fn broker_with_config(
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueAdapter>,
    config: BrokerConfig,
) -> Broker {
    match BrokerBuilder::new(config)
        .with_store(store)
        .with_queue(queue)
        .build()
    {
        Ok(broker) => broker,
        Err(err) => panic!("broker fixture failed to build: {err}"),
    }
}
