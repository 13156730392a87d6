//! Message queue probes
//!
//! `basic` does a declare/publish/get/delete round-trip through the default
//! exchange. `routing` checks topic exchange routing to bound queues.
//! `persistence` publishes a persistent JSON message to a durable queue and
//! checks its properties survive the trip. All scratch objects get random
//! names so concurrent runs do not collide.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions,
    ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::message::Delivery;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{unique_suffix, MessagingReport};
use crate::backend::{AmqpConnection, ConnectionError};
use crate::target::BackendKind;

/// Routing keys bound to the three scratch queues, in queue order
pub const ROUTING_KEYS: [&str; 3] = ["test.direct", "test.topic.specific", "test.topic.general"];

const GET_ATTEMPTS: u32 = 20;
const GET_INTERVAL: Duration = Duration::from_millis(50);

/// Exchange routing outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoutingReport {
    pub exchange_declare: bool,
    pub queue_binding: bool,
    pub direct_routing: bool,
    pub topic_routing: bool,
}

impl RoutingReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("exchange_declare", self.exchange_declare),
            ("queue_binding", self.queue_binding),
            ("direct_routing", self.direct_routing),
            ("topic_routing", self.topic_routing),
        ]
    }
}

/// Durable queue and persistent message outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceReport {
    pub durable_queue: bool,
    pub persistent_message: bool,
    /// Delivery mode, content type and message id came back intact
    pub queue_properties: bool,
}

impl PersistenceReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("durable_queue", self.durable_queue),
            ("persistent_message", self.persistent_message),
            ("queue_properties", self.queue_properties),
        ]
    }
}

const PERSISTENT: u8 = 2;
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistentPayload {
    id: String,
    timestamp: u64,
    data: String,
}

fn op_err(e: lapin::Error) -> ConnectionError {
    ConnectionError::operation(BackendKind::MessageQueue, e)
}

fn text_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type("text/plain".into())
        .with_delivery_mode(1)
}

async fn publish(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &str,
) -> Result<(), ConnectionError> {
    channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            body.as_bytes(),
            text_properties(),
        )
        .await
        .map_err(op_err)?
        .await
        .map_err(op_err)?;
    Ok(())
}

/// Pull one message body, giving the broker a moment to route it
async fn get_one(channel: &Channel, queue: &str) -> Result<Option<Vec<u8>>, ConnectionError> {
    Ok(get_delivery(channel, queue).await?.map(|delivery| delivery.data))
}

/// Pull one delivery, retrying briefly; acks what it gets
async fn get_delivery(channel: &Channel, queue: &str) -> Result<Option<Delivery>, ConnectionError> {
    for _ in 0..GET_ATTEMPTS {
        if let Some(message) = channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(op_err)?
        {
            message
                .delivery
                .acker
                .ack(BasicAckOptions::default())
                .await
                .map_err(op_err)?;
            return Ok(Some(message.delivery));
        }
        tokio::time::sleep(GET_INTERVAL).await;
    }
    debug!(queue = %queue, "No message arrived");
    Ok(None)
}

async fn declare_exclusive(channel: &Channel, queue: &str) -> Result<String, ConnectionError> {
    let declared = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                exclusive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(op_err)?;
    Ok(declared.name().as_str().to_string())
}

pub async fn basic(conn: &mut AmqpConnection) -> Result<MessagingReport, ConnectionError> {
    let channel = conn.channel()?;
    let mut report = MessagingReport::default();

    let queue = format!("test_queue_{}", unique_suffix());
    let message = format!("test_message_{}", unique_suffix());

    report.queue_declare = declare_exclusive(channel, &queue).await? == queue;

    publish(channel, "", &queue, &message).await?;
    report.message_publish = true;

    report.message_consume = get_one(channel, &queue).await?.as_deref() == Some(message.as_bytes());

    channel
        .queue_delete(&queue, QueueDeleteOptions::default())
        .await
        .map_err(op_err)?;
    report.queue_delete = true;

    Ok(report)
}

pub async fn routing(conn: &mut AmqpConnection) -> Result<RoutingReport, ConnectionError> {
    let channel = conn.channel()?;
    let mut report = RoutingReport::default();

    let suffix = unique_suffix();
    let exchange = format!("test_exchange_{}", suffix);
    let queues: Vec<String> = (0..ROUTING_KEYS.len())
        .map(|i| format!("test_queue_{}_{}", i, suffix))
        .collect();

    channel
        .exchange_declare(
            &exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(op_err)?;
    report.exchange_declare = true;

    for (queue, routing_key) in queues.iter().zip(ROUTING_KEYS) {
        declare_exclusive(channel, queue).await?;
        channel
            .queue_bind(
                queue,
                &exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(op_err)?;
    }
    report.queue_binding = true;

    publish(channel, &exchange, ROUTING_KEYS[0], "direct_message").await?;
    report.direct_routing =
        get_one(channel, &queues[0]).await?.as_deref() == Some(b"direct_message".as_slice());

    publish(channel, &exchange, ROUTING_KEYS[1], "topic_message").await?;
    report.topic_routing =
        get_one(channel, &queues[1]).await?.as_deref() == Some(b"topic_message".as_slice());

    for queue in &queues {
        channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(op_err)?;
    }
    channel
        .exchange_delete(&exchange, ExchangeDeleteOptions::default())
        .await
        .map_err(op_err)?;

    Ok(report)
}

pub async fn persistence(conn: &mut AmqpConnection) -> Result<PersistenceReport, ConnectionError> {
    let channel = conn.channel()?;
    let mut report = PersistenceReport::default();

    let queue = format!("test_durable_queue_{}", unique_suffix());
    let declared = channel
        .queue_declare(
            &queue,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(op_err)?;
    report.durable_queue = declared.name().as_str() == queue;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let payload = PersistentPayload {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp,
        data: "persistent_test_data".to_string(),
    };
    let body = serde_json::to_vec(&payload)
        .map_err(|e| ConnectionError::operation(BackendKind::MessageQueue, e))?;
    let properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_timestamp(timestamp)
        .with_message_id(payload.id.as_str().into());

    channel
        .basic_publish(
            "",
            &queue,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await
        .map_err(op_err)?
        .await
        .map_err(op_err)?;
    report.persistent_message = true;

    if let Some(delivery) = get_delivery(channel, &queue).await? {
        report.queue_properties = properties_intact(&delivery, &payload.id);
    }

    channel
        .queue_delete(&queue, QueueDeleteOptions::default())
        .await
        .map_err(op_err)?;

    Ok(report)
}

fn properties_intact(delivery: &Delivery, id: &str) -> bool {
    let properties = &delivery.properties;
    let received: Option<PersistentPayload> = serde_json::from_slice(&delivery.data).ok();

    *properties.delivery_mode() == Some(PERSISTENT)
        && properties.content_type().as_ref().map(|c| c.as_str()) == Some(JSON_CONTENT_TYPE)
        && properties.message_id().as_ref().map(|m| m.as_str()) == Some(id)
        && received.is_some_and(|payload| payload.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_entries_order() {
        let report = RoutingReport {
            exchange_declare: true,
            queue_binding: true,
            ..Default::default()
        };
        assert_eq!(
            report.entries(),
            vec![
                ("exchange_declare", true),
                ("queue_binding", true),
                ("direct_routing", false),
                ("topic_routing", false)
            ]
        );
    }

    #[test]
    fn test_persistence_entries_order() {
        let report = PersistenceReport {
            durable_queue: true,
            persistent_message: true,
            queue_properties: false,
        };
        assert_eq!(
            report.entries(),
            vec![
                ("durable_queue", true),
                ("persistent_message", true),
                ("queue_properties", false)
            ]
        );
    }

    #[test]
    fn test_persistent_payload_shape() {
        let payload = PersistentPayload {
            id: "abc".to_string(),
            timestamp: 1,
            data: "persistent_test_data".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "abc", "timestamp": 1, "data": "persistent_test_data"})
        );
    }

    #[test]
    fn test_routing_keys_are_distinct() {
        assert_ne!(ROUTING_KEYS[0], ROUTING_KEYS[1]);
        assert_ne!(ROUTING_KEYS[1], ROUTING_KEYS[2]);
    }
}
