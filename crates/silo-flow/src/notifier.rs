//! Pub/sub over the metadata database.
//!
//! The master registers the staging-file parse topic and publishes one
//! message per parse task; the slave pool listens on the same channel.
//! Postgres `NOTIFY`/`LISTEN` carries the messages so no extra broker is
//! needed.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;

use crate::error::{Error, Result};

/// Channel used to fan staging-file parse tasks out to slaves.
pub const STAGING_FILE_PROCESS_TOPIC: &str = "process_staging_file";

/// Pub/sub handle shared between the scheduler and upload jobs.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Declares a topic before first use. Idempotent.
    async fn register_topic(&self, topic: &str) -> Result<()>;

    /// Publishes one message on the topic.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

fn validate_topic(topic: &str) -> Result<()> {
    let valid = !topic.is_empty()
        && topic
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::serialization(format!(
            "topic must be a lowercase identifier: {topic}"
        )))
    }
}

/// Postgres `NOTIFY`-backed notifier.
#[derive(Debug, Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    /// Creates a notifier over the shared metadata pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn register_topic(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        // NOTIFY channels need no declaration; registration just proves
        // connectivity so a bad DSN fails at startup, not first publish.
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        tracing::info!(topic, "registered pub/sub topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        validate_topic(topic)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic)
            .bind(payload.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory notifier for tests; records published messages per topic.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    published: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published to the topic, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Value> {
        let guard = self.published.lock().expect("notifier lock poisoned");
        guard.get(topic).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn register_topic(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        let mut guard = self.published.lock().expect("notifier lock poisoned");
        guard.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        validate_topic(topic)?;
        let mut guard = self.published.lock().expect("notifier lock poisoned");
        guard
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_notifier_records_in_order() {
        let notifier = MemoryNotifier::new();
        notifier.register_topic(STAGING_FILE_PROCESS_TOPIC).await.unwrap();
        notifier
            .publish(STAGING_FILE_PROCESS_TOPIC, &json!({"staging_file_id": 1}))
            .await
            .unwrap();
        notifier
            .publish(STAGING_FILE_PROCESS_TOPIC, &json!({"staging_file_id": 2}))
            .await
            .unwrap();

        let published = notifier.published(STAGING_FILE_PROCESS_TOPIC);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0]["staging_file_id"], 1);
    }

    #[tokio::test]
    async fn invalid_topic_names_are_rejected() {
        let notifier = MemoryNotifier::new();
        assert!(notifier.register_topic("").await.is_err());
        assert!(notifier.register_topic("Bad Topic").await.is_err());
        assert!(notifier.publish("drop table", &json!({})).await.is_err());
    }
}
