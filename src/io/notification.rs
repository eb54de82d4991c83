//! Loss-prevention notifications
//!
//! `HttpNotifier` posts an EdgeX style notification to the notification
//! service. `LogNotifier` only logs, and is used when notifications are off.

use crate::infra::config::NotificationConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// Body of an EdgeX notification
#[derive(Debug, Clone, Serialize)]
pub struct NotificationBody<'a> {
    pub slug: String,
    pub sender: &'a str,
    pub category: &'a str,
    pub severity: &'a str,
    pub content: &'a str,
    pub labels: [&'a str; 1],
}

pub struct HttpNotifier {
    config: NotificationConfig,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(config: NotificationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build notification HTTP client")?;
        Ok(Self { config, client })
    }

    /// Each notification needs a unique slug
    pub fn body<'a>(&'a self, text: &'a str) -> NotificationBody<'a> {
        NotificationBody {
            slug: format!("loss-prevention-{}", uuid::Uuid::now_v7()),
            sender: &self.config.sender,
            category: &self.config.category,
            severity: &self.config.severity,
            content: text,
            labels: [self.config.category.as_str()],
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        let start = Instant::now();
        let body = serde_json::to_vec(&self.body(text))?;

        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("notification service returned {}", status.as_u16());
        }

        info!(
            status = %status.as_u16(),
            latency_ms = %start.elapsed().as_millis(),
            "notification_sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        info!(content = %text.trim(), "notification_logged");
        Ok(())
    }
}
