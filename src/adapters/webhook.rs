//! Alert sinks
//!
//! - `LogAlertSink`: writes alerts to the tracing log
//! - `WebhookAlertSink`: queues alerts for a background task that posts them
//!   as Discord-style embeds. Failed posts are logged and dropped.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{AlertKind, AlertPayload};
use crate::ports::AlertSink;

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn publish(&self, alert: AlertPayload) {
        info!(kind = ?alert.kind, address = %alert.address, "ALERT {}", alert.summary());
    }
}

/// Sink that delivers alerts to a webhook from a background task
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    tx: mpsc::Sender<AlertPayload>,
}

impl WebhookAlertSink {
    /// Start the delivery task; it exits once every sink clone is dropped
    pub fn spawn(
        url: String,
        username: String,
        queue_size: usize,
        timeout: Duration,
    ) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        let (tx, mut rx) = mpsc::channel::<AlertPayload>(queue_size.max(1));

        let handle = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                let body = discord_message(&alert, &username);
                match http.post(&url).json(&body).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Delivered {} alert for {}", alert.kind, alert.address);
                    }
                    Ok(response) => {
                        error!(
                            "Webhook rejected {} alert for {}: status {}",
                            alert.kind,
                            alert.address,
                            response.status()
                        );
                    }
                    Err(e) => {
                        error!("Webhook delivery failed for {}: {}", alert.address, e);
                    }
                }
            }
            debug!("Webhook delivery task stopped");
        });

        Ok((Self { tx }, handle))
    }
}

impl AlertSink for WebhookAlertSink {
    fn publish(&self, alert: AlertPayload) {
        if let Err(e) = self.tx.try_send(alert) {
            match e {
                mpsc::error::TrySendError::Full(alert) => {
                    warn!("Alert queue full, dropping {} alert for {}", alert.kind, alert.address);
                }
                mpsc::error::TrySendError::Closed(alert) => {
                    warn!("Alert delivery stopped, dropping {} alert for {}", alert.kind, alert.address);
                }
            }
        }
    }
}

fn embed_color(kind: AlertKind) -> u32 {
    match kind {
        AlertKind::SellPressure | AlertKind::SamplerDip => 0xff0000,
        AlertKind::SamplerRevival | AlertKind::MarketCapSurge => 0x00ff00,
        AlertKind::Correlation => 0x9b59b6,
        AlertKind::LargeBuy | AlertKind::TwoLargeBuys | AlertKind::BuyPressure => 0x3498db,
    }
}

/// Discord webhook body for one alert
pub fn discord_message(alert: &AlertPayload, username: &str) -> Value {
    let mut fields = vec![json!({
        "name": "Contract Address",
        "value": format!("`{}`", alert.address),
        "inline": false,
    })];

    if !alert.category_context.is_empty() {
        let channels: Vec<&str> = alert.category_context.iter().map(|c| c.as_str()).collect();
        fields.push(json!({
            "name": "Channels",
            "value": channels.join(", "),
            "inline": false,
        }));
    }
    for (name, value) in &alert.amounts {
        fields.push(json!({ "name": name, "value": value.to_string(), "inline": true }));
    }
    for (name, value) in &alert.percentages {
        fields.push(json!({ "name": name, "value": format!("{}%", value), "inline": true }));
    }

    let description = alert
        .raw_texts
        .iter()
        .map(|t| format!("> {}", t))
        .collect::<Vec<_>>()
        .join("\n");

    json!({
        "username": username,
        "embeds": [{
            "title": alert.kind.title(),
            "description": description,
            "fields": fields,
            "color": embed_color(alert.kind),
            "timestamp": alert.timestamp.to_rfc3339(),
        }],
    })
}
