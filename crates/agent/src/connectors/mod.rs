//! Side-effecting business backends reachable from tools.

mod google_calendar;
mod shopify;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde_json::Value;
use thiserror::Error;

use parley_core::domain::agent::{CalendarIntegration, ShopifyIntegration};

pub use google_calendar::GoogleCalendarConnector;
pub use shopify::ShopifyConnector;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("{service} returned HTTP {status}: {message}")]
    Http { service: &'static str, status: u16, message: String },
    #[error("{service} unreachable: {message}")]
    Transport { service: &'static str, message: String },
    #[error("{service} sent an unexpected response: {message}")]
    InvalidResponse { service: &'static str, message: String },
    #[error("{0}")]
    NotFound(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: Option<String>,
    pub timezone: String,
}

#[async_trait]
pub trait CalendarConnector: Send + Sync {
    async fn availability(&self, window: AvailabilityWindow) -> Result<Value, ConnectorError>;

    async fn create_event(&self, event: EventRequest) -> Result<Value, ConnectorError>;
}

#[async_trait]
pub trait CommerceConnector: Send + Sync {
    async fn search_products(&self, query: &str, limit: usize) -> Result<Value, ConnectorError>;

    async fn order_status(&self, order_number: &str) -> Result<Value, ConnectorError>;
}

/// Builds connectors for one agent's integration settings.
pub trait ConnectorFactory: Send + Sync {
    fn calendar(&self, config: &CalendarIntegration) -> Arc<dyn CalendarConnector>;

    fn commerce(&self, config: &ShopifyIntegration) -> Arc<dyn CommerceConnector>;
}

#[derive(Clone)]
pub struct HttpConnectorFactory {
    client: Client,
}

impl HttpConnectorFactory {
    pub fn new(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            ConnectorError::Transport { service: "http", message: error.to_string() }
        })?;
        Ok(Self { client })
    }
}

impl ConnectorFactory for HttpConnectorFactory {
    fn calendar(&self, config: &CalendarIntegration) -> Arc<dyn CalendarConnector> {
        Arc::new(GoogleCalendarConnector::new(self.client.clone(), config.clone()))
    }

    fn commerce(&self, config: &ShopifyIntegration) -> Arc<dyn CommerceConnector> {
        Arc::new(ShopifyConnector::new(self.client.clone(), config.clone()))
    }
}

async fn read_json(service: &'static str, response: Response) -> Result<Value, ConnectorError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ConnectorError::Http { service, status: status.as_u16(), message });
    }
    response
        .json()
        .await
        .map_err(|error| ConnectorError::InvalidResponse { service, message: error.to_string() })
}

fn transport(service: &'static str) -> impl Fn(reqwest::Error) -> ConnectorError {
    move |error| ConnectorError::Transport { service, message: error.to_string() }
}
