use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use parley_core::domain::agent::CalendarIntegration;

use super::{read_json, transport, AvailabilityWindow, CalendarConnector, ConnectorError, EventRequest};

const SERVICE: &str = "google_calendar";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleCalendarConnector {
    client: Client,
    config: CalendarIntegration,
    base_url: String,
}

impl GoogleCalendarConnector {
    pub fn new(client: Client, config: CalendarIntegration) -> Self {
        Self { client, config, base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl CalendarConnector for GoogleCalendarConnector {
    async fn availability(&self, window: AvailabilityWindow) -> Result<Value, ConnectorError> {
        let body = json!({
            "timeMin": window.start.to_rfc3339(),
            "timeMax": window.end.to_rfc3339(),
            "timeZone": &window.timezone,
            "items": [{ "id": self.config.calendar_id }],
        });
        let response = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        let payload = read_json(SERVICE, response).await?;
        Ok(busy_summary(&self.config.calendar_id, &window, &payload))
    }

    async fn create_event(&self, event: EventRequest) -> Result<Value, ConnectorError> {
        let mut body = json!({
            "summary": &event.summary,
            "start": { "dateTime": event.start.to_rfc3339(), "timeZone": &event.timezone },
            "end": { "dateTime": event.end.to_rfc3339(), "timeZone": &event.timezone },
        });
        if let Some(description) = &event.description {
            body["description"] = json!(description);
        }
        if let Some(email) = &event.attendee_email {
            body["attendees"] = json!([{ "email": email }]);
        }

        let response = self
            .client
            .post(format!("{}/calendars/{}/events", self.base_url, self.config.calendar_id))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        let payload = read_json(SERVICE, response).await?;
        created_event_summary(&payload)
    }
}

fn busy_summary(calendar_id: &str, window: &AvailabilityWindow, payload: &Value) -> Value {
    let busy = payload["calendars"][calendar_id]["busy"].as_array().cloned().unwrap_or_default();
    let fully_free = busy.is_empty();
    json!({
        "window": { "start": window.start.to_rfc3339(), "end": window.end.to_rfc3339() },
        "timezone": &window.timezone,
        "busy": busy,
        "fully_free": fully_free,
    })
}

fn created_event_summary(payload: &Value) -> Result<Value, ConnectorError> {
    let id = payload["id"].as_str().ok_or_else(|| ConnectorError::InvalidResponse {
        service: SERVICE,
        message: "created event has no id".to_string(),
    })?;
    Ok(json!({
        "event_id": id,
        "link": payload["htmlLink"],
        "start": payload["start"]["dateTime"],
        "end": payload["end"]["dateTime"],
        "status": payload["status"],
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{busy_summary, created_event_summary};
    use crate::connectors::{AvailabilityWindow, ConnectorError};

    #[test]
    fn busy_blocks_are_lifted_from_free_busy_payload() {
        let window = AvailabilityWindow {
            start: Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("start"),
            end: Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).single().expect("end"),
            timezone: "America/Mexico_City".to_string(),
        };
        let payload = json!({
            "calendars": { "primary": { "busy": [
                { "start": "2026-03-02T16:00:00Z", "end": "2026-03-02T17:00:00Z" }
            ] } }
        });

        let summary = busy_summary("primary", &window, &payload);
        assert_eq!(summary["busy"].as_array().map(Vec::len), Some(1));
        assert_eq!(summary["fully_free"], json!(false));
        assert_eq!(summary["timezone"], json!("America/Mexico_City"));
    }

    #[test]
    fn created_event_requires_an_id() {
        let summary = created_event_summary(&json!({
            "id": "evt_1",
            "htmlLink": "https://calendar.google.com/event?eid=evt_1",
            "status": "confirmed",
            "start": { "dateTime": "2026-03-02T16:00:00Z" },
            "end": { "dateTime": "2026-03-02T16:30:00Z" }
        }))
        .expect("summary");
        assert_eq!(summary["event_id"], json!("evt_1"));

        let error = created_event_summary(&json!({})).expect_err("missing id");
        assert!(matches!(error, ConnectorError::InvalidResponse { .. }));
    }
}
