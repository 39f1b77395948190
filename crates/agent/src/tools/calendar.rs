use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use parley_core::domain::tool::ToolCall;

use super::{arguments_object, optional_str, required_str, Capability, ToolContext, ToolError};
use crate::connectors::{AvailabilityWindow, CalendarConnector, EventRequest};
use crate::llm::ToolDescriptor;

pub const LIST_AVAILABILITY_TOOL: &str = "list_calendar_availability";
pub const CREATE_EVENT_TOOL: &str = "create_calendar_event";

const DAY_START: (u32, u32) = (8, 0);
const DAY_END: (u32, u32) = (20, 0);
const MAX_EVENT_MINUTES: i64 = 480;

pub struct CalendarCapability {
    connector: Arc<dyn CalendarConnector>,
    default_event_minutes: u32,
}

impl CalendarCapability {
    pub fn new(connector: Arc<dyn CalendarConnector>, default_event_minutes: u32) -> Self {
        Self { connector, default_event_minutes }
    }

    async fn availability(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError> {
        let arguments = arguments_object(call)?;
        let zone = agent_zone(&context.agent.timezone);
        let date = NaiveDate::parse_from_str(required_str(arguments, "date")?, "%Y-%m-%d")
            .map_err(|_| ToolError::InvalidArguments("`date` must be YYYY-MM-DD".to_string()))?;
        let from = parse_clock(optional_str(arguments, "from_time"), DAY_START)?;
        let until = parse_clock(optional_str(arguments, "until_time"), DAY_END)?;
        if until <= from {
            return Err(ToolError::InvalidArguments("`until_time` must be after `from_time`".into()));
        }

        let window = AvailabilityWindow {
            start: to_utc(zone, date.and_time(from))?,
            end: to_utc(zone, date.and_time(until))?,
            timezone: zone.name().to_string(),
        };
        Ok(self.connector.availability(window).await?)
    }

    async fn create(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError> {
        let arguments = arguments_object(call)?;
        let zone = agent_zone(&context.agent.timezone);
        let start = parse_start(zone, required_str(arguments, "start")?)?;
        let minutes = match arguments.get("duration_minutes") {
            None | Some(Value::Null) => i64::from(self.default_event_minutes),
            Some(value) => value.as_i64().filter(|m| (1..=MAX_EVENT_MINUTES).contains(m)).ok_or_else(|| {
                ToolError::InvalidArguments(format!("`duration_minutes` must be 1..={MAX_EVENT_MINUTES}"))
            })?,
        };

        let event = EventRequest {
            summary: optional_str(arguments, "title")
                .map(str::to_string)
                .unwrap_or_else(|| format!("Meeting with {}", context.agent.company_name)),
            description: optional_str(arguments, "notes").map(str::to_string),
            start,
            end: start + Duration::minutes(minutes),
            attendee_email: optional_str(arguments, "attendee_email").map(str::to_string),
            timezone: zone.name().to_string(),
        };
        Ok(self.connector.create_event(event).await?)
    }
}

#[async_trait]
impl Capability for CalendarCapability {
    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                LIST_AVAILABILITY_TOOL,
                "List busy blocks on the calendar for one day, in the business's local time.",
                json!({
                    "type": "object",
                    "properties": {
                        "date": { "type": "string", "description": "Day to check, YYYY-MM-DD" },
                        "from_time": { "type": "string", "description": "Start of the window, HH:MM (default 08:00)" },
                        "until_time": { "type": "string", "description": "End of the window, HH:MM (default 20:00)" }
                    },
                    "required": ["date"]
                }),
            ),
            ToolDescriptor::new(
                CREATE_EVENT_TOOL,
                "Book a meeting once the visitor confirmed date, time and email.",
                json!({
                    "type": "object",
                    "properties": {
                        "start": { "type": "string", "description": "Local start, YYYY-MM-DDTHH:MM" },
                        "duration_minutes": { "type": "integer", "description": format!("Defaults to {} minutes", self.default_event_minutes) },
                        "title": { "type": "string" },
                        "attendee_email": { "type": "string" },
                        "notes": { "type": "string" }
                    },
                    "required": ["start"]
                }),
            ),
        ]
    }

    async fn invoke(&self, call: &ToolCall, context: &ToolContext) -> Result<Value, ToolError> {
        match call.name.as_str() {
            LIST_AVAILABILITY_TOOL => self.availability(call, context).await,
            CREATE_EVENT_TOOL => self.create(call, context).await,
            other => Err(ToolError::Refused(format!("calendar cannot handle `{other}`"))),
        }
    }
}

fn agent_zone(timezone: &str) -> Tz {
    timezone.trim().parse::<Tz>().unwrap_or(Tz::UTC)
}

fn parse_clock(raw: Option<&str>, default: (u32, u32)) -> Result<NaiveTime, ToolError> {
    match raw {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .map_err(|_| ToolError::InvalidArguments(format!("`{raw}` is not a HH:MM time"))),
        None => NaiveTime::from_hms_opt(default.0, default.1, 0)
            .ok_or_else(|| ToolError::InvalidArguments("invalid default time".to_string())),
    }
}

/// Accepts an RFC 3339 instant or a zone-less local time in the agent's timezone.
fn parse_start(zone: Tz, raw: &str) -> Result<DateTime<Utc>, ToolError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{raw}` is not a YYYY-MM-DDTHH:MM start")))
        .and_then(|local| to_utc(zone, local))
}

fn to_utc(zone: Tz, local: NaiveDateTime) -> Result<DateTime<Utc>, ToolError> {
    zone.from_local_datetime(&local)
        .earliest()
        .map(|instant| instant.with_timezone(&Utc))
        .ok_or_else(|| ToolError::InvalidArguments(format!("{local} does not exist in {}", zone.name())))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Tz;

    use super::{agent_zone, parse_start, to_utc};

    #[test]
    fn local_start_is_converted_with_agent_zone() {
        let zone = agent_zone("America/Mexico_City");
        let start = parse_start(zone, "2026-03-02T10:30").expect("local start");
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).single().expect("utc"));
    }

    #[test]
    fn explicit_offsets_are_respected() {
        let start = parse_start(Tz::UTC, "2026-03-02T10:30:00-03:00").expect("rfc3339");
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 13, 30, 0).single().expect("utc"));
        assert!(parse_start(Tz::UTC, "next tuesday").is_err());
    }

    #[test]
    fn unknown_zone_falls_back_to_utc() {
        assert_eq!(agent_zone("Mars/Olympus"), Tz::UTC);
        let local = NaiveDate::from_ymd_opt(2026, 1, 1)
            .and_then(|date| date.and_hms_opt(9, 0, 0))
            .expect("local");
        assert_eq!(
            to_utc(Tz::UTC, local).expect("utc"),
            Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).single().expect("utc")
        );
    }
}
