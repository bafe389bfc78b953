//! Google Calendar tools

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, ValidationError};
use crate::google::client::{Capability, ClientHandle};
use crate::google::types::{Attendee, Event, EventDateTime, EventQuery};
use crate::google::utils::validate_email;
use crate::mcp::normalize::ToolOutput;
use crate::mcp::registry::{ToolDefinition, ToolHandler};
use crate::mcp::validate::ToolArguments;

use super::{default_calendar_id, default_true, object_schema, with_calendar_id};

const DEFAULT_MAX_EVENTS: u32 = 250;
const MAX_EVENTS: u32 = 2500;

/// Check an RFC 3339 timestamp
fn check_timestamp(name: &str, value: &str) -> Result<()> {
    DateTime::parse_from_rfc3339(value).map_err(|e| ValidationError::InvalidParameter {
        name: name.to_string(),
        message: format!("'{}' is not an RFC 3339 timestamp: {}", value, e),
    })?;
    Ok(())
}

/// Check an RFC 3339 timestamp or, for all-day events, a YYYY-MM-DD date
fn check_event_time(name: &str, value: &str) -> Result<()> {
    if value.contains('T') {
        return check_timestamp(name, value);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| ValidationError::InvalidParameter {
        name: name.to_string(),
        message: format!("'{}' is not a YYYY-MM-DD date: {}", value, e),
    })?;
    Ok(())
}

pub struct ListCalendars;

#[async_trait]
impl ToolHandler for ListCalendars {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_calendars",
            "Lists all calendars accessible by the user. Call it before any other tool whenever the user specifies a particular agenda (Family, Holidays, etc.).",
            object_schema(json!({}), &[]),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Calendar
    }

    async fn invoke(&self, _args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        let calendars = client.calendar()?.list_calendars().await?;
        if calendars.is_empty() {
            return Ok(ToolOutput::Empty("No calendars found.".to_string()));
        }
        Ok(ToolOutput::Json(serde_json::to_value(calendars)?))
    }
}

pub struct GetCalendarEvents;

#[async_trait]
impl ToolHandler for GetCalendarEvents {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_calendar_events",
            "Retrieves calendar events from the user's Google Calendar within a specified time range.",
            object_schema(
                with_calendar_id(json!({
                    "time_min": {
                        "type": "string",
                        "description": "Start time in RFC3339 format (e.g. 2024-12-01T00:00:00Z). Defaults to current time if not specified."
                    },
                    "time_max": {
                        "type": "string",
                        "description": "End time in RFC3339 format (e.g. 2024-12-31T23:59:59Z). Optional."
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of events to return (1-2500)",
                        "minimum": 1,
                        "maximum": MAX_EVENTS,
                        "default": DEFAULT_MAX_EVENTS
                    },
                    "show_deleted": {
                        "type": "boolean",
                        "description": "Whether to include deleted events",
                        "default": false
                    },
                    "query": {
                        "type": "string",
                        "description": "Free text search terms to find events"
                    }
                })),
                &[],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Calendar
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(rename = "__calendar_id__", default = "default_calendar_id")]
            calendar_id: String,
            time_min: Option<String>,
            time_max: Option<String>,
            #[serde(default = "default_max_events")]
            max_results: u32,
            #[serde(default)]
            show_deleted: bool,
            query: Option<String>,
        }

        fn default_max_events() -> u32 {
            DEFAULT_MAX_EVENTS
        }

        let args: Args = args.parse()?;
        if let Some(time_min) = &args.time_min {
            check_timestamp("time_min", time_min)?;
        }
        if let Some(time_max) = &args.time_max {
            check_timestamp("time_max", time_max)?;
        }

        let query = EventQuery {
            calendar_id: args.calendar_id,
            time_min: Some(
                args.time_min
                    .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
            time_max: args.time_max,
            max_results: args.max_results,
            show_deleted: args.show_deleted,
            query: args.query,
        };

        let events = client.calendar()?.list_events(&query).await?;
        if events.is_empty() {
            return Ok(ToolOutput::Empty(
                "No events found matching the criteria.".to_string(),
            ));
        }
        Ok(ToolOutput::Json(serde_json::to_value(events)?))
    }
}

pub struct CreateCalendarEvent;

#[async_trait]
impl ToolHandler for CreateCalendarEvent {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_calendar_event",
            "Creates a new event in a specified Google Calendar of the specified user.",
            object_schema(
                with_calendar_id(json!({
                    "summary": {
                        "type": "string",
                        "description": "Title of the event"
                    },
                    "location": {
                        "type": "string",
                        "description": "Location of the event (optional)"
                    },
                    "description": {
                        "type": "string",
                        "description": "Description or notes for the event (optional)"
                    },
                    "start_time": {
                        "type": "string",
                        "description": "Start time in RFC3339 format (e.g. 2024-12-01T10:00:00Z), or YYYY-MM-DD for an all-day event"
                    },
                    "end_time": {
                        "type": "string",
                        "description": "End time in RFC3339 format (e.g. 2024-12-01T11:00:00Z), or YYYY-MM-DD for an all-day event"
                    },
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of attendee email addresses (optional)"
                    },
                    "send_notifications": {
                        "type": "boolean",
                        "description": "Whether to send notifications to attendees",
                        "default": true
                    },
                    "timezone": {
                        "type": "string",
                        "description": "Timezone for the event (e.g. 'America/New_York'). Defaults to UTC if not specified."
                    }
                })),
                &["summary", "start_time", "end_time"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Calendar
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(rename = "__calendar_id__", default = "default_calendar_id")]
            calendar_id: String,
            summary: String,
            start_time: String,
            end_time: String,
            location: Option<String>,
            description: Option<String>,
            #[serde(default)]
            attendees: Vec<String>,
            #[serde(default = "default_true")]
            send_notifications: bool,
            timezone: Option<String>,
        }

        let args: Args = args.parse()?;
        check_event_time("start_time", &args.start_time)?;
        check_event_time("end_time", &args.end_time)?;
        if let Some(invalid) = args.attendees.iter().find(|email| !validate_email(email)) {
            return Err(ValidationError::InvalidEmail {
                email: invalid.clone(),
            }
            .into());
        }

        let event = Event {
            summary: Some(args.summary),
            location: args.location,
            description: args.description,
            start: EventDateTime::parse(&args.start_time, args.timezone.as_deref()),
            end: EventDateTime::parse(&args.end_time, args.timezone.as_deref()),
            attendees: args
                .attendees
                .into_iter()
                .map(|email| Attendee {
                    email,
                    response_status: None,
                })
                .collect(),
            ..Default::default()
        };

        let created = client
            .calendar()?
            .create_event(&args.calendar_id, &event, args.send_notifications)
            .await?;
        Ok(ToolOutput::Json(serde_json::to_value(created)?))
    }
}

pub struct DeleteCalendarEvent;

#[async_trait]
impl ToolHandler for DeleteCalendarEvent {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "delete_calendar_event",
            "Deletes an event from the user's Google Calendar by its event ID.",
            object_schema(
                with_calendar_id(json!({
                    "event_id": {
                        "type": "string",
                        "description": "The ID of the calendar event to delete"
                    },
                    "send_notifications": {
                        "type": "boolean",
                        "description": "Whether to send cancellation notifications to attendees",
                        "default": true
                    }
                })),
                &["event_id"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Calendar
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(rename = "__calendar_id__", default = "default_calendar_id")]
            calendar_id: String,
            event_id: String,
            #[serde(default = "default_true")]
            send_notifications: bool,
        }

        let args: Args = args.parse()?;
        client
            .calendar()?
            .delete_event(&args.calendar_id, &args.event_id, args.send_notifications)
            .await?;

        Ok(ToolOutput::Json(json!({
            "success": true,
            "event_id": args.event_id,
            "message": "Event successfully deleted",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_args(value: Value) -> ToolArguments {
        let schema = json!({"type": "object"});
        crate::mcp::validate::validate(&schema, value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_event_time_accepts_timestamp_and_date() {
        assert!(check_event_time("start_time", "2024-12-01T10:00:00Z").is_ok());
        assert!(check_event_time("start_time", "2024-12-01T10:00:00+02:00").is_ok());
        assert!(check_event_time("start_time", "2024-12-01").is_ok());
    }

    #[test]
    fn test_event_time_rejects_garbage() {
        let err = check_event_time("end_time", "tomorrow at noon").unwrap_err();
        assert!(err.to_string().contains("end_time"));
        assert!(check_timestamp("time_min", "2024-13-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_calendar_id_defaults_when_absent() {
        #[derive(Deserialize)]
        struct Args {
            #[serde(rename = "__calendar_id__", default = "default_calendar_id")]
            calendar_id: String,
        }

        let parsed: Args = sample_args(json!({})).parse().unwrap();
        assert_eq!(parsed.calendar_id, "primary");

        let parsed: Args = sample_args(json!({"__calendar_id__": "team@group.calendar.google.com"}))
            .parse()
            .unwrap();
        assert_eq!(parsed.calendar_id, "team@group.calendar.google.com");
    }

    #[test]
    fn test_events_schema_bounds_max_results() {
        let schema = GetCalendarEvents.definition().input_schema;
        assert_eq!(schema["properties"]["max_results"]["maximum"], 2500);
        assert_eq!(schema["properties"]["max_results"]["default"], 250);
    }
}
