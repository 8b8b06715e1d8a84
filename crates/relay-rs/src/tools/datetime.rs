//! The `date_time` tool: current date and time in several formats.
//!
//! Time zones are `local`, `UTC`, or a fixed UTC offset (`+05:30`,
//! `UTC-3`, `-0800`). Named IANA zones are not resolved.

use super::args::parse_args;
use super::cache::{Clock, SystemClock};
use super::core::{Tool, ToolArgs, ToolFuture};
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use chrono::{DateTime, FixedOffset, Local, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    Iso,
    #[default]
    Full,
    DateOnly,
    TimeOnly,
    Unix,
}

#[derive(Deserialize, JsonSchema)]
struct DateTimeArgs {
    /// 'local' (default), 'UTC', or a UTC offset such as '+05:30' or 'UTC-3'.
    #[serde(default)]
    timezone: Option<String>,
    /// Which fields to return. 'full' (default) returns all of them.
    #[serde(default)]
    format: Option<DateFormat>,
}

/// The `date_time` tool.
///
/// Never cached: the answer changes every second.
#[derive(Debug, Clone)]
pub struct DateTimeTool {
    clock: Arc<dyn Clock>,
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl DateTimeTool {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Tool for DateTimeTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "date_time",
            "Get current date and time information in various formats",
            json_schema_for::<DateTimeArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: DateTimeArgs = parse_args(arguments)?;
            let timezone = args.timezone.as_deref().unwrap_or("local");
            let now = self.clock.now();
            let (local, label) = resolve_timezone(timezone, now)?;
            Ok(describe(local, now, &label, args.format.unwrap_or_default()))
        })
    }

    fn cache_enabled(&self) -> bool {
        false
    }
}

/// The instant in the requested zone, plus a label for it.
pub fn resolve_timezone(
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<FixedOffset>, String), ToolError> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("local") {
        let local = now.with_timezone(&Local).fixed_offset();
        let label = local.format("%:z").to_string();
        return Ok((local, label));
    }
    let offset = parse_offset(tz)
        .ok_or_else(|| ToolError::invalid(format!("Unknown timezone: {timezone}")))?;
    Ok((now.with_timezone(&offset), tz.to_string()))
}

/// `UTC`, `GMT`, `Z`, `+05:30`, `-0800`, `+5`, `UTC+5:30`, `GMT-3`.
pub fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let upper = tz.trim().to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);
    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match rest.split_at_checked(1)? {
        ("+", d) => (1, d),
        ("-", d) => (-1, d),
        _ => return None,
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at_checked(2)?,
        None => (digits, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || !(minutes.len() == 1 || minutes.len() == 2) {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// The fields reported for `format`.
pub(crate) fn describe(
    t: DateTime<FixedOffset>,
    utc: DateTime<Utc>,
    label: &str,
    format: DateFormat,
) -> Value {
    match format {
        DateFormat::Iso => json!({
            "iso": t.to_rfc3339(),
            "timezone": label,
        }),
        DateFormat::DateOnly => json!({
            "date": t.format("%Y-%m-%d").to_string(),
            "day_of_week": t.format("%A").to_string(),
            "month": t.format("%B").to_string(),
            "year": t.format("%Y").to_string(),
            "us_date": t.format("%m/%d/%Y").to_string(),
            "eu_date": t.format("%d/%m/%Y").to_string(),
        }),
        DateFormat::TimeOnly => json!({
            "time": t.format("%H:%M:%S").to_string(),
            "time_12h": t.format("%I:%M:%S %p").to_string(),
            "time_24h": t.format("%H:%M:%S").to_string(),
        }),
        DateFormat::Unix => json!({
            "unix_timestamp": utc.timestamp(),
        }),
        DateFormat::Full => json!({
            "current_datetime": {
                "iso": t.to_rfc3339(),
                "date": t.format("%Y-%m-%d").to_string(),
                "time": t.format("%H:%M:%S").to_string(),
                "day_of_week": t.format("%A").to_string(),
                "month": t.format("%B").to_string(),
                "year": t.format("%Y").to_string(),
                "unix_timestamp": utc.timestamp(),
                "timezone": label,
                "utc": utc.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            },
            "formatted": {
                "us_date": t.format("%m/%d/%Y").to_string(),
                "eu_date": t.format("%d/%m/%Y").to_string(),
                "short_date": t.format("%b %d, %Y").to_string(),
                "long_date": t.format("%B %d, %Y").to_string(),
                "time_12h": t.format("%I:%M %p").to_string(),
                "time_24h": t.format("%H:%M").to_string(),
                "day_and_date": t.format("%A, %B %d, %Y").to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::cache::ManualClock;
    use chrono::TimeZone;

    fn fixed_tool() -> DateTimeTool {
        let instant = Utc.with_ymd_and_hms(2024, 3, 15, 22, 30, 0).unwrap();
        DateTimeTool::with_clock(Arc::new(ManualClock::new(instant)))
    }

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("UTC"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("z"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_offset("-0800"), FixedOffset::east_opt(-8 * 3600));
        assert_eq!(parse_offset("UTC+2"), FixedOffset::east_opt(2 * 3600));
        assert_eq!(parse_offset("gmt-3:00"), FixedOffset::east_opt(-3 * 3600));
        assert_eq!(parse_offset("America/New_York"), None);
        assert_eq!(parse_offset("+25:00"), None);
        assert_eq!(parse_offset("+5:7:1"), None);
    }

    #[tokio::test]
    async fn date_only_in_offset_zone() {
        let result = fixed_tool()
            .execute(&args(json!({"timezone": "+05:30", "format": "date_only"})))
            .await
            .unwrap();
        // 22:30 UTC is already the next day at +05:30.
        assert_eq!(result["date"], "2024-03-16");
        assert_eq!(result["day_of_week"], "Saturday");
        assert_eq!(result["us_date"], "03/16/2024");
    }

    #[tokio::test]
    async fn full_format_by_default() {
        let result = fixed_tool()
            .execute(&args(json!({"timezone": "UTC"})))
            .await
            .unwrap();
        assert_eq!(result["current_datetime"]["date"], "2024-03-15");
        assert_eq!(result["current_datetime"]["time"], "22:30:00");
        assert_eq!(result["current_datetime"]["utc"], "2024-03-15 22:30:00 UTC");
        assert_eq!(result["current_datetime"]["timezone"], "UTC");
        assert_eq!(result["formatted"]["time_12h"], "10:30 PM");
    }

    #[tokio::test]
    async fn unix_and_iso() {
        let tool = fixed_tool();
        let unix = tool
            .execute(&args(json!({"format": "unix"})))
            .await
            .unwrap();
        assert_eq!(unix["unix_timestamp"], 1_710_541_800);

        let iso = tool
            .execute(&args(json!({"format": "iso", "timezone": "UTC"})))
            .await
            .unwrap();
        assert_eq!(iso["iso"], "2024-03-15T22:30:00+00:00");
    }

    #[tokio::test]
    async fn unknown_zone_and_format_are_errors() {
        let tool = fixed_tool();
        let err = tool
            .execute(&args(json!({"timezone": "Mars/Olympus"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown timezone: Mars/Olympus"));
        assert!(tool.execute(&args(json!({"format": "weekly"}))).await.is_err());
    }

    #[test]
    fn never_cached() {
        assert!(!DateTimeTool::new().cache_enabled());
    }
}
