//! Constraint config shapes
//!
//! Configs are stored as free-form JSON on the constraint row; parsing is
//! lenient, and a config that does not parse simply deactivates that
//! constraint for the request (with a warning).

use serde::{Deserialize, Serialize};
use tracing::warn;

use calmesh_types::{Constraint, ConstraintKind};

/// `working_hours`: `{days: int[1..7], start_time "HH:MM", end_time "HH:MM", timezone}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursConfig {
    pub days: Vec<u32>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// `buffer`: `{type: "prep"|"cooldown", minutes, applies_to}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(rename = "type")]
    pub buffer_type: BufferType,
    pub minutes: i64,
    #[serde(default = "default_applies_to")]
    pub applies_to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferType {
    Prep,
    Cooldown,
}

/// `no_meetings_after`: `{time "HH:MM", timezone}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoMeetingsAfterConfig {
    pub time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// VIP override conditions, carried on VIP policies and `vip_override`
/// constraint configs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VipConditions {
    #[serde(default)]
    pub allow_after_hours: bool,
    #[serde(default)]
    pub min_notice_hours: i64,
    #[serde(default)]
    pub override_deep_work: bool,
}

/// `vip_override` constraint config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipOverrideConfig {
    pub participant_hash: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,
    #[serde(flatten)]
    pub conditions: VipConditions,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_applies_to() -> String {
    "all".to_string()
}

fn default_priority_weight() -> f64 {
    1.0
}

/// Parse a constraint's config, returning `None` (with a warning) when it
/// does not match the expected shape for its kind.
pub fn parse_config<T: serde::de::DeserializeOwned>(constraint: &Constraint) -> Option<T> {
    match serde_json::from_value(constraint.config.clone()) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(
                constraint_id = %constraint.constraint_id,
                kind = constraint.kind.as_str(),
                error = %e,
                "Unparseable constraint config; ignoring for this request"
            );
            None
        }
    }
}

/// Parse `"HH:MM"` into minutes of day
pub fn parse_hhmm(s: &str) -> Option<i64> {
    let (h, m) = s.split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Resolve a timezone string to a UTC offset in minutes. `UTC`/`Z` and
/// fixed `+HH:MM` / `-HH:MM` offsets are supported; anything else falls
/// back to UTC.
pub fn tz_offset_minutes(tz: &str) -> i64 {
    match tz {
        "UTC" | "utc" | "Z" | "" => 0,
        other => {
            let (sign, rest) = if let Some(rest) = other.strip_prefix('+') {
                (1, rest)
            } else if let Some(rest) = other.strip_prefix('-') {
                (-1, rest)
            } else {
                warn!(timezone = other, "Unsupported timezone; treating as UTC");
                return 0;
            };
            match parse_hhmm(rest) {
                Some(minutes) => sign * minutes,
                None => {
                    warn!(timezone = other, "Unsupported timezone; treating as UTC");
                    0
                }
            }
        }
    }
}

/// Is this constraint one of the given kind with a parseable config?
pub fn configs_of_kind<T: serde::de::DeserializeOwned>(
    constraints: &[Constraint],
    kind: ConstraintKind,
) -> Vec<(T, &Constraint)> {
    constraints
        .iter()
        .filter(|c| c.kind == kind)
        .filter_map(|c| parse_config::<T>(c).map(|config| (config, c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("09:00"), Some(540));
        assert_eq!(parse_hhmm("17:30"), Some(1050));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("nine"), None);
    }

    #[test]
    fn test_tz_offsets() {
        assert_eq!(tz_offset_minutes("UTC"), 0);
        assert_eq!(tz_offset_minutes("+02:00"), 120);
        assert_eq!(tz_offset_minutes("-05:30"), -330);
        assert_eq!(tz_offset_minutes("America/Chicago"), 0);
    }

    #[test]
    fn test_buffer_config_wire() {
        let config: BufferConfig =
            serde_json::from_value(serde_json::json!({ "type": "prep", "minutes": 15 })).unwrap();
        assert_eq!(config.buffer_type, BufferType::Prep);
        assert_eq!(config.applies_to, "all");
    }
}
