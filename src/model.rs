//! Core domain types shared by the stores, the engine, and the API.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type TargetId = i64;
pub type ScheduleId = i64;
pub type RunId = i64;
pub type AttemptId = i64;

/// A configured HTTP endpoint that schedules fire against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body_template: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Only these methods carry a body template on the wire.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Options => write!(f, "OPTIONS"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => anyhow::bail!("unknown HTTP method: {other}"),
        }
    }
}

/// How a schedule fires: forever at a fixed interval, or at a fixed
/// interval until a bounded window elapses.
///
/// Serializes flattened into `schedule_type` + `interval_seconds`
/// (+ `duration_seconds` for windows), which is also the persisted shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cadence {
    Interval {
        interval_seconds: u32,
    },
    Window {
        interval_seconds: u32,
        duration_seconds: u32,
    },
}

impl Cadence {
    pub fn interval_seconds(&self) -> u32 {
        match self {
            Cadence::Interval { interval_seconds } => *interval_seconds,
            Cadence::Window {
                interval_seconds, ..
            } => *interval_seconds,
        }
    }

    pub fn duration_seconds(&self) -> Option<u32> {
        match self {
            Cadence::Interval { .. } => None,
            Cadence::Window {
                duration_seconds, ..
            } => Some(*duration_seconds),
        }
    }

    /// Persisted `schedule_type` column value.
    pub fn kind(&self) -> &'static str {
        match self {
            Cadence::Interval { .. } => "INTERVAL",
            Cadence::Window { .. } => "WINDOW",
        }
    }

    /// Absolute end of the window, if this cadence has one.
    pub fn window_ends_at(&self, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration_seconds()
            .map(|d| started_at + Duration::seconds(i64::from(d)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Stopped,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Active => write!(f, "ACTIVE"),
            ScheduleStatus::Paused => write!(f, "PAUSED"),
            ScheduleStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ScheduleStatus::Active),
            "PAUSED" => Ok(ScheduleStatus::Paused),
            "STOPPED" => Ok(ScheduleStatus::Stopped),
            other => anyhow::bail!("unknown schedule status: {other}"),
        }
    }
}

/// A policy that fires executions against a target on a cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub target_id: TargetId,
    #[serde(flatten)]
    pub cadence: Cadence,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub window_started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Absolute end of the window for WINDOW schedules that have started.
    pub fn window_ends_at(&self) -> Option<DateTime<Utc>> {
        self.window_started_at
            .and_then(|started| self.cadence.window_ends_at(started))
    }
}

/// Outcome classification for one execution. `Running` is the
/// intermediate marker written before the network call; the rest are
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    Timeout,
    DnsError,
    ConnectionError,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Timeout => write!(f, "TIMEOUT"),
            RunStatus::DnsError => write!(f, "DNS_ERROR"),
            RunStatus::ConnectionError => write!(f, "CONNECTION_ERROR"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "TIMEOUT" => Ok(RunStatus::Timeout),
            "DNS_ERROR" => Ok(RunStatus::DnsError),
            "CONNECTION_ERROR" => Ok(RunStatus::ConnectionError),
            "FAILED" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status: {other}"),
        }
    }
}

/// One execution outcome, created before the network call and finalized
/// after it. Immutable once finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub schedule_id: ScheduleId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub http_status: Option<u16>,
    pub response_size_bytes: Option<u64>,
    pub response_snippet: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub request_url: String,
    pub request_method: HttpMethod,
}

/// Sub-record of a run, reserved for future multi-try retries. Exactly
/// one exists per finalized run today, with `attempt_number` = 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub run_id: RunId,
    pub attempt_number: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub http_status: Option<u16>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_serializes_flat() {
        let window = Cadence::Window {
            interval_seconds: 2,
            duration_seconds: 5,
        };
        let json = serde_json::to_value(window).unwrap();
        assert_eq!(json["schedule_type"], "WINDOW");
        assert_eq!(json["interval_seconds"], 2);
        assert_eq!(json["duration_seconds"], 5);

        let interval = Cadence::Interval {
            interval_seconds: 30,
        };
        let json = serde_json::to_value(interval).unwrap();
        assert_eq!(json["schedule_type"], "INTERVAL");
        assert!(json.get("duration_seconds").is_none());
    }

    #[test]
    fn cadence_roundtrips_through_json() {
        let original = Cadence::Window {
            interval_seconds: 10,
            duration_seconds: 60,
        };
        let parsed: Cadence =
            serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn window_end_is_start_plus_duration() {
        let cadence = Cadence::Window {
            interval_seconds: 2,
            duration_seconds: 5,
        };
        let start = Utc::now();
        let end = cadence.window_ends_at(start).unwrap();
        assert_eq!((end - start).num_seconds(), 5);

        let interval = Cadence::Interval {
            interval_seconds: 2,
        };
        assert!(interval.window_ends_at(start).is_none());
    }

    #[test]
    fn run_status_text_roundtrip() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Timeout,
            RunStatus::DnsError,
            RunStatus::ConnectionError,
            RunStatus::Failed,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("BOGUS".parse::<RunStatus>().is_err());
    }

    #[test]
    fn body_only_for_mutating_methods() {
        assert!(HttpMethod::Post.allows_body());
        assert!(HttpMethod::Put.allows_body());
        assert!(HttpMethod::Patch.allows_body());
        assert!(!HttpMethod::Get.allows_body());
        assert!(!HttpMethod::Delete.allows_body());
    }
}
