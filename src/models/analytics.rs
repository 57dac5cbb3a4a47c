use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Environment;

pub const ANALYTICS_SHEET: &str = "Analytics";
pub const ANALYTICS_HEADER: &[&str] = &[
    "timestamp",
    "eventId",
    "surface",
    "metric",
    "sponsorId",
    "value",
    "token",
    "userAgent",
    "sessionId",
    "visibleSponsorIds",
    "source",
    "env",
];

pub const MAX_USER_AGENT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Public,
    Display,
    Poster,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "impression")]
    Impression,
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "scan")]
    Scan,
    #[serde(rename = "dwellSec")]
    DwellSec,
    #[serde(rename = "result_update")]
    ResultUpdate,
    #[serde(rename = "schedule_update")]
    ScheduleUpdate,
    #[serde(rename = "standings_update")]
    StandingsUpdate,
    #[serde(rename = "bracket_update")]
    BracketUpdate,
}

/// Which subsystem wrote the row. Several writers share one analytics sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Worker,
    Gas,
    Client,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Public => "public",
            Surface::Display => "display",
            Surface::Poster => "poster",
            Surface::Admin => "admin",
        }
    }
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Impression => "impression",
            Metric::Click => "click",
            Metric::Scan => "scan",
            Metric::DwellSec => "dwellSec",
            Metric::ResultUpdate => "result_update",
            Metric::ScheduleUpdate => "schedule_update",
            Metric::StandingsUpdate => "standings_update",
            Metric::BracketUpdate => "bracket_update",
        }
    }
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Worker => "worker",
            Source::Gas => "gas",
            Source::Client => "client",
        }
    }
}

impl FromStr for Surface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Surface::Public),
            "display" => Ok(Surface::Display),
            "poster" => Ok(Surface::Poster),
            "admin" => Ok(Surface::Admin),
            other => Err(format!("unknown surface '{}'", other)),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "impression" => Ok(Metric::Impression),
            "click" => Ok(Metric::Click),
            "scan" => Ok(Metric::Scan),
            "dwellSec" => Ok(Metric::DwellSec),
            "result_update" => Ok(Metric::ResultUpdate),
            "schedule_update" => Ok(Metric::ScheduleUpdate),
            "standings_update" => Ok(Metric::StandingsUpdate),
            "bracket_update" => Ok(Metric::BracketUpdate),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loosely-typed inbound payload, as sent by clients. Validated into an
/// [`AnalyticsEvent`] before anything is written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsInput {
    pub event_id: Option<String>,
    pub surface: Option<String>,
    pub metric: Option<String>,
    pub sponsor_id: Option<String>,
    pub value: Option<f64>,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub visible_sponsor_ids: Vec<String>,
}

/// One immutable analytics row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub surface: Surface,
    pub metric: Metric,
    pub sponsor_id: Option<String>,
    pub value: f64,
    pub token: Option<String>,
    pub user_agent: String,
    pub session_id: Option<String>,
    pub visible_sponsor_ids: Vec<String>,
    pub source: Source,
    pub env: Environment,
}

/// Truncate on character boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
