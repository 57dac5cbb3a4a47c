use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENTS_SHEET: &str = "Events";
pub const EVENTS_HEADER: &[&str] = &["id", "brandId", "templateId", "dataJson", "createdAt", "slug", "updatedAt"];
/// Data rows only; row 1 is the header.
pub const EVENTS_DATA_RANGE: &str = "A2:G";

pub const COL_ID: usize = 0;
pub const COL_BRAND: usize = 1;
pub const COL_TEMPLATE: usize = 2;
pub const COL_DATA: usize = 3;
pub const COL_CREATED: usize = 4;
pub const COL_SLUG: usize = 5;
pub const COL_UPDATED: usize = 6;

pub const MAX_SLUG_LEN: usize = 50;
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

static SLUG_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

// ── Sub-resources ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub time: String,
    pub activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub rank: u32,
    pub name: String,
    pub score: f64,
    /// Free-form per-team stats (wins, losses, points for...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketMatch {
    pub id: String,
    pub round: u32,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub matches: Vec<BracketMatch>,
}

impl Bracket {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Display toggles for the public/display surfaces. Sponsors show unless
/// switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSettings {
    #[serde(default)]
    pub show_schedule: bool,
    #[serde(default)]
    pub show_standings: bool,
    #[serde(default)]
    pub show_bracket: bool,
    #[serde(default = "default_true")]
    pub show_sponsors: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            show_schedule: false,
            show_standings: false,
            show_bracket: false,
            show_sponsors: default_true(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLinks {
    pub public_url: String,
    pub display_url: String,
    pub poster_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToAction {
    pub label: String,
    pub url: String,
}

// ── Event ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub brand_id: String,
    pub template_id: String,
    pub name: String,
    #[serde(rename = "startDateISO")]
    pub start_date: NaiveDate,
    pub venue: String,
    pub slug: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<ScheduleItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standings: Option<Vec<Standing>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bracket: Option<Bracket>,
    #[serde(default)]
    pub settings: EventSettings,
    #[serde(default)]
    pub links: EventLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<CallToAction>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record failed validation: {0}")]
    Invalid(String),
}

/// The blob stored in the `dataJson` column. Tagged with a schema version so
/// older rows can be migrated on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schemaVersion")]
pub enum StoredRecord {
    #[serde(rename = "1")]
    V1(Event),
}

impl Event {
    /// Serialize into the versioned `dataJson` blob.
    pub fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StoredRecord::V1(self.clone()))
    }

    /// Parse and validate a `dataJson` blob read back from the sheet.
    pub fn from_record(blob: &str) -> Result<Self, RecordError> {
        let StoredRecord::V1(event) = serde_json::from_str::<StoredRecord>(blob)?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.id.trim().is_empty() {
            return Err(RecordError::Invalid("missing id".into()));
        }
        if self.brand_id.trim().is_empty() {
            return Err(RecordError::Invalid("missing brandId".into()));
        }
        if self.slug.len() > MAX_SLUG_LEN || !SLUG_SHAPE.is_match(&self.slug) {
            return Err(RecordError::Invalid(format!("slug '{}' is not a valid slug", self.slug)));
        }
        if let Some(bracket) = &self.bracket {
            if bracket.matches.iter().any(|m| m.id.trim().is_empty()) {
                return Err(RecordError::Invalid("bracket match without id".into()));
            }
        }
        Ok(())
    }

    /// The positional sheet row: id, brandId, templateId, dataJson, createdAt, slug, updatedAt.
    pub fn to_row(&self) -> Result<Vec<String>, serde_json::Error> {
        Ok(vec![
            self.id.clone(),
            self.brand_id.clone(),
            self.template_id.clone(),
            self.to_record()?,
            self.created_at.to_rfc3339(),
            self.slug.clone(),
            self.updated_at.to_rfc3339(),
        ])
    }
}

/// Read a column from a possibly short row.
pub fn cell(row: &[String], col: usize) -> &str {
    row.get(col).map(String::as_str).unwrap_or("")
}
