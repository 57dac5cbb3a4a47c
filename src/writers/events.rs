//! Event creation: slug and identifier generation, idempotent duplicate
//! detection, and the single append that persists the row.
//!
//! Duplicate detection is a read-then-append scan, so it is best effort. Two
//! requests racing on the same logical event can both miss each other's
//! uncommitted row and both append; the sheet offers no lock to prevent it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::errors::WriteError;
use crate::middleware::sanitize::sanitize_row;
use crate::models::event::{
    cell, Bracket, CallToAction, Event, EventLinks, EventSettings, ScheduleItem, Standing, COL_BRAND, COL_DATA,
    COL_ID, COL_SLUG, EVENTS_DATA_RANGE, EVENTS_SHEET, MAX_SLUG_LEN,
};
use crate::store::sheets::{Row, SharedStore};

/// Highest numeric suffix tried before falling back to a timestamp suffix.
pub const MAX_SLUG_SUFFIX: u32 = 99;
pub const DEFAULT_BRAND: &str = "root";
pub const DEFAULT_TEMPLATE: &str = "event";
const MAX_NAME_CHARS: usize = 200;
pub const MAX_ID_ATTEMPTS: u32 = 5;

static NON_SLUG_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ── Inputs / Outputs ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventInput {
    pub name: Option<String>,
    #[serde(rename = "startDateISO")]
    pub start_date: Option<String>,
    pub venue: Option<String>,
    pub brand_id: Option<String>,
    pub template_id: Option<String>,
    pub settings: Option<EventSettings>,
    pub schedule: Option<Vec<ScheduleItem>>,
    pub standings: Option<Vec<Standing>>,
    pub bracket: Option<Bracket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEventResult {
    pub event: Event,
    /// True when an existing event with the same idempotency key was returned
    /// instead of writing a new row.
    pub duplicate: bool,
}

// ── Pure helpers ─────────────────────────────────────────────

/// Lower-case, collapse every run of non `[a-z0-9]` into one hyphen, trim
/// hyphens, cap at [`MAX_SLUG_LEN`]. Never empty: falls back to `event`.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let collapsed = NON_SLUG_RUN.replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');
    let truncated: String = trimmed.chars().take(MAX_SLUG_LEN).collect();
    let slug = truncated.trim_end_matches('-');
    if slug.is_empty() {
        "event".to_string()
    } else {
        slug.to_string()
    }
}

fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_SLUG_LEN.saturating_sub(suffix.len() + 1);
    let head: String = base.chars().take(room).collect();
    let head = head.trim_end_matches('-');
    let head = if head.is_empty() { "event" } else { head };
    format!("{}-{}", head, suffix)
}

/// First free slug among `base`, `base-2` ... `base-99`; after that,
/// `base-<epoch millis>`. The timestamp fallback always terminates but is not
/// guaranteed collision-free under heavy concurrent creation.
pub fn unique_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    for n in 2..=MAX_SLUG_SUFFIX {
        let candidate = with_suffix(base, &n.to_string());
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
    let fallback = with_suffix(base, &Utc::now().timestamp_millis().to_string());
    tracing::warn!(base = base, slug = %fallback, "slug suffixes exhausted, using timestamp suffix");
    fallback
}

/// Time-derived base plus a short random component.
pub fn generate_event_id() -> String {
    let mut random = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut random);
    format!("evt-{:x}-{}", Utc::now().timestamp_millis(), hex::encode(random))
}

/// Draw ids from `generate` until one is not in `taken`, giving up after
/// [`MAX_ID_ATTEMPTS`].
pub fn fresh_event_id(taken: &HashSet<String>, mut generate: impl FnMut() -> String) -> Result<String, WriteError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = generate();
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(WriteError::IdCollision {
        attempts: MAX_ID_ATTEMPTS,
    })
}

/// `BRAND-YYYYMMDD-XXXXXX`, deterministic in (brand, slug, date).
pub fn display_tag(brand_id: &str, slug: &str, date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", brand_id, slug, date).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}-{}-{}",
        brand_id.to_ascii_uppercase(),
        date.format("%Y%m%d"),
        digest[..6].to_ascii_uppercase()
    )
}

fn normalize_component(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").to_lowercase()
}

/// Digest of the normalized (name, date, brand, venue) tuple.
pub fn idempotency_key(name: &str, date: NaiveDate, brand_id: &str, venue: &str) -> String {
    let joined = [
        normalize_component(name),
        date.format("%Y-%m-%d").to_string(),
        normalize_component(brand_id),
        normalize_component(venue),
    ]
    .join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn parse_start_date(raw: &str) -> Result<NaiveDate, WriteError> {
    let trimmed = raw.trim();
    let date_part = trimmed.split('T').next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| WriteError::MalformedDate(raw.to_string()))
}

/// What one pass over the events sheet tells us about a brand.
#[derive(Debug, Default)]
struct BrandScan {
    ids: HashSet<String>,
    slugs: HashSet<String>,
    existing: Option<Event>,
}

fn scan_rows(rows: &[Row], brand_id: &str, key: &str) -> BrandScan {
    let mut scan = BrandScan::default();
    for row in rows {
        let id = cell(row, COL_ID);
        if id.is_empty() {
            continue;
        }
        scan.ids.insert(id.to_string());
        if !cell(row, COL_BRAND).eq_ignore_ascii_case(brand_id) {
            continue;
        }
        scan.slugs.insert(cell(row, COL_SLUG).to_string());

        let data = cell(row, COL_DATA);
        if scan.existing.is_none() && data.contains(key) {
            match Event::from_record(data) {
                Ok(event) if event.idempotency_key == key => scan.existing = Some(event),
                Ok(_) => {}
                Err(e) => tracing::warn!(event_id = id, "skipping unreadable event row: {}", e),
            }
        }
    }
    scan
}

// ── Writer ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventWriter {
    store: SharedStore,
    config: Arc<Config>,
}

impl EventWriter {
    pub fn new(store: SharedStore, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    fn links_for(&self, brand_id: &str, slug: &str, id: &str) -> EventLinks {
        let base = self.config.public_base_url.trim_end_matches('/');
        EventLinks {
            public_url: format!("{}/{}/e/{}", base, brand_id, slug),
            display_url: format!("{}/{}/display?event={}", base, brand_id, urlencoding::encode(id)),
            poster_url: format!("{}/{}/poster?event={}", base, brand_id, urlencoding::encode(id)),
        }
    }

    /// Create an event, or return the existing one when the same
    /// (name, date, brand, venue) was already submitted.
    pub async fn create_event(&self, input: CreateEventInput) -> Result<CreateEventResult, WriteError> {
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WriteError::MissingField("name"))?
            .to_string();
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(WriteError::InvalidField {
                field: "name",
                reason: format!("longer than {} characters", MAX_NAME_CHARS),
            });
        }
        let raw_date = input
            .start_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(WriteError::MissingField("startDateISO"))?;
        let start_date = parse_start_date(raw_date)?;
        let venue = input.venue.as_deref().map(str::trim).unwrap_or_default().to_string();

        let brand_id = input
            .brand_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BRAND)
            .to_ascii_lowercase();
        if !self.config.is_known_brand(&brand_id) {
            return Err(WriteError::UnknownBrand(brand_id));
        }
        let template_id = input
            .template_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();

        let key = idempotency_key(&name, start_date, &brand_id, &venue);

        let rows = self.store.get_values(EVENTS_SHEET, EVENTS_DATA_RANGE).await?;
        let scan = scan_rows(&rows, &brand_id, &key);

        if let Some(existing) = scan.existing {
            tracing::info!(
                event_id = %existing.id,
                brand = %brand_id,
                "duplicate create request, returning existing event"
            );
            return Ok(CreateEventResult {
                event: existing,
                duplicate: true,
            });
        }

        let slug = unique_slug(&slugify(&name), &scan.slugs);
        let id = fresh_event_id(&scan.ids, generate_event_id)?;

        let now = Utc::now();
        let mut settings = input.settings.unwrap_or_default();
        settings.show_schedule |= input.schedule.as_ref().is_some_and(|s| !s.is_empty());
        settings.show_standings |= input.standings.as_ref().is_some_and(|s| !s.is_empty());
        settings.show_bracket |= input.bracket.as_ref().is_some_and(|b| !b.is_empty());

        let links = self.links_for(&brand_id, &slug, &id);
        let event = Event {
            tag: display_tag(&brand_id, &slug, start_date),
            cta: Some(CallToAction {
                label: "View event".to_string(),
                url: links.public_url.clone(),
            }),
            links,
            id,
            brand_id,
            template_id,
            name,
            start_date,
            venue,
            slug,
            schedule: input.schedule,
            standings: input.standings,
            bracket: input.bracket,
            settings,
            idempotency_key: key,
            created_at: now,
            updated_at: now,
        };
        event
            .validate()
            .map_err(|e| WriteError::InvalidField { field: "event", reason: e.to_string() })?;

        let row: Vec<Value> = event.to_row()?.into_iter().map(Value::String).collect();
        let result = self.store.append(EVENTS_SHEET, sanitize_row(row)).await?;
        if result.updated_rows != 1 {
            return Err(WriteError::UnexpectedRowCount {
                expected: 1,
                actual: result.updated_rows,
            });
        }

        tracing::info!(event_id = %event.id, brand = %event.brand_id, slug = %event.slug, "event created");
        Ok(CreateEventResult { event, duplicate: false })
    }
}
