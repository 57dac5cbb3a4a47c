//! Partial updates of an event's schedule, standings and bracket.
//!
//! Every update is load, merge, save against one full row. The store has no
//! compare-and-swap, so a concurrent writer that saves between our load and
//! our save loses its changes: last write wins at row granularity.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WriteError;
use crate::middleware::sanitize::sanitize_row;
use crate::models::analytics::Metric;
use crate::models::event::{
    cell, Bracket, Event, ScheduleItem, Standing, COL_BRAND, COL_DATA, COL_ID, EVENTS_DATA_RANGE, EVENTS_SHEET,
};
use crate::store::sheets::SharedStore;
use crate::writers::analytics::AnalyticsWriter;

const MAX_ID_LEN: usize = 64;

static ID_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubResource {
    Schedule,
    Standings,
    Bracket,
}

impl SubResource {
    /// The analytics metric logged when only this sub-resource changed.
    pub fn metric(&self) -> Metric {
        match self {
            SubResource::Schedule => Metric::ScheduleUpdate,
            SubResource::Standings => Metric::StandingsUpdate,
            SubResource::Bracket => Metric::BracketUpdate,
        }
    }
}

/// Request body for a result update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultUpdate {
    pub schedule: Option<Vec<ScheduleItem>>,
    pub standings: Option<Vec<Standing>>,
    pub bracket: Option<Bracket>,
    pub brand_id: Option<String>,
}

impl ResultUpdate {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_none() && self.standings.is_none() && self.bracket.is_none()
    }
}

/// A parsed event plus its 1-based data-row index, needed to write it back.
#[derive(Debug, Clone)]
pub struct LoadedEvent {
    pub event: Event,
    pub row_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResultOutcome {
    pub event: Event,
    pub updated: Vec<SubResource>,
}

fn validate_id(id: &str) -> Result<(), WriteError> {
    if id.is_empty() || id.len() > MAX_ID_LEN || !ID_SHAPE.is_match(id) {
        return Err(WriteError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Replace the sub-resources present in `update` and refresh `updated_at`.
/// Display toggles are switched on for non-empty data and never switched off.
pub fn merge_result_updates(event: &mut Event, update: &ResultUpdate) -> Vec<SubResource> {
    let mut updated = Vec::new();

    if let Some(schedule) = &update.schedule {
        if !schedule.is_empty() {
            event.settings.show_schedule = true;
        }
        event.schedule = Some(schedule.clone());
        updated.push(SubResource::Schedule);
    }
    if let Some(standings) = &update.standings {
        if !standings.is_empty() {
            event.settings.show_standings = true;
        }
        event.standings = Some(standings.clone());
        updated.push(SubResource::Standings);
    }
    if let Some(bracket) = &update.bracket {
        if !bracket.is_empty() {
            event.settings.show_bracket = true;
        }
        event.bracket = Some(bracket.clone());
        updated.push(SubResource::Bracket);
    }

    if !updated.is_empty() {
        event.updated_at = Utc::now();
    }
    updated
}

#[derive(Clone)]
pub struct ResultWriter {
    store: SharedStore,
    analytics: Option<AnalyticsWriter>,
}

impl ResultWriter {
    pub fn new(store: SharedStore, analytics: Option<AnalyticsWriter>) -> Self {
        Self { store, analytics }
    }

    /// Linear scan of the events sheet for `id`, optionally restricted to a brand.
    pub async fn find_event_by_id(&self, id: &str, brand_id: Option<&str>) -> Result<LoadedEvent, WriteError> {
        let id = id.trim();
        validate_id(id)?;

        let rows = self.store.get_values(EVENTS_SHEET, EVENTS_DATA_RANGE).await?;
        let (position, row) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| {
                cell(row, COL_ID) == id
                    && brand_id.map_or(true, |brand| cell(row, COL_BRAND).eq_ignore_ascii_case(brand.trim()))
            })
            .ok_or_else(|| WriteError::NotFound(id.to_string()))?;

        let data = cell(row, COL_DATA);
        if data.trim().is_empty() {
            return Err(WriteError::MissingData(id.to_string()));
        }
        let event = Event::from_record(data).map_err(|e| WriteError::Parse {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        if event.id != id {
            return Err(WriteError::Parse {
                id: id.to_string(),
                reason: format!("stored record carries id '{}'", event.id),
            });
        }

        Ok(LoadedEvent {
            event,
            row_index: position + 1,
        })
    }

    /// Overwrite the event's row in place; exactly one row must be affected.
    pub async fn save_event_row(&self, event: &Event, row_index: usize) -> Result<(), WriteError> {
        let row: Vec<Value> = event.to_row()?.into_iter().map(Value::String).collect();
        let result = self.store.update(EVENTS_SHEET, row_index, sanitize_row(row)).await?;
        if result.updated_rows != 1 {
            return Err(WriteError::UnexpectedRowCount {
                expected: 1,
                actual: result.updated_rows,
            });
        }
        Ok(())
    }

    pub async fn record_result(&self, id: &str, update: ResultUpdate) -> Result<RecordResultOutcome, WriteError> {
        if update.is_empty() {
            return Err(WriteError::NoUpdates);
        }

        let LoadedEvent { mut event, row_index } = self.find_event_by_id(id, update.brand_id.as_deref()).await?;
        let updated = merge_result_updates(&mut event, &update);
        self.save_event_row(&event, row_index).await?;

        tracing::info!(
            event_id = %event.id,
            row_index = row_index,
            updated = ?updated,
            "event results saved"
        );

        if let Some(analytics) = &self.analytics {
            let metric = match updated.as_slice() {
                [only] => only.metric(),
                _ => Metric::ResultUpdate,
            };
            analytics.log_result_update_async(event.id.clone(), metric);
        }

        Ok(RecordResultOutcome { event, updated })
    }

    pub async fn update_schedule(&self, id: &str, schedule: Vec<ScheduleItem>) -> Result<RecordResultOutcome, WriteError> {
        self.record_result(
            id,
            ResultUpdate {
                schedule: Some(schedule),
                ..ResultUpdate::default()
            },
        )
        .await
    }

    pub async fn update_standings(&self, id: &str, standings: Vec<Standing>) -> Result<RecordResultOutcome, WriteError> {
        self.record_result(
            id,
            ResultUpdate {
                standings: Some(standings),
                ..ResultUpdate::default()
            },
        )
        .await
    }

    pub async fn update_bracket(&self, id: &str, bracket: Bracket) -> Result<RecordResultOutcome, WriteError> {
        self.record_result(
            id,
            ResultUpdate {
                bracket: Some(bracket),
                ..ResultUpdate::default()
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Environment};
    use crate::models::analytics::ANALYTICS_SHEET;
    use crate::models::event::{BracketMatch, COL_UPDATED};
    use crate::store::memory::MemoryStore;
    use crate::store::sheets::RowStore;
    use crate::writers::events::{CreateEventInput, EventWriter};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        events: EventWriter,
        results: ResultWriter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::with_default_sheets());
        let analytics = AnalyticsWriter::new(store.clone(), Environment::Dev);
        Fixture {
            events: EventWriter::new(store.clone(), Arc::new(Config::default())),
            results: ResultWriter::new(store.clone(), Some(analytics)),
            store,
        }
    }

    fn schedule() -> Vec<ScheduleItem> {
        vec![
            ScheduleItem {
                time: "18:00".into(),
                activity: "Check-in".into(),
                notes: None,
            },
            ScheduleItem {
                time: "18:30".into(),
                activity: "Round 1".into(),
                notes: Some("Courts 1-4".into()),
            },
        ]
    }

    fn bracket() -> Bracket {
        Bracket {
            kind: Some("single".into()),
            rounds: Some(2),
            matches: vec![BracketMatch {
                id: "m1".into(),
                round: 1,
                position: 1,
                team1: Some("Team A".into()),
                team2: Some("Team B".into()),
                score1: None,
                score2: None,
                winner: None,
            }],
        }
    }

    async fn seed(f: &Fixture, name: &str) -> Event {
        f.events
            .create_event(CreateEventInput {
                name: Some(name.into()),
                start_date: Some("2025-06-01".into()),
                venue: Some("Park".into()),
                schedule: Some(schedule()),
                bracket: Some(bracket()),
                ..CreateEventInput::default()
            })
            .await
            .unwrap()
            .event
    }

    #[tokio::test]
    async fn test_find_event_reports_row_position() {
        let f = fixture();
        let first = seed(&f, "Bocce Night").await;
        let second = seed(&f, "Trivia Night").await;

        let loaded = f.results.find_event_by_id(&second.id, None).await.unwrap();
        assert_eq!(loaded.row_index, 2);
        assert_eq!(loaded.event, second);

        let loaded = f.results.find_event_by_id(&first.id, Some("ROOT")).await.unwrap();
        assert_eq!(loaded.row_index, 1);
    }

    #[tokio::test]
    async fn test_find_event_failures() {
        let f = fixture();
        let event = seed(&f, "Bocce Night").await;

        assert!(matches!(
            f.results.find_event_by_id("", None).await,
            Err(WriteError::InvalidId(_))
        ));
        assert!(matches!(
            f.results.find_event_by_id("evt-1; DROP", None).await,
            Err(WriteError::InvalidId(_))
        ));
        assert!(matches!(
            f.results.find_event_by_id("evt-missing", None).await,
            Err(WriteError::NotFound(_))
        ));
        assert!(matches!(
            f.results.find_event_by_id(&event.id, Some("other")).await,
            Err(WriteError::NotFound(_))
        ));

        f.store
            .append(EVENTS_SHEET, vec![json!("evt-empty"), json!("root"), json!("event"), json!("")])
            .await
            .unwrap();
        assert!(matches!(
            f.results.find_event_by_id("evt-empty", None).await,
            Err(WriteError::MissingData(_))
        ));

        f.store
            .append(EVENTS_SHEET, vec![json!("evt-bad"), json!("root"), json!("event"), json!("{oops")])
            .await
            .unwrap();
        assert!(matches!(
            f.results.find_event_by_id("evt-bad", None).await,
            Err(WriteError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_standings_only_leaves_other_fields_identical() {
        let f = fixture();
        let event = seed(&f, "Bocce Night").await;
        let before = f.results.find_event_by_id(&event.id, None).await.unwrap().event;

        let standings = vec![Standing {
            rank: 1,
            name: "Team A".into(),
            score: 21.0,
            stats: Some(json!({"wins": 2, "losses": 0})),
        }];
        let outcome = f.results.update_standings(&event.id, standings.clone()).await.unwrap();
        assert_eq!(outcome.updated, vec![SubResource::Standings]);

        let after = f.results.find_event_by_id(&event.id, None).await.unwrap().event;
        assert_eq!(
            serde_json::to_string(&after.schedule).unwrap(),
            serde_json::to_string(&before.schedule).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&after.bracket).unwrap(),
            serde_json::to_string(&before.bracket).unwrap()
        );
        assert_eq!(after.standings, Some(standings));
        assert!(after.settings.show_standings);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);

        let rows = f.store.rows(EVENTS_SHEET);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][COL_UPDATED], after.updated_at.to_rfc3339());
    }

    #[test]
    fn test_toggles_never_switch_off() {
        let now = Utc::now();
        let mut event: Event = serde_json::from_value(json!({
            "id": "evt-1", "brandId": "root", "templateId": "event", "name": "x",
            "startDateISO": "2025-06-01", "venue": "", "slug": "x", "tag": "T",
            "settings": {"showSchedule": true}, "idempotencyKey": "k",
            "createdAt": now, "updatedAt": now
        }))
        .unwrap();

        let updated = merge_result_updates(
            &mut event,
            &ResultUpdate {
                schedule: Some(vec![]),
                standings: Some(vec![]),
                ..ResultUpdate::default()
            },
        );
        assert_eq!(updated, vec![SubResource::Schedule, SubResource::Standings]);
        assert!(event.settings.show_schedule);
        assert!(!event.settings.show_standings);
        assert_eq!(event.schedule, Some(vec![]));
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected_without_io() {
        let f = fixture();
        f.store.set_offline(true);
        let err = f.results.record_result("evt-1", ResultUpdate::default()).await.unwrap_err();
        assert!(matches!(err, WriteError::NoUpdates));
    }

    #[tokio::test]
    async fn test_metric_follows_updated_sub_resources() {
        let f = fixture();
        let event = seed(&f, "Bocce Night").await;

        f.results.update_bracket(&event.id, bracket()).await.unwrap();
        f.results
            .record_result(
                &event.id,
                ResultUpdate {
                    schedule: Some(schedule()),
                    standings: Some(vec![]),
                    ..ResultUpdate::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..10 {
            if f.store.rows(ANALYTICS_SHEET).len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let mut metrics: Vec<String> = f.store.rows(ANALYTICS_SHEET).into_iter().map(|r| r[3].clone()).collect();
        metrics.sort();
        assert_eq!(metrics, vec!["bracket_update", "result_update"]);
    }

    #[tokio::test]
    async fn test_analytics_failure_does_not_fail_update() {
        let store = Arc::new(MemoryStore::new());
        store.create_sheet(EVENTS_SHEET, crate::models::event::EVENTS_HEADER);
        // No analytics sheet: the metric append fails in the background.
        let analytics = AnalyticsWriter::new(store.clone(), Environment::Dev);
        let events = EventWriter::new(store.clone(), Arc::new(Config::default()));
        let results = ResultWriter::new(store.clone(), Some(analytics));

        let event = events
            .create_event(CreateEventInput {
                name: Some("Bocce Night".into()),
                start_date: Some("2025-06-01".into()),
                ..CreateEventInput::default()
            })
            .await
            .unwrap()
            .event;

        let outcome = results.update_schedule(&event.id, schedule()).await.unwrap();
        assert!(outcome.event.settings.show_schedule);
    }
}
