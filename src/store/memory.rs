use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::store::sheets::{
    validate_row_index, validate_sheet, ErrorCode, HealthStatus, Row, RowStore, SheetsError, ValueRange,
    WriteResult,
};

/// In-process row store with the same addressing rules as the Sheets client.
/// Each sheet keeps its header as row 1. Used by tests and `serve --in-memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: DashMap<String, Vec<Row>>,
    appends: AtomicU64,
    updates: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with the events and analytics sheets created and headed.
    pub fn with_default_sheets() -> Self {
        let store = Self::new();
        store.create_sheet(crate::models::event::EVENTS_SHEET, crate::models::event::EVENTS_HEADER);
        store.create_sheet(
            crate::models::analytics::ANALYTICS_SHEET,
            crate::models::analytics::ANALYTICS_HEADER,
        );
        store
    }

    pub fn create_sheet(&self, name: &str, header: &[&str]) {
        self.sheets
            .insert(name.to_string(), vec![header.iter().map(|h| h.to_string()).collect()]);
    }

    /// Data rows (header excluded).
    pub fn rows(&self, sheet: &str) -> Vec<Row> {
        self.sheets
            .get(sheet)
            .map(|rows| rows.iter().skip(1).cloned().collect())
            .unwrap_or_default()
    }

    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Make every call fail with `NETWORK_ERROR`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), SheetsError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SheetsError {
                retryable: false,
                ..SheetsError::new(ErrorCode::NetworkError, "store is offline")
            });
        }
        Ok(())
    }

    fn read(&self, sheet: &str, range: &str) -> Result<Vec<Row>, SheetsError> {
        let rows = self
            .sheets
            .get(sheet)
            .ok_or_else(|| SheetsError::new(ErrorCode::InvalidRange, format!("Unable to parse range: {}", sheet)))?;
        let (start, end) = parse_row_bounds(range)?;
        let from = start.saturating_sub(1);
        let to = end.unwrap_or(rows.len()).min(rows.len());
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(rows[from..to].to_vec())
    }
}

/// Extract 1-based inclusive row bounds from an A1 range such as `A2:G`,
/// `A2:G10` or `A:A`.
fn parse_row_bounds(range: &str) -> Result<(usize, Option<usize>), SheetsError> {
    fn row_of(part: &str) -> Result<Option<usize>, SheetsError> {
        let digits: String = part.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
        if digits.is_empty() {
            return Ok(None);
        }
        digits
            .parse::<usize>()
            .map(Some)
            .map_err(|_| SheetsError::new(ErrorCode::InvalidRange, format!("Unable to parse range: {}", part)))
    }

    let mut parts = range.splitn(2, ':');
    let start = row_of(parts.next().unwrap_or_default())?.unwrap_or(1);
    let end = match parts.next() {
        Some(p) => row_of(p)?,
        None => Some(start),
    };
    Ok((start.max(1), end))
}

fn to_cells(row: Vec<Value>) -> Row {
    row.into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn get_values(&self, sheet: &str, range: &str) -> Result<Vec<Row>, SheetsError> {
        self.check_online()?;
        validate_sheet(sheet)?;
        self.read(sheet, range)
    }

    async fn batch_get(&self, ranges: &[String]) -> Result<Vec<ValueRange>, SheetsError> {
        self.check_online()?;
        ranges
            .iter()
            .map(|full| {
                let (sheet, range) = full.split_once('!').unwrap_or((full.as_str(), "A:Z"));
                Ok(ValueRange {
                    range: full.clone(),
                    values: self.read(sheet, range)?,
                })
            })
            .collect()
    }

    async fn append(&self, sheet: &str, row: Vec<Value>) -> Result<WriteResult, SheetsError> {
        self.check_online()?;
        validate_sheet(sheet)?;
        let mut rows = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| SheetsError::new(ErrorCode::InvalidRange, format!("Unable to parse range: {}", sheet)))?;
        rows.push(to_cells(row));
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(WriteResult { updated_rows: 1 })
    }

    async fn update(&self, sheet: &str, row_index: usize, row: Vec<Value>) -> Result<WriteResult, SheetsError> {
        self.check_online()?;
        validate_sheet(sheet)?;
        validate_row_index(row_index)?;
        let mut rows = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| SheetsError::new(ErrorCode::InvalidRange, format!("Unable to parse range: {}", sheet)))?;
        let Some(slot) = rows.get_mut(row_index) else {
            return Ok(WriteResult { updated_rows: 0 });
        };
        *slot = to_cells(row);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(WriteResult { updated_rows: 1 })
    }

    async fn health_check(&self) -> HealthStatus {
        match self.check_online() {
            Ok(()) => HealthStatus {
                connected: true,
                latency_ms: 0,
                error: None,
            },
            Err(e) => HealthStatus {
                connected: false,
                latency_ms: 0,
                error: Some(e.code.to_string()),
            },
        }
    }
}
