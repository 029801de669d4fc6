use crate::models::ProviderIdentifier;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const RECENT_DAYS: usize = 7;

/// One UTC calendar day of usage for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub included_requests: f64,
    pub billed_requests: f64,
    pub gross_amount: f64,
    pub billed_amount: f64,
}

impl DailyUsage {
    pub fn is_weekend(&self) -> bool {
        is_weekend(self.date)
    }

    /// Derives a day's sample from a cumulative counter for the billing period.
    ///
    /// `used` is the period total so far. Requests already attributed to earlier
    /// days of the same period are subtracted; whatever is left splits into
    /// included and billed at the entitlement boundary.
    pub fn from_cumulative(
        date: NaiveDate,
        history: &UsageHistory,
        used: f64,
        entitlement: f64,
        unit_rate: f64,
    ) -> Self {
        let earlier: Vec<&DailyUsage> = history
            .days
            .iter()
            .filter(|d| d.date < date && same_month(d.date, date))
            .collect();
        let included_before: f64 = earlier.iter().map(|d| d.included_requests).sum();
        let billed_before: f64 = earlier.iter().map(|d| d.billed_requests).sum();

        let used = used.max(0.0);
        let entitlement = entitlement.max(0.0);
        let included_requests = (used.min(entitlement) - included_before).max(0.0);
        let billed_requests = ((used - entitlement).max(0.0) - billed_before).max(0.0);

        Self {
            date,
            included_requests,
            billed_requests,
            gross_amount: (included_requests + billed_requests) * unit_rate,
            billed_amount: billed_requests * unit_rate,
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageHistory {
    pub fetched_at: DateTime<Utc>,
    /// Sorted by date, oldest first
    pub days: Vec<DailyUsage>,
}

impl UsageHistory {
    pub fn empty() -> Self {
        Self {
            fetched_at: Utc::now(),
            days: Vec::new(),
        }
    }

    pub fn total_included_requests(&self) -> f64 {
        self.days.iter().map(|d| d.included_requests).sum()
    }

    pub fn total_billed_amount(&self) -> f64 {
        self.days.iter().map(|d| d.billed_amount).sum()
    }

    /// The most recent week, newest first. Display only.
    pub fn recent_days(&self) -> Vec<&DailyUsage> {
        let mut days: Vec<&DailyUsage> = self.days.iter().collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));
        days.truncate(RECENT_DAYS);
        days
    }

    /// Inserts or replaces the sample for `day.date` and drops anything outside
    /// the billing month of the newest stored date. A sample older than that
    /// month is discarded.
    fn upsert(&mut self, day: DailyUsage) {
        let date = day.date;
        let newest = self
            .days
            .iter()
            .map(|d| d.date)
            .max()
            .map_or(date, |n| n.max(date));
        if !same_month(date, newest) {
            tracing::debug!(%date, %newest, "sample before current period dropped");
            return;
        }
        self.days.retain(|d| d.date != date && same_month(d.date, newest));
        self.days.push(day);
        self.days.sort_by_key(|d| d.date);
    }
}

pub trait HistoryStore: Send + Sync {
    fn append(&self, provider: ProviderIdentifier, day: DailyUsage) -> Result<()>;
    fn load(&self, provider: ProviderIdentifier) -> Result<UsageHistory>;
}

/// One pretty-printed JSON file per provider.
pub struct JsonHistoryStore {
    dir: PathBuf,
}

impl JsonHistoryStore {
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usagebar")
            .join("history")
    }

    pub fn new() -> Self {
        Self::with_dir(Self::default_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, provider: ProviderIdentifier) -> PathBuf {
        self.dir.join(format!("{}.json", provider.as_str()))
    }

    fn read(path: &Path) -> Result<Option<UsageHistory>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let history = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(history))
    }

    fn write(path: &Path, history: &UsageHistory) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(history)?;
        std::fs::write(&temp_path, content)
            .with_context(|| format!("writing {}", temp_path.display()))?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

impl Default for JsonHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, provider: ProviderIdentifier, day: DailyUsage) -> Result<()> {
        let path = self.path_for(provider);
        let mut history = Self::read(&path)?.unwrap_or_else(UsageHistory::empty);
        let date = day.date;
        history.upsert(day);
        history.fetched_at = Utc::now();
        Self::write(&path, &history)?;

        tracing::debug!(
            provider = %provider,
            %date,
            days = history.days.len(),
            "history sample recorded"
        );
        Ok(())
    }

    fn load(&self, provider: ProviderIdentifier) -> Result<UsageHistory> {
        Ok(Self::read(&self.path_for(provider))?.unwrap_or_else(UsageHistory::empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample(date: NaiveDate, included: f64) -> DailyUsage {
        DailyUsage {
            date,
            included_requests: included,
            billed_requests: 0.0,
            gross_amount: included * 0.04,
            billed_amount: 0.0,
        }
    }

    #[test]
    fn test_is_weekend_uses_calendar_day() {
        // 2026-01-17 is a Saturday
        assert!(sample(date(2026, 1, 17), 1.0).is_weekend());
        assert!(sample(date(2026, 1, 18), 1.0).is_weekend());
        assert!(!sample(date(2026, 1, 19), 1.0).is_weekend());
    }

    #[test]
    fn test_totals_and_recent_days() {
        let history = UsageHistory {
            fetched_at: Utc::now(),
            days: (1..=10)
                .map(|d| DailyUsage {
                    billed_amount: 0.5,
                    ..sample(date(2026, 1, d), d as f64)
                })
                .collect(),
        };

        assert_eq!(history.total_included_requests(), 55.0);
        assert_eq!(history.total_billed_amount(), 5.0);

        let recent: Vec<u32> = history.recent_days().iter().map(|d| d.date.day()).collect();
        assert_eq!(recent, vec![10, 9, 8, 7, 6, 5, 4]);
    }

    #[test]
    fn test_from_cumulative_splits_at_entitlement() {
        let mut history = UsageHistory::empty();
        history.upsert(sample(date(2026, 1, 1), 250.0));
        history.upsert(sample(date(2026, 1, 2), 200.0));

        // 520 used of 500: 50 more included and 20 billed today
        let day = DailyUsage::from_cumulative(date(2026, 1, 3), &history, 520.0, 500.0, 0.04);
        assert_eq!(day.included_requests, 50.0);
        assert_eq!(day.billed_requests, 20.0);
        assert!((day.billed_amount - 0.8).abs() < 1e-9);
        assert!((day.gross_amount - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_from_cumulative_ignores_previous_month() {
        let mut history = UsageHistory::empty();
        history.upsert(sample(date(2026, 1, 31), 900.0));

        let day = DailyUsage::from_cumulative(date(2026, 2, 1), &history, 40.0, 300.0, 0.04);
        assert_eq!(day.included_requests, 40.0);
        assert_eq!(day.billed_requests, 0.0);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_dir(dir.path());
        let history = store.load(ProviderIdentifier::Copilot).unwrap();
        assert!(history.days.is_empty());
    }

    #[test]
    fn test_append_replaces_same_day_and_trims_period() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_dir(dir.path().join("history"));
        let id = ProviderIdentifier::Copilot;

        store.append(id, sample(date(2026, 1, 30), 10.0)).unwrap();
        store.append(id, sample(date(2026, 2, 2), 20.0)).unwrap();
        store.append(id, sample(date(2026, 2, 1), 30.0)).unwrap();
        store.append(id, sample(date(2026, 2, 2), 25.0)).unwrap();

        let history = store.load(id).unwrap();
        assert_eq!(
            history.days,
            vec![sample(date(2026, 2, 1), 30.0), sample(date(2026, 2, 2), 25.0)]
        );
        assert!(store.path_for(id).ends_with("copilot.json"));
        assert!(!store.path_for(id).with_extension("tmp").exists());
    }

    #[test]
    fn test_late_sample_for_previous_month_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_dir(dir.path());
        let id = ProviderIdentifier::Copilot;

        store.append(id, sample(date(2026, 2, 1), 30.0)).unwrap();
        store.append(id, sample(date(2026, 2, 2), 20.0)).unwrap();
        store.append(id, sample(date(2026, 1, 31), 90.0)).unwrap();

        let history = store.load(id).unwrap();
        assert_eq!(
            history.days,
            vec![sample(date(2026, 2, 1), 30.0), sample(date(2026, 2, 2), 20.0)]
        );
    }

    #[test]
    fn test_providers_are_stored_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_dir(dir.path());

        store
            .append(ProviderIdentifier::Copilot, sample(date(2026, 3, 1), 1.0))
            .unwrap();
        assert!(store.load(ProviderIdentifier::NanoGpt).unwrap().days.is_empty());
    }

    #[test]
    fn test_history_round_trip() {
        let history = UsageHistory {
            fetched_at: Utc::now(),
            days: vec![sample(date(2026, 1, 5), 12.5)],
        };
        let json = serde_json::to_string(&history).unwrap();
        let back: UsageHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
        assert!(json.contains("\"2026-01-05\""));
    }
}
