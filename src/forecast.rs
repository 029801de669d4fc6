use crate::history::{is_weekend, DailyUsage, UsageHistory};
use chrono::{Datelike, Days, NaiveDate, Utc};
use serde::Serialize;

/// Most recent day first.
const RECENCY_WEIGHTS: [f64; 7] = [1.5, 1.5, 1.2, 1.2, 1.2, 1.0, 1.0];
pub const DEFAULT_COST_PER_REQUEST: f64 = 0.04;
/// Assumed weekend share of weekday usage when no weekend was sampled.
const WEEKEND_FALLBACK_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    fn for_sample_size(days: usize) -> Self {
        if days < 3 {
            ConfidenceLevel::Low
        } else if days < 7 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsagePrediction {
    pub predicted_monthly_requests: f64,
    pub predicted_billed_amount: f64,
    pub confidence_level: ConfidenceLevel,
    pub days_used_for_prediction: usize,
}

impl UsagePrediction {
    fn zero() -> Self {
        Self {
            predicted_monthly_requests: 0.0,
            predicted_billed_amount: 0.0,
            confidence_level: ConfidenceLevel::Low,
            days_used_for_prediction: 0,
        }
    }
}

/// Month-end projection from daily samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecaster {
    pub cost_per_request: f64,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self {
            cost_per_request: DEFAULT_COST_PER_REQUEST,
        }
    }
}

impl Forecaster {
    pub fn new(cost_per_request: f64) -> Self {
        Self { cost_per_request }
    }

    pub fn predict(&self, history: &UsageHistory, entitlement: f64) -> UsagePrediction {
        self.predict_on(history, entitlement, Utc::now().date_naive())
    }

    /// Same as [`Forecaster::predict`] with an explicit UTC "today".
    pub fn predict_on(
        &self,
        history: &UsageHistory,
        entitlement: f64,
        today: NaiveDate,
    ) -> UsagePrediction {
        if history.days.is_empty() {
            return UsagePrediction::zero();
        }

        let daily = weighted_average(&history.days);
        let ratio = weekend_ratio(&history.days);
        let (weekdays, weekends) = remaining_days(today);

        let predicted = history.total_included_requests()
            + daily * weekdays as f64
            + daily * ratio * weekends as f64;

        let billed = if predicted > entitlement {
            (predicted - entitlement) * self.cost_per_request
        } else {
            0.0
        };

        UsagePrediction {
            predicted_monthly_requests: predicted,
            predicted_billed_amount: billed.max(0.0),
            confidence_level: ConfidenceLevel::for_sample_size(history.days.len()),
            days_used_for_prediction: history.days.len(),
        }
    }
}

/// Recency-weighted mean of the latest week's included requests.
fn weighted_average(days: &[DailyUsage]) -> f64 {
    let mut sorted: Vec<&DailyUsage> = days.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    let (sum, total_weight) = sorted
        .iter()
        .zip(RECENCY_WEIGHTS)
        .fold((0.0, 0.0), |(sum, weights), (day, weight)| {
            (sum + day.included_requests * weight, weights + weight)
        });

    if total_weight > 0.0 {
        sum / total_weight
    } else {
        0.0
    }
}

/// Weekend average over weekday average across the whole history.
fn weekend_ratio(days: &[DailyUsage]) -> f64 {
    let (weekend, weekday): (Vec<&DailyUsage>, Vec<&DailyUsage>) =
        days.iter().partition(|d| d.is_weekend());

    let average = |days: &[&DailyUsage]| {
        if days.is_empty() {
            0.0
        } else {
            days.iter().map(|d| d.included_requests).sum::<f64>() / days.len() as f64
        }
    };
    let weekend_avg = average(&weekend);
    let weekday_avg = average(&weekday);

    if weekday_avg == 0.0 {
        1.0
    } else if weekend_avg == 0.0 {
        WEEKEND_FALLBACK_RATIO
    } else {
        weekend_avg / weekday_avg
    }
}

/// Weekday and weekend counts for the days after `today` in its month.
fn remaining_days(today: NaiveDate) -> (u32, u32) {
    let remaining = days_in_month(today) - today.day();
    (1..=remaining)
        .filter_map(|offset| today.checked_add_days(Days::new(u64::from(offset))))
        .fold((0, 0), |(weekdays, weekends), date| {
            if is_weekend(date) {
                (weekdays, weekends + 1)
            } else {
                (weekdays + 1, weekends)
            }
        })
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}
