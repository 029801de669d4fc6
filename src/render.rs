use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write;
use usagebar::forecast::UsagePrediction;
use usagebar::manager::QuotaAlert;
use usagebar::models::{
    FetchOutcome, ProviderIdentifier, ProviderResult, ProviderUsage, RateWindow,
};

fn by_display_name<'a, T>(
    entries: impl Iterator<Item = (&'a ProviderIdentifier, T)>,
) -> Vec<(ProviderIdentifier, T)> {
    let mut sorted: Vec<(ProviderIdentifier, T)> = entries.map(|(id, v)| (*id, v)).collect();
    sorted.sort_by_key(|(id, _)| id.display_name());
    sorted
}

pub fn status_text(outcome: &FetchOutcome, overage_cost: f64, alerts: &[QuotaAlert]) -> String {
    let mut out = String::new();

    if outcome.is_empty() {
        out.push_str("No providers configured. Add credentials to enable a provider.\n");
        return out;
    }

    for (id, result) in by_display_name(outcome.results.iter()) {
        out.push_str(&provider_text(id, result));
        out.push('\n');
    }

    if !outcome.errors.is_empty() {
        out.push_str("Failures\n");
        for (id, error) in by_display_name(outcome.errors.iter()) {
            let _ = writeln!(out, "  {}: {}", id.display_name(), error);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Total overage cost: ${:.2}", overage_cost);

    let mut alerts: Vec<&QuotaAlert> = alerts.iter().collect();
    alerts.sort_by_key(|a| a.provider.display_name());
    for alert in alerts {
        let _ = writeln!(
            out,
            "Low quota: {} ({:.1}% remaining)",
            alert.provider.display_name(),
            alert.remaining_percentage
        );
    }
    out
}

pub fn provider_text(id: ProviderIdentifier, result: &ProviderResult) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", id.display_name());
    if let Some(plan) = result.details.as_ref().and_then(|d| d.plan.as_deref()) {
        let _ = write!(out, " [{}]", plan);
    }
    out.push('\n');

    match result.usage {
        ProviderUsage::PayAsYouGo {
            utilization_percent,
            cost_spent,
            ..
        } => {
            let _ = writeln!(out, "  {:.0}% used", utilization_percent);
            if let Some(cost) = cost_spent {
                let _ = writeln!(out, "  ${:.2} spent", cost);
            }
        }
        ProviderUsage::QuotaBased {
            remaining,
            entitlement,
            ..
        } => {
            let used = entitlement as i64 - remaining;
            let _ = writeln!(
                out,
                "  {} / {} requests ({:.1}% used)",
                used,
                entitlement,
                result.usage.usage_percentage()
            );
            let overage = result.usage.overage_amount();
            if overage > 0 {
                let _ = writeln!(out, "  {} requests over quota", overage);
            }
        }
    }

    if let Some(details) = &result.details {
        if let Some(window) = &details.secondary_window {
            out.push_str(&window_text(window));
        }
        if let Some(balance) = details.balance {
            let _ = writeln!(out, "  Balance ${:.2}", balance);
        }
        if let (Some(limit), Some(left)) = (details.limit, details.limit_remaining) {
            let _ = writeln!(out, "  ${:.2} of ${:.2} limit left", left, limit);
        }
        if let Some(reset) = &details.reset_period {
            let _ = writeln!(out, "  Resets {}", reset);
        }
    }
    out
}

fn window_text(window: &RateWindow) -> String {
    let mut line = format!("  Secondary window {:.0}% used", window.used_percent);
    if let Some(reset) = &window.reset_description {
        let _ = write!(line, ", resets {}", reset);
    }
    line.push('\n');
    line
}

pub fn status_json(outcome: &FetchOutcome, overage_cost: f64, alerts: &[QuotaAlert]) -> Value {
    let results: BTreeMap<&str, &ProviderResult> = outcome
        .results
        .iter()
        .map(|(id, r)| (id.as_str(), r))
        .collect();
    let errors: BTreeMap<&str, String> = outcome
        .errors
        .iter()
        .map(|(id, e)| (id.as_str(), e.to_string()))
        .collect();

    json!({
        "results": results,
        "errors": errors,
        "total_overage_cost": overage_cost,
        "alerts": alerts,
    })
}

pub fn prediction_text(
    id: ProviderIdentifier,
    prediction: &UsagePrediction,
    entitlement: u64,
) -> String {
    let mut out = format!("{} month-end forecast\n", id.display_name());
    if prediction.days_used_for_prediction == 0 {
        out.push_str("  No history recorded yet. Run `usagebar record` daily.\n");
        return out;
    }
    let _ = writeln!(
        out,
        "  {:.0} of {} requests predicted",
        prediction.predicted_monthly_requests, entitlement
    );
    let _ = writeln!(out, "  ${:.2} predicted overage", prediction.predicted_billed_amount);
    let _ = writeln!(
        out,
        "  Confidence {} ({} days of history)",
        prediction.confidence_level.label(),
        prediction.days_used_for_prediction
    );
    out
}
