use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use usagebar::config::Config;
use usagebar::credentials::{AuthFileStore, CredentialStore};
use usagebar::forecast::Forecaster;
use usagebar::history::{DailyUsage, HistoryStore, JsonHistoryStore};
use usagebar::http::{HttpTransport, ReqwestTransport};
use usagebar::manager::ProviderManager;
use usagebar::models::{ProviderIdentifier, ProviderUsage};
use usagebar::providers::default_providers;

mod render;

#[derive(Parser)]
#[command(name = "usagebar")]
#[command(about = "Track quota and spend across AI coding-assistant providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every configured provider and print usage, failures and alerts
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List known providers and whether they are configured
    List {
        #[arg(long)]
        json: bool,
    },
    /// Fetch a single provider by name
    Provider {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Append today's sample for every quota-based provider to history
    Record,
    /// Predict month-end usage for a provider from recorded history
    Forecast {
        name: String,
        /// Skip the live fetch and use this entitlement
        #[arg(long)]
        entitlement: Option<u64>,
        #[arg(long)]
        json: bool,
    },
}

struct App {
    config: Config,
    credentials: Arc<dyn CredentialStore>,
    manager: ProviderManager,
    history: JsonHistoryStore,
}

impl App {
    fn build() -> Result<Self> {
        let config = Config::load()?;
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(AuthFileStore::load().context("loading credentials")?);
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);

        let manager = ProviderManager::new(
            default_providers(transport, credentials.clone()),
            credentials.clone(),
        )
        .with_disabled(config.disabled_providers())
        .with_overage_rates(config.overage_rates())
        .with_alert_threshold(config.alerts.quota_threshold_percent);

        Ok(Self {
            config,
            credentials,
            manager,
            history: JsonHistoryStore::new(),
        })
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("USAGEBAR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_provider(name: &str) -> Result<ProviderIdentifier> {
    name.parse().map_err(|e: String| anyhow!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app = App::build()?;

    match cli.command {
        Commands::Status { json } => status(&app, json).await,
        Commands::List { json } => {
            list(&app, json);
            Ok(())
        }
        Commands::Provider { name, json } => provider(&app, &name, json).await,
        Commands::Record => record(&app).await,
        Commands::Forecast {
            name,
            entitlement,
            json,
        } => forecast(&app, &name, entitlement, json).await,
    }
}

async fn status(app: &App, as_json: bool) -> Result<()> {
    let outcome = app.manager.fetch_all().await;
    let overage = app.manager.calculate_total_overage_cost(&outcome.results);
    let alerts = app.manager.quota_alerts(&outcome.results);

    if as_json {
        let value = render::status_json(&outcome, overage, &alerts);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", render::status_text(&outcome, overage, &alerts));
    }
    Ok(())
}

fn list(app: &App, as_json: bool) {
    let rows: Vec<_> = ProviderIdentifier::all()
        .into_iter()
        .map(|id| {
            let kind = app.manager.provider(id).map(|p| p.kind());
            (
                id,
                kind,
                app.config.is_provider_enabled(id),
                app.credentials.is_available(id),
            )
        })
        .collect();

    if as_json {
        let value: Vec<_> = rows
            .iter()
            .map(|(id, kind, enabled, configured)| {
                json!({
                    "id": id.as_str(),
                    "name": id.display_name(),
                    "kind": kind,
                    "enabled": enabled,
                    "configured": configured,
                })
            })
            .collect();
        println!("{}", json!(value));
        return;
    }

    for (id, _, enabled, configured) in rows {
        let state = match (enabled, configured) {
            (false, _) => "disabled",
            (true, true) => "configured",
            (true, false) => "no credentials",
        };
        println!("{:<18} {:<16} {}", id.display_name(), id.as_str(), state);
    }
}

async fn provider(app: &App, name: &str, as_json: bool) -> Result<()> {
    let id = parse_provider(name)?;
    let fetcher = app
        .manager
        .provider(id)
        .ok_or_else(|| anyhow!("{} is not available", id.display_name()))?;
    let result = fetcher
        .fetch()
        .await
        .with_context(|| format!("fetching {}", id.display_name()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render::provider_text(id, &result));
    }
    Ok(())
}

async fn record(app: &App) -> Result<()> {
    let outcome = app.manager.fetch_all().await;
    let today = Utc::now().date_naive();
    let rates = app.config.overage_rates();

    for (id, result) in &outcome.results {
        let ProviderUsage::QuotaBased {
            remaining,
            entitlement,
            ..
        } = result.usage
        else {
            continue;
        };

        let history = app.history.load(*id)?;
        let used = entitlement as f64 - remaining as f64;
        let day = DailyUsage::from_cumulative(
            today,
            &history,
            used,
            entitlement as f64,
            rates.rate(*id),
        );
        println!(
            "{}: {:.0} included, {:.0} billed",
            id.display_name(),
            day.included_requests,
            day.billed_requests
        );
        app.history
            .append(*id, day)
            .with_context(|| format!("recording {}", id.display_name()))?;
    }

    for (id, error) in &outcome.errors {
        eprintln!("{}: {}", id.display_name(), error);
    }
    Ok(())
}

async fn forecast(app: &App, name: &str, entitlement: Option<u64>, as_json: bool) -> Result<()> {
    let id = parse_provider(name)?;
    let entitlement = match entitlement {
        Some(value) => value,
        None => {
            let fetcher = app
                .manager
                .provider(id)
                .ok_or_else(|| anyhow!("{} is not available", id.display_name()))?;
            let result = fetcher.fetch().await?;
            match result.usage.total_entitlement() {
                Some(value) => value,
                None => bail!(
                    "{} has no request quota; pass --entitlement",
                    id.display_name()
                ),
            }
        }
    };

    let history = app.history.load(id)?;
    let prediction =
        Forecaster::new(app.config.forecast.cost_per_request).predict(&history, entitlement as f64);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        print!("{}", render::prediction_text(id, &prediction, entitlement));
    }
    Ok(())
}
