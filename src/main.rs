mod analyzer;
mod config;
#[cfg(test)]
mod fixtures;
mod model;
mod storage;
mod utils;

use analyzer::{
    BenchmarkAnalyzer, ChannelStrategy, CompetitionAnalyzer, DashboardAnalyzer, PromotionAnalyzer,
};
use chrono::{Duration, Utc};
use config::load_config;
use model::{CancelToken, EngineError};
use serde_json::json;
use std::sync::Arc;
use storage::{PriceRepository, SqliteStorage};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config load error: {}", e);
            return;
        }
    };

    let storage = match SqliteStorage::open(&config.db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open storage: {:?}", e);
            return;
        }
    };
    let repo: Arc<dyn PriceRepository> = storage;
    let cfg = Arc::new(config.analytics);

    let dashboard = DashboardAnalyzer::new(Arc::clone(&repo), Arc::clone(&cfg));
    let competition = CompetitionAnalyzer::new(Arc::clone(&repo), Arc::clone(&cfg));
    let benchmark = BenchmarkAnalyzer::new(
        Arc::clone(&repo),
        Arc::clone(&cfg),
        config.benchmark_country_code.clone(),
    );
    let promotions = PromotionAnalyzer::new(Arc::clone(&repo), Arc::clone(&cfg));
    let channels = ChannelStrategy::new(Arc::clone(&repo), Arc::clone(&cfg));

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling analysis...");
                cancel.cancel();
            }
        });
    }

    let today = Utc::now().date_naive();
    let start_date = today - Duration::days(cfg.window_days);
    info!(
        "Running analysis suite against {} (window {} days)",
        config.benchmark_country_code, cfg.window_days
    );

    // The sections are independent reads; run them concurrently.
    let (overview, trends, market, regional, promos) = tokio::join!(
        dashboard.overview(today),
        dashboard.price_trends(start_date, today),
        competition.market_analysis(None, today),
        benchmark.aggregate_benchmark(today, &cancel),
        promotions.active_promotions(None, today),
    );

    if cancel.is_cancelled() {
        warn!("Analysis cancelled; no report produced.");
        return;
    }

    // Channel breakdown for the most-covered phone, the same view the
    // dashboard opens with.
    let top_model_channels = match &market {
        Ok(analysis) => match analysis.top_models.first() {
            Some(top) => Some(channels.analyze(top.phone_id, None, today).await),
            None => None,
        },
        Err(_) => None,
    };

    // Degrade per section: a failed section becomes null in the report, the
    // engines themselves never substitute defaults.
    let report = json!({
        "overview": unwrap_section("overview", overview),
        "price_trends": unwrap_section("price_trends", trends),
        "market_analysis": unwrap_section("market_analysis", market),
        "top_model_channels": top_model_channels
            .map(|r| unwrap_section("top_model_channels", r)),
        "regional_benchmark": unwrap_section("regional_benchmark", regional),
        "promotions": unwrap_section("promotions", promos),
    });

    match serde_json::to_string_pretty(&report) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => error!("Failed to render report: {}", e),
    }
    info!("Analysis complete.");
}

fn unwrap_section<T: serde::Serialize>(
    name: &str,
    result: Result<T, EngineError>,
) -> serde_json::Value {
    match result {
        Ok(value) => serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        Err(e) => {
            warn!("Section {} failed: {}", name, e);
            serde_json::Value::Null
        }
    }
}
