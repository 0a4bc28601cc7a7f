use serde::Deserialize;
use std::fs;

/// Tunable analytics thresholds. Every engine takes this at construction time
/// instead of reading literals, so thresholds can change without code changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Default trailing window for all analyses, in days.
    pub window_days: i64,
    /// Width of the trend comparison windows, in days.
    pub trend_window_days: i64,
    /// Trend band: moves within ±this percent are reported as stable.
    pub trend_band_percent: f64,
    /// Days subtracted from "today" for the top-mover end window, to absorb
    /// ingestion lag.
    pub mover_lag_days: i64,
    /// Minimum absolute change percent for a phone to count as a mover.
    pub mover_threshold_percent: f64,
    pub mover_limit: usize,
    /// Discount-from-average needed for the best_value / great_deal tiers.
    pub best_value_threshold: f64,
    pub good_price_threshold: f64,
    pub fair_price_floor: f64,
    /// Channels priced more than this far above average get an avoid entry.
    pub avoid_threshold: f64,
    /// best_value recommendations become high priority at or below this
    /// fraction of the average price.
    pub high_priority_price_factor: f64,
    pub premium_price_threshold: f64,
    pub midrange_price_threshold: f64,
    /// Competitor band around a phone's average price, as multipliers.
    pub competitor_band_min: f64,
    pub competitor_band_max: f64,
    pub new_entries_limit: usize,
    pub top_models_limit: usize,
    pub comparison_min_phones: usize,
    pub comparison_max_phones: usize,
    /// Discount vs the benchmark market at or above which a country is a
    /// critical violator.
    pub critical_discount_percent: f64,
    /// Discount at or below which a country is a premium charger (negative:
    /// the country charges more than the benchmark).
    pub premium_charge_percent: f64,
    pub critical_limit: usize,
    pub aggregate_critical_limit: usize,
    pub premium_limit: usize,
    /// Promotions below this discount percent are not reported.
    pub min_promo_discount_percent: f64,
    pub promo_limit: usize,
    pub promo_leaderboard_limit: usize,
    /// Assumed markup when a promotional price has no baseline to compare
    /// against. An estimate, not an observed original price.
    pub promo_fallback_markup: f64,
    /// Non-promotional channels count as discounting at or above this percent.
    pub promo_implied_discount_percent: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            trend_window_days: 7,
            trend_band_percent: 2.0,
            mover_lag_days: 2,
            mover_threshold_percent: 5.0,
            mover_limit: 10,
            best_value_threshold: 20.0,
            good_price_threshold: 10.0,
            fair_price_floor: -5.0,
            avoid_threshold: -10.0,
            high_priority_price_factor: 0.8,
            premium_price_threshold: 1000.0,
            midrange_price_threshold: 600.0,
            competitor_band_min: 0.8,
            competitor_band_max: 1.2,
            new_entries_limit: 10,
            top_models_limit: 20,
            comparison_min_phones: 2,
            comparison_max_phones: 4,
            critical_discount_percent: 30.0,
            premium_charge_percent: -15.0,
            critical_limit: 20,
            aggregate_critical_limit: 50,
            premium_limit: 10,
            min_promo_discount_percent: 5.0,
            promo_limit: 50,
            promo_leaderboard_limit: 20,
            promo_fallback_markup: 1.2,
            promo_implied_discount_percent: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub db_path: String,
    /// Country code of the benchmark market for regional comparisons.
    pub benchmark_country_code: String,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

pub fn load_config(path: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
