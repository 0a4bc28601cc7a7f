use crate::analyzer::channels::PhoneSummary;
use crate::analyzer::stats;
use crate::config::AnalyticsConfig;
use crate::model::{EngineError, EngineResult, MarketPosition, Phone};
use crate::storage::{ObservationFilter, PriceRepository};
use crate::utils::{round1, round2};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// Diversity weights are frozen: downstream reports compare scores across runs.
const DIVERSITY_POSITION_WEIGHT: f64 = 0.4;
const DIVERSITY_BRAND_WEIGHT: f64 = 0.1;
const DIVERSITY_COUNT_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Serialize)]
pub struct BrandShare {
    pub brand: String,
    pub share_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopModel {
    pub phone: String,
    pub phone_id: i64,
    pub brand: String,
    pub price_avg: f64,
    pub market_position: MarketPosition,
    pub competitor_count: usize,
    pub price_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEntry {
    pub phone: String,
    pub phone_id: i64,
    pub brand: String,
    pub first_seen: NaiveDate,
    pub channels: i64,
    pub has_prices: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneComparison {
    pub phone: PhoneSummary,
    pub avg_price: f64,
    pub market_position: MarketPosition,
    pub competitor_count: usize,
    pub price_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonInsights {
    pub cheapest: String,
    pub most_expensive: String,
    pub price_range: f64,
    pub avg_market_price: f64,
    pub coverage_summary: String,
    pub diversity_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketAnalysis {
    pub market_share: Vec<BrandShare>,
    pub top_models: Vec<TopModel>,
    pub new_entries: Vec<NewEntry>,
}

/// Brand share, competitive positioning and head-to-head phone comparisons.
pub struct CompetitionAnalyzer {
    repo: Arc<dyn PriceRepository>,
    cfg: Arc<AnalyticsConfig>,
}

impl CompetitionAnalyzer {
    pub fn new(repo: Arc<dyn PriceRepository>, cfg: Arc<AnalyticsConfig>) -> Self {
        Self { repo, cfg }
    }

    pub async fn market_analysis(
        &self,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> EngineResult<MarketAnalysis> {
        Ok(MarketAnalysis {
            market_share: self.brand_share(country_id, today).await?,
            top_models: self
                .top_models(country_id, self.cfg.top_models_limit, today)
                .await?,
            new_entries: self.new_entries(today).await?,
        })
    }

    /// Distinct-phone share per brand. With a country filter only phones with
    /// an in-window observation there are counted.
    pub async fn brand_share(
        &self,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> EngineResult<Vec<BrandShare>> {
        let phones = self.repo.phones().await?;
        let counted: Vec<&Phone> = match country_id {
            None => phones.iter().collect(),
            Some(_) => {
                let observations = self
                    .repo
                    .observations(&self.window_filter(country_id, today))
                    .await?;
                let present: HashSet<i64> = observations.iter().map(|o| o.phone_id).collect();
                phones.iter().filter(|p| present.contains(&p.id)).collect()
            }
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for phone in &counted {
            *counts.entry(phone.brand.as_str()).or_default() += 1;
        }
        let total: usize = counts.values().sum();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut shares: Vec<BrandShare> = counts
            .into_iter()
            .map(|(brand, count)| BrandShare {
                brand: brand.to_string(),
                share_percent: round1(count as f64 / total as f64 * 100.0),
            })
            .collect();
        shares.sort_by(|a, b| {
            b.share_percent
                .partial_cmp(&a.share_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.brand.cmp(&b.brand))
        });
        Ok(shares)
    }

    /// Phones ranked by in-scope observation count; pricing metrics are
    /// computed over the full window regardless of the country filter.
    pub async fn top_models(
        &self,
        country_id: Option<i64>,
        limit: usize,
        today: NaiveDate,
    ) -> EngineResult<Vec<TopModel>> {
        let scoped = self
            .repo
            .observations(&self.window_filter(country_id, today))
            .await?;
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for observation in &scoped {
            *counts.entry(observation.phone_id).or_default() += 1;
        }

        let mut ranked: Vec<(i64, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);

        let mut models = Vec::new();
        for (phone_id, price_points) in ranked {
            let Some(phone) = self.repo.phone(phone_id).await? else {
                continue;
            };
            let avg_price = self.windowed_average(phone_id, today).await?;
            models.push(TopModel {
                phone: phone.full_name(),
                phone_id,
                brand: phone.brand,
                price_avg: avg_price,
                market_position: self.market_position(avg_price),
                competitor_count: self.competitor_count(phone_id, avg_price, today).await?,
                price_points,
            });
        }
        Ok(models)
    }

    /// Phones first recorded within the trailing window.
    pub async fn new_entries(&self, today: NaiveDate) -> EngineResult<Vec<NewEntry>> {
        let from = today - Duration::days(self.cfg.window_days);
        let since = Utc.from_utc_datetime(&from.and_hms_opt(0, 0, 0).unwrap_or_default());

        let recent = self
            .repo
            .phones_created_since(since, self.cfg.new_entries_limit)
            .await?;
        let mut entries = Vec::new();
        for phone in recent {
            let channels = self
                .repo
                .distinct_channel_count(phone.id, from, today)
                .await?;
            entries.push(NewEntry {
                phone: phone.full_name(),
                phone_id: phone.id,
                brand: phone.brand.clone(),
                first_seen: phone.created_at.date_naive(),
                channels,
                has_prices: channels > 0,
            });
        }
        Ok(entries)
    }

    /// Side-by-side comparison of 2-4 phones. The selection must be fully
    /// resolvable; a partial result would silently skew the insights.
    pub async fn compare_phones(
        &self,
        phone_ids: &[i64],
        today: NaiveDate,
    ) -> EngineResult<Vec<PhoneComparison>> {
        if phone_ids.len() < self.cfg.comparison_min_phones
            || phone_ids.len() > self.cfg.comparison_max_phones
        {
            return Err(EngineError::InvalidSelection(format!(
                "select between {} and {} phones to compare",
                self.cfg.comparison_min_phones, self.cfg.comparison_max_phones
            )));
        }

        let mut comparisons = Vec::new();
        for &phone_id in phone_ids {
            let phone = self.repo.phone(phone_id).await?.ok_or_else(|| {
                EngineError::InvalidSelection(format!("phone {phone_id} does not exist"))
            })?;
            let observations = self
                .repo
                .observations(&ObservationFilter {
                    phone_id: Some(phone_id),
                    date_from: Some(today - Duration::days(self.cfg.window_days)),
                    date_to: Some(today),
                    ..Default::default()
                })
                .await?;
            let values = stats::price_values(&observations);
            let avg_price = if values.is_empty() {
                0.0
            } else {
                round2(values.iter().sum::<f64>() / values.len() as f64)
            };
            comparisons.push(PhoneComparison {
                phone: PhoneSummary::from(&phone),
                avg_price,
                market_position: self.market_position(avg_price),
                competitor_count: self.competitor_count(phone_id, avg_price, today).await?,
                price_points: observations.len(),
            });
        }
        Ok(comparisons)
    }

    /// Head-to-head insights over a comparison set. None for an empty set.
    pub fn comparison_insights(&self, data: &[PhoneComparison]) -> Option<ComparisonInsights> {
        if data.is_empty() {
            return None;
        }
        let cheapest = data.iter().min_by(|a, b| {
            a.avg_price
                .partial_cmp(&b.avg_price)
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        let most_expensive = data.iter().max_by(|a, b| {
            a.avg_price
                .partial_cmp(&b.avg_price)
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

        let prices: Vec<f64> = data.iter().map(|d| d.avg_price).collect();
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut positions: Vec<&str> = Vec::new();
        for entry in data {
            let label = position_label(entry.market_position);
            if !positions.contains(&label) {
                positions.push(label);
            }
        }
        let coverage_summary = format!("{} market coverage", positions.join(", "));

        Some(ComparisonInsights {
            cheapest: cheapest.phone.full_name.clone(),
            most_expensive: most_expensive.phone.full_name.clone(),
            price_range: round2(max - min),
            avg_market_price: round2(prices.iter().sum::<f64>() / prices.len() as f64),
            coverage_summary,
            diversity_score: diversity_score(data),
        })
    }

    /// Absolute-price classification; the thresholds are configuration, never
    /// derived from the data.
    pub fn market_position(&self, avg_price: f64) -> MarketPosition {
        if avg_price >= self.cfg.premium_price_threshold {
            MarketPosition::Premium
        } else if avg_price >= self.cfg.midrange_price_threshold {
            MarketPosition::MidRange
        } else {
            MarketPosition::Budget
        }
    }

    /// Distinct other phones with at least one in-window observation priced
    /// inside the competitor band around `avg_price`. Both band edges are
    /// inclusive.
    pub async fn competitor_count(
        &self,
        phone_id: i64,
        avg_price: f64,
        today: NaiveDate,
    ) -> EngineResult<usize> {
        if avg_price <= 0.0 {
            return Ok(0);
        }
        let low = avg_price * self.cfg.competitor_band_min;
        let high = avg_price * self.cfg.competitor_band_max;

        let observations = self
            .repo
            .observations(&self.window_filter(None, today))
            .await?;
        let competitors: HashSet<i64> = observations
            .iter()
            .filter(|o| o.phone_id != phone_id)
            .filter(|o| {
                o.price_usd
                    .is_some_and(|p| p >= low && p <= high)
            })
            .map(|o| o.phone_id)
            .collect();
        Ok(competitors.len())
    }

    async fn windowed_average(&self, phone_id: i64, today: NaiveDate) -> EngineResult<f64> {
        let observations = self
            .repo
            .observations(&ObservationFilter {
                phone_id: Some(phone_id),
                date_from: Some(today - Duration::days(self.cfg.window_days)),
                date_to: Some(today),
                ..Default::default()
            })
            .await?;
        let values = stats::price_values(&observations);
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(round2(values.iter().sum::<f64>() / values.len() as f64))
    }

    fn window_filter(&self, country_id: Option<i64>, today: NaiveDate) -> ObservationFilter {
        ObservationFilter {
            country_id,
            date_from: Some(today - Duration::days(self.cfg.window_days)),
            date_to: Some(today),
            ..Default::default()
        }
    }
}

fn position_label(position: MarketPosition) -> &'static str {
    match position {
        MarketPosition::Premium => "premium",
        MarketPosition::MidRange => "mid-range",
        MarketPosition::Budget => "budget",
    }
}

/// Weighted heuristic, not a probability. Rewards spreading a comparison
/// across positions and brands.
pub fn diversity_score(data: &[PhoneComparison]) -> f64 {
    let positions: HashSet<MarketPosition> = data.iter().map(|d| d.market_position).collect();
    let brands: HashSet<&str> = data.iter().map(|d| d.phone.brand.as_str()).collect();
    positions.len() as f64 * DIVERSITY_POSITION_WEIGHT
        + brands.len() as f64 * DIVERSITY_BRAND_WEIGHT
        + data.len() as f64 * DIVERSITY_COUNT_WEIGHT
}
