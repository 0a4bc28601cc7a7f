use crate::analyzer::stats;
use crate::config::AnalyticsConfig;
use crate::model::{
    Channel, ChannelType, EngineError, EngineResult, Phone, PriceRange, Priority, Recommendation,
    RecommendationType, Tier,
};
use crate::storage::{ObservationFilter, PriceRepository};
use crate::utils::{percent_below, round2};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct PhoneSummary {
    pub id: i64,
    pub full_name: String,
    pub brand: String,
    pub model: String,
    pub display_size: Option<String>,
    pub storage: Option<String>,
    pub ram: Option<String>,
    pub main_camera: Option<String>,
}

impl From<&Phone> for PhoneSummary {
    fn from(phone: &Phone) -> Self {
        Self {
            id: phone.id,
            full_name: phone.full_name(),
            brand: phone.brand.clone(),
            model: phone.model.clone(),
            display_size: phone.display_size.clone(),
            storage: phone.storage.clone(),
            ram: phone.ram.clone(),
            main_camera: phone.main_camera.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelPrice {
    pub id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub price_usd: f64,
    pub is_cheapest: bool,
    /// Signed: positive means below the cross-channel average.
    pub discount_from_avg: f64,
    pub recommendation: Tier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelAnalysis {
    pub phone: PhoneSummary,
    pub price_range: PriceRange,
    pub channels: Vec<ChannelPrice>,
    pub recommendations: Vec<Recommendation>,
    pub country_filter: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheapestChannel {
    pub channel_id: i64,
    pub channel_name: String,
    pub phone_name: String,
    pub min_price: f64,
}

/// Ranks a phone's sales channels by price and turns the spread into an
/// ordered action list.
pub struct ChannelStrategy {
    repo: Arc<dyn PriceRepository>,
    cfg: Arc<AnalyticsConfig>,
}

impl ChannelStrategy {
    pub fn new(repo: Arc<dyn PriceRepository>, cfg: Arc<AnalyticsConfig>) -> Self {
        Self { repo, cfg }
    }

    /// Full channel breakdown for one phone, optionally scoped to a country.
    /// Distinguishes "no data" (error) from a legitimate zero-variance result.
    pub async fn analyze(
        &self,
        phone_id: i64,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> EngineResult<ChannelAnalysis> {
        let phone = self
            .repo
            .phone(phone_id)
            .await?
            .ok_or(EngineError::NotFound("phone"))?;

        let observations = self
            .repo
            .observations(&self.window_filter(Some(phone_id), country_id, today))
            .await?;
        let priced: Vec<_> = observations
            .into_iter()
            .filter(|o| o.price_usd.is_some_and(|p| p > 0.0))
            .collect();
        if priced.is_empty() {
            return Err(EngineError::NoData);
        }

        let price_range = stats::price_range(&priced);
        let channel_index: HashMap<i64, Channel> = self
            .repo
            .channels()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut channels = Vec::new();
        for observation in &priced {
            let Some(channel) = channel_index.get(&observation.channel_id) else {
                debug!(channel_id = observation.channel_id, "observation on inactive channel");
                continue;
            };
            let price = round2(observation.price_usd.unwrap_or(0.0));
            let discount_from_avg = percent_below(price_range.avg, price);
            channels.push(ChannelPrice {
                id: channel.id,
                name: channel.name.clone(),
                channel_type: channel.channel_type,
                price_usd: price,
                is_cheapest: price == price_range.min,
                discount_from_avg,
                recommendation: determine_tier(discount_from_avg, price, price_range.min, &self.cfg),
            });
        }
        // Price ties fall back to the channel type display ranking.
        channels.sort_by(|a, b| {
            a.price_usd
                .partial_cmp(&b.price_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.channel_type.priority().cmp(&b.channel_type.priority()))
                .then(a.id.cmp(&b.id))
        });

        let recommendations = self.build_recommendations(&channels, &price_range);

        Ok(ChannelAnalysis {
            phone: PhoneSummary::from(&phone),
            price_range,
            channels,
            recommendations,
            country_filter: country_id,
        })
    }

    /// Lowest observed price per channel and phone within a country.
    pub async fn cheapest_channels(
        &self,
        country_id: i64,
        limit: usize,
        today: NaiveDate,
    ) -> EngineResult<Vec<CheapestChannel>> {
        let observations = self
            .repo
            .observations(&self.window_filter(None, Some(country_id), today))
            .await?;

        let channel_index: HashMap<i64, Channel> = self
            .repo
            .channels()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let phone_names: HashMap<i64, String> = self
            .repo
            .phones()
            .await?
            .into_iter()
            .map(|p| (p.id, p.full_name()))
            .collect();

        let mut minimums: HashMap<(i64, i64), f64> = HashMap::new();
        for observation in &observations {
            let Some(price) = observation.price_usd.filter(|&p| p > 0.0) else {
                continue;
            };
            minimums
                .entry((observation.channel_id, observation.phone_id))
                .and_modify(|current| *current = current.min(price))
                .or_insert(price);
        }

        let mut cheapest: Vec<CheapestChannel> = minimums
            .into_iter()
            .filter_map(|((channel_id, phone_id), min_price)| {
                let channel = channel_index.get(&channel_id)?;
                let phone_name = phone_names.get(&phone_id)?;
                Some(CheapestChannel {
                    channel_id,
                    channel_name: channel.name.clone(),
                    phone_name: phone_name.clone(),
                    min_price: round2(min_price),
                })
            })
            .collect();
        cheapest.sort_by(|a, b| {
            a.min_price
                .partial_cmp(&b.min_price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.channel_id.cmp(&b.channel_id))
        });
        cheapest.truncate(limit);
        Ok(cheapest)
    }

    /// Range statistics for one phone without the full analysis. Returns the
    /// zero range when nothing is priced; use `analyze` to get a hard NoData.
    pub async fn price_range(
        &self,
        phone_id: i64,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> EngineResult<PriceRange> {
        let observations = self
            .repo
            .observations(&self.window_filter(Some(phone_id), country_id, today))
            .await?;
        Ok(stats::price_range(&observations))
    }

    fn window_filter(
        &self,
        phone_id: Option<i64>,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> ObservationFilter {
        ObservationFilter {
            phone_id,
            country_id,
            date_from: Some(today - Duration::days(self.cfg.window_days)),
            date_to: Some(today),
            ..Default::default()
        }
    }

    fn build_recommendations(
        &self,
        channels: &[ChannelPrice],
        price_range: &PriceRange,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        for channel in channels
            .iter()
            .filter(|c| c.discount_from_avg >= self.cfg.best_value_threshold)
        {
            let priority =
                if channel.price_usd <= price_range.avg * self.cfg.high_priority_price_factor {
                    Priority::High
                } else {
                    Priority::Medium
                };
            recommendations.push(Recommendation {
                channel_id: channel.id,
                channel_name: channel.name.clone(),
                reason: format!(
                    "Price is {}% below market average",
                    channel.discount_from_avg
                ),
                priority,
                kind: RecommendationType::BestValue,
            });
        }

        if let Some(cheapest) = channels.iter().find(|c| c.is_cheapest) {
            recommendations.push(Recommendation {
                channel_id: cheapest.id,
                channel_name: cheapest.name.clone(),
                reason: format!("Lowest price available (${})", cheapest.price_usd),
                priority: Priority::High,
                kind: RecommendationType::LowestPrice,
            });
        }

        for channel in channels
            .iter()
            .filter(|c| c.discount_from_avg < self.cfg.avoid_threshold)
        {
            recommendations.push(Recommendation {
                channel_id: channel.id,
                channel_name: channel.name.clone(),
                reason: format!(
                    "Price is {}% above market average",
                    channel.discount_from_avg.abs()
                ),
                priority: Priority::Low,
                kind: RecommendationType::Avoid,
            });
        }

        // Stable sort: ties keep insertion order.
        recommendations.sort_by_key(|r| r.priority);
        recommendations
    }
}

/// First matching tier wins; the order of checks is part of the contract.
pub fn determine_tier(
    discount_from_avg: f64,
    price: f64,
    min_price: f64,
    cfg: &AnalyticsConfig,
) -> Tier {
    if price == min_price && discount_from_avg >= cfg.best_value_threshold {
        Tier::BestValue
    } else if discount_from_avg >= cfg.best_value_threshold {
        Tier::GreatDeal
    } else if discount_from_avg >= cfg.good_price_threshold {
        Tier::GoodPrice
    } else if discount_from_avg >= cfg.fair_price_floor {
        Tier::FairPrice
    } else {
        Tier::Overpriced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, day, observe};
    use crate::model::ChannelType;
    use crate::storage::SqliteStorage;
    use chrono::Utc;

    fn strategy(storage: Arc<SqliteStorage>) -> ChannelStrategy {
        ChannelStrategy::new(storage, Arc::new(AnalyticsConfig::default()))
    }

    async fn three_channel_phone() -> (Arc<SqliteStorage>, i64) {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let country = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let noon = storage
            .record_channel("Noon", ChannelType::PurePlayer, country, true)
            .await
            .unwrap();
        let sharaf = storage
            .record_channel("Sharaf DG", ChannelType::Retail, country, true)
            .await
            .unwrap();
        let etisalat = storage
            .record_channel("Etisalat", ChannelType::Telco, country, true)
            .await
            .unwrap();
        let phone = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();

        observe(&storage, phone, noon, 500.0, day(10)).await;
        observe(&storage, phone, sharaf, 550.0, day(11)).await;
        observe(&storage, phone, etisalat, 700.0, day(12)).await;
        (storage, phone)
    }

    #[test]
    fn tier_ladder_is_total_and_ordered() {
        let cfg = AnalyticsConfig::default();
        assert_eq!(determine_tier(25.0, 100.0, 100.0, &cfg), Tier::BestValue);
        // Same discount but not the minimum price: still a great deal.
        assert_eq!(determine_tier(25.0, 110.0, 100.0, &cfg), Tier::GreatDeal);
        assert_eq!(determine_tier(15.0, 110.0, 100.0, &cfg), Tier::GoodPrice);
        assert_eq!(determine_tier(-5.0, 110.0, 100.0, &cfg), Tier::FairPrice);
        assert_eq!(determine_tier(-5.1, 110.0, 100.0, &cfg), Tier::Overpriced);
    }

    #[tokio::test]
    async fn fourteen_percent_spread_is_good_price_not_best_value() {
        let (storage, phone) = three_channel_phone().await;
        let analysis = strategy(storage).analyze(phone, None, day(28)).await.unwrap();

        // avg 583.33; the 500 channel sits 14.3% below it.
        assert_eq!(analysis.price_range.avg, 583.33);
        let cheapest = &analysis.channels[0];
        assert!(cheapest.is_cheapest);
        assert_eq!(cheapest.discount_from_avg, 14.3);
        assert_eq!(cheapest.recommendation, Tier::GoodPrice);

        // Ascending by price.
        let prices: Vec<f64> = analysis.channels.iter().map(|c| c.price_usd).collect();
        assert_eq!(prices, vec![500.0, 550.0, 700.0]);
    }

    #[tokio::test]
    async fn recommendations_are_priority_ordered() {
        let (storage, phone) = three_channel_phone().await;
        let analysis = strategy(storage).analyze(phone, None, day(28)).await.unwrap();

        // 500 -> lowest_price (high); 700 is 20% over average -> avoid (low).
        assert_eq!(analysis.recommendations.len(), 2);
        assert_eq!(analysis.recommendations[0].kind, RecommendationType::LowestPrice);
        assert_eq!(analysis.recommendations[0].priority, Priority::High);
        assert_eq!(analysis.recommendations[1].kind, RecommendationType::Avoid);
        assert_eq!(analysis.recommendations[1].priority, Priority::Low);
    }

    #[tokio::test]
    async fn deep_discount_earns_best_value_and_high_priority() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let country = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let cheap = storage
            .record_channel("Noon", ChannelType::PurePlayer, country, true)
            .await
            .unwrap();
        let dear = storage
            .record_channel("Sharaf DG", ChannelType::Retail, country, true)
            .await
            .unwrap();
        let phone = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();
        observe(&storage, phone, cheap, 500.0, day(10)).await;
        observe(&storage, phone, dear, 1000.0, day(11)).await;

        let analysis = strategy(storage).analyze(phone, None, day(28)).await.unwrap();
        // avg 750: the 500 channel is 33.3% below and under 0.8x avg.
        assert_eq!(analysis.channels[0].recommendation, Tier::BestValue);
        let best = analysis
            .recommendations
            .iter()
            .find(|r| r.kind == RecommendationType::BestValue)
            .unwrap();
        assert_eq!(best.priority, Priority::High);
        // best_value qualifiers always clear the great_deal threshold too.
        assert!(analysis.channels[0].discount_from_avg >= 20.0);
    }

    #[tokio::test]
    async fn missing_phone_and_empty_window_are_distinct_errors() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);
        let strategy = strategy(storage);

        match strategy.analyze(9999, None, day(28)).await {
            Err(EngineError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
        // Real phone, but the window predates every observation.
        match strategy.analyze(db.phone_a, None, day(1) - chrono::Duration::days(60)).await {
            Err(EngineError::NoData) => {}
            other => panic!("expected NoData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cheapest_channels_rank_by_minimum_price() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);
        let cheapest = strategy(storage)
            .cheapest_channels(db.uae, 10, day(28))
            .await
            .unwrap();

        assert_eq!(cheapest[0].min_price, 800.0);
        assert_eq!(cheapest[0].phone_name, "Apple iPhone 16");
        assert!(cheapest.windows(2).all(|w| w[0].min_price <= w[1].min_price));
    }
}
