use crate::config::AnalyticsConfig;
use crate::model::{EngineResult, Trend};
use crate::storage::{GroupBy, PriceRepository};
use crate::utils::{round1, round2};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_phones: i64,
    pub total_prices: i64,
    pub countries_count: usize,
    pub channels_count: i64,
    pub latest_update: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryTrend {
    pub country: String,
    pub country_id: i64,
    pub avg_price: f64,
    pub trend: Trend,
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopMover {
    pub phone: String,
    pub phone_id: i64,
    pub price_change: f64,
    pub change_percent: f64,
    pub previous_price: f64,
    pub current_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceTrends {
    pub by_country: Vec<CountryTrend>,
    pub top_movers: Vec<TopMover>,
}

/// Country-level price trajectory and the phones that moved the most.
/// Stateless; "today" is always an explicit parameter so runs are replayable.
pub struct DashboardAnalyzer {
    repo: Arc<dyn PriceRepository>,
    cfg: Arc<AnalyticsConfig>,
}

impl DashboardAnalyzer {
    pub fn new(repo: Arc<dyn PriceRepository>, cfg: Arc<AnalyticsConfig>) -> Self {
        Self { repo, cfg }
    }

    /// High-level counts for the dashboard header.
    pub async fn overview(&self, today: NaiveDate) -> EngineResult<Overview> {
        let since = today - Duration::days(self.cfg.window_days);
        Ok(Overview {
            total_phones: self.repo.phone_count().await?,
            total_prices: self.repo.observation_count_since(since).await?,
            countries_count: self.repo.countries().await?.len(),
            channels_count: self.repo.active_channel_count().await?,
            latest_update: self.repo.latest_observation_date().await?,
        })
    }

    /// Per-country averages with trend labels, plus the top movers, over the
    /// window starting at `start_date`.
    pub async fn price_trends(
        &self,
        start_date: NaiveDate,
        today: NaiveDate,
    ) -> EngineResult<PriceTrends> {
        Ok(PriceTrends {
            by_country: self.country_trends(start_date, today).await?,
            top_movers: self.top_movers(start_date, today).await?,
        })
    }

    /// Classifies each active country's trajectory by comparing the trailing
    /// window against the window beginning at `start_date`. Moves inside the
    /// configured band count as stable so day-to-day noise is not reported.
    pub async fn country_trends(
        &self,
        start_date: NaiveDate,
        today: NaiveDate,
    ) -> EngineResult<Vec<CountryTrend>> {
        let window = Duration::days(self.cfg.trend_window_days);
        let window_avgs = self
            .repo
            .grouped_average(GroupBy::Country, start_date, today)
            .await?;
        let recent_avgs = self
            .repo
            .grouped_average(GroupBy::Country, today - window, today)
            .await?;
        let previous_avgs = self
            .repo
            .grouped_average(
                GroupBy::Country,
                start_date,
                start_date + window - Duration::days(1),
            )
            .await?;

        let mut trends = Vec::new();
        for country in self.repo.countries().await? {
            let Some(&avg_price) = window_avgs.get(&country.id) else {
                continue;
            };
            let recent = recent_avgs.get(&country.id).copied().unwrap_or(0.0);
            let previous = previous_avgs.get(&country.id).copied().unwrap_or(0.0);
            trends.push(CountryTrend {
                country: country.name,
                country_id: country.id,
                avg_price: round2(avg_price),
                trend: classify_trend(recent, previous, self.cfg.trend_band_percent),
                change_percent: change_percent(recent, previous),
            });
        }
        Ok(trends)
    }

    /// Phones whose average price moved by at least the significance floor
    /// between `start_date` and a short trailing window. The trailing window
    /// starts a couple of days back to absorb ingestion lag.
    pub async fn top_movers(
        &self,
        start_date: NaiveDate,
        today: NaiveDate,
    ) -> EngineResult<Vec<TopMover>> {
        let start_prices = self
            .repo
            .grouped_average(GroupBy::Phone, start_date, start_date)
            .await?;
        let end_prices = self
            .repo
            .grouped_average(
                GroupBy::Phone,
                today - Duration::days(self.cfg.mover_lag_days),
                today,
            )
            .await?;
        debug!(
            start = start_prices.len(),
            end = end_prices.len(),
            "comparing per-phone averages"
        );

        let mut movers = Vec::new();
        for (&phone_id, &start_price) in &start_prices {
            let Some(&end_price) = end_prices.get(&phone_id) else {
                continue;
            };
            let change = round1((end_price - start_price) / start_price * 100.0);
            if change.abs() < self.cfg.mover_threshold_percent {
                continue;
            }
            let Some(phone) = self.repo.phone(phone_id).await? else {
                continue;
            };
            movers.push(TopMover {
                phone: phone.full_name(),
                phone_id,
                price_change: round2(end_price - start_price),
                change_percent: change,
                previous_price: round2(start_price),
                current_price: round2(end_price),
            });
        }

        movers.sort_by(|a, b| {
            b.change_percent
                .abs()
                .partial_cmp(&a.change_percent.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.phone_id.cmp(&b.phone_id))
        });
        movers.truncate(self.cfg.mover_limit);
        Ok(movers)
    }
}

/// The ±band filter is deliberate: a 1% wiggle is noise, not a trend.
pub fn classify_trend(recent_avg: f64, previous_avg: f64, band_percent: f64) -> Trend {
    if recent_avg == 0.0 || previous_avg == 0.0 {
        return Trend::Stable;
    }
    let band = band_percent / 100.0;
    if recent_avg > previous_avg * (1.0 + band) {
        Trend::Up
    } else if recent_avg < previous_avg * (1.0 - band) {
        Trend::Down
    } else {
        Trend::Stable
    }
}

pub fn change_percent(recent_avg: f64, previous_avg: f64) -> f64 {
    if recent_avg == 0.0 || previous_avg == 0.0 {
        return 0.0;
    }
    round1((recent_avg - previous_avg) / previous_avg * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, day, observe};
    use crate::model::ChannelType;
    use crate::storage::SqliteStorage;
    use chrono::Utc;

    fn analyzer(storage: Arc<SqliteStorage>) -> DashboardAnalyzer {
        DashboardAnalyzer::new(storage, Arc::new(AnalyticsConfig::default()))
    }

    #[test]
    fn band_edges_are_exclusive() {
        // Exactly ±2% stays stable; the comparison is strict.
        assert_eq!(classify_trend(102.0, 100.0, 2.0), Trend::Stable);
        assert_eq!(classify_trend(98.0, 100.0, 2.0), Trend::Stable);
        assert_eq!(classify_trend(102.1, 100.0, 2.0), Trend::Up);
        assert_eq!(classify_trend(97.9, 100.0, 2.0), Trend::Down);
    }

    #[test]
    fn zero_averages_are_stable_with_zero_change() {
        assert_eq!(classify_trend(0.0, 120.0, 2.0), Trend::Stable);
        assert_eq!(classify_trend(120.0, 0.0, 2.0), Trend::Stable);
        assert_eq!(change_percent(0.0, 120.0), 0.0);
        assert_eq!(change_percent(120.0, 0.0), 0.0);
    }

    #[test]
    fn swapping_windows_inverts_direction_but_not_stable() {
        assert_eq!(classify_trend(110.0, 100.0, 2.0), Trend::Up);
        assert_eq!(classify_trend(100.0, 110.0, 2.0), Trend::Down);
        assert_eq!(classify_trend(101.0, 100.0, 2.0), Trend::Stable);
        assert_eq!(classify_trend(100.0, 101.0, 2.0), Trend::Stable);
    }

    #[tokio::test]
    async fn movers_below_significance_floor_are_dropped() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let country = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let channel = storage
            .record_channel("Noon", ChannelType::PurePlayer, country, true)
            .await
            .unwrap();
        let jumper = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();
        let sleeper = storage
            .record_phone("Apple", "iPhone 16", Utc::now())
            .await
            .unwrap();

        // 400 -> 460 is a 15% move; 400 -> 408 is 2% and stays out.
        observe(&storage, jumper, channel, 400.0, day(1)).await;
        observe(&storage, jumper, channel, 460.0, day(27)).await;
        observe(&storage, sleeper, channel, 400.0, day(1)).await;
        observe(&storage, sleeper, channel, 408.0, day(27)).await;

        let movers = analyzer(storage)
            .top_movers(day(1), day(28))
            .await
            .unwrap();
        assert_eq!(movers.len(), 1);
        assert_eq!(movers[0].phone_id, jumper);
        assert_eq!(movers[0].change_percent, 15.0);
        assert_eq!(movers[0].price_change, 60.0);
        assert_eq!(movers[0].previous_price, 400.0);
        assert_eq!(movers[0].current_price, 460.0);
    }

    #[tokio::test]
    async fn country_trends_report_windowed_averages() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);

        let trends = analyzer(storage).country_trends(day(1), day(28)).await.unwrap();
        let uae = trends.iter().find(|t| t.country_id == db.uae).unwrap();
        // 1000, 1100, 800 in the UAE over the window.
        assert_eq!(uae.avg_price, 966.67);
        // All fixture observations predate both comparison windows.
        assert_eq!(uae.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn overview_counts_the_market() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);

        let overview = analyzer(storage).overview(day(28)).await.unwrap();
        assert_eq!(overview.total_phones, 2);
        assert_eq!(overview.total_prices, 6);
        assert_eq!(overview.countries_count, 2);
        assert_eq!(overview.channels_count, 4);
        assert_eq!(overview.latest_update, Some(day(3)));
    }
}
