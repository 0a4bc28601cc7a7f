use crate::config::AnalyticsConfig;
use crate::model::{
    BenchmarkViolation, CancelToken, Country, EngineError, EngineResult, ViolationStatus,
};
use crate::storage::{ObservationFilter, PriceRepository};
use crate::utils::{percent_below, round1, round2};
use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReference {
    pub country: String,
    pub country_id: i64,
    /// Cheapest observed offer in the benchmark market. The reference is the
    /// best obtainable price there, not the average.
    pub wholesale_price: f64,
    pub retail_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneBenchmark {
    pub phone: String,
    pub phone_id: i64,
    pub benchmark: BenchmarkReference,
    pub critical: Vec<BenchmarkViolation>,
    pub premium_chargers: Vec<BenchmarkViolation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub total_violations: usize,
    pub affected_phones: usize,
    pub affected_countries: usize,
    pub avg_discount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryViolations {
    pub country: String,
    pub violations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateBenchmark {
    pub summary: BenchmarkSummary,
    pub top_violations: Vec<BenchmarkViolation>,
    pub premium_chargers: Vec<BenchmarkViolation>,
    pub countries_by_violations: Vec<CountryViolations>,
}

/// Flags countries whose minimum price deviates from the benchmark market
/// beyond the configured thresholds. Discounts are signed: positive means the
/// country undercuts the benchmark.
pub struct BenchmarkAnalyzer {
    repo: Arc<dyn PriceRepository>,
    cfg: Arc<AnalyticsConfig>,
    benchmark_country_code: String,
}

impl BenchmarkAnalyzer {
    pub fn new(
        repo: Arc<dyn PriceRepository>,
        cfg: Arc<AnalyticsConfig>,
        benchmark_country_code: impl Into<String>,
    ) -> Self {
        Self { repo, cfg, benchmark_country_code: benchmark_country_code.into() }
    }

    async fn benchmark_country(&self) -> EngineResult<Country> {
        self.repo
            .country_by_code(&self.benchmark_country_code)
            .await?
            .ok_or(EngineError::NotFound("benchmark country"))
    }

    /// Benchmark breakdown for one phone across all active countries.
    pub async fn phone_benchmark(
        &self,
        phone_id: i64,
        today: NaiveDate,
    ) -> EngineResult<PhoneBenchmark> {
        let phone = self
            .repo
            .phone(phone_id)
            .await?
            .ok_or(EngineError::NotFound("phone"))?;
        let benchmark_country = self.benchmark_country().await?;

        let from = today - Duration::days(self.cfg.window_days);
        let observations = self
            .repo
            .observations(&ObservationFilter {
                phone_id: Some(phone_id),
                date_from: Some(from),
                date_to: Some(today),
                ..Default::default()
            })
            .await?;

        let mut country_of_channel: HashMap<i64, i64> = HashMap::new();
        let mut channel_names: HashMap<i64, String> = HashMap::new();
        for channel in self.repo.channels().await? {
            country_of_channel.insert(channel.id, channel.country_id);
            channel_names.insert(channel.id, channel.name);
        }

        // (price, channel) pairs per country, usable prices only.
        let mut by_country: HashMap<i64, Vec<(f64, i64)>> = HashMap::new();
        for observation in &observations {
            let Some(price) = observation.price_usd.filter(|&p| p > 0.0) else {
                continue;
            };
            let Some(&country_id) = country_of_channel.get(&observation.channel_id) else {
                continue;
            };
            by_country
                .entry(country_id)
                .or_default()
                .push((price, observation.channel_id));
        }

        let Some(benchmark_prices) = by_country.get(&benchmark_country.id) else {
            return Err(EngineError::NoData);
        };
        let wholesale = benchmark_prices
            .iter()
            .map(|(p, _)| *p)
            .fold(f64::INFINITY, f64::min);
        let retail = benchmark_prices.iter().map(|(p, _)| *p).sum::<f64>()
            / benchmark_prices.len() as f64;

        let mut critical = Vec::new();
        let mut premium = Vec::new();
        for country in self.repo.countries().await? {
            if country.id == benchmark_country.id {
                continue;
            }
            let Some(prices) = by_country.get(&country.id) else {
                continue;
            };
            let Some(&(local_price, channel_id)) = prices
                .iter()
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            else {
                continue;
            };

            let discount_percent = percent_below(wholesale, local_price);
            let status = match classify_deviation(discount_percent, &self.cfg) {
                Some(status) => status,
                None => continue,
            };
            let violation = BenchmarkViolation {
                phone: phone.full_name(),
                phone_id,
                country: country.name.clone(),
                country_id: country.id,
                channel: channel_names
                    .get(&channel_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                channel_id: Some(channel_id),
                local_price: round2(local_price),
                benchmark_price: round2(wholesale),
                discount_percent,
                status,
            };
            match status {
                ViolationStatus::Critical => critical.push(violation),
                ViolationStatus::Premium => premium.push(violation),
            }
        }

        sort_by_severity(&mut critical, &mut premium);
        critical.truncate(self.cfg.critical_limit);
        premium.truncate(self.cfg.premium_limit);

        Ok(PhoneBenchmark {
            phone: phone.full_name(),
            phone_id,
            benchmark: BenchmarkReference {
                country: benchmark_country.name,
                country_id: benchmark_country.id,
                wholesale_price: round2(wholesale),
                retail_price: round2(retail),
            },
            critical,
            premium_chargers: premium,
        })
    }

    /// Market-wide scan over every phone with benchmark coverage. The token
    /// is checked per phone; a cancelled scan yields no partial report.
    pub async fn aggregate_benchmark(
        &self,
        today: NaiveDate,
        cancel: &CancelToken,
    ) -> EngineResult<AggregateBenchmark> {
        let benchmark_country = self.benchmark_country().await?;
        let from = today - Duration::days(self.cfg.window_days);

        let benchmark_mins = self
            .repo
            .min_usd_by_phone(benchmark_country.id, from, today)
            .await?;
        let phone_names: HashMap<i64, String> = self
            .repo
            .phones()
            .await?
            .into_iter()
            .map(|p| (p.id, p.full_name()))
            .collect();

        let others: Vec<Country> = self
            .repo
            .countries()
            .await?
            .into_iter()
            .filter(|c| c.id != benchmark_country.id)
            .collect();
        let results = join_all(
            others
                .iter()
                .map(|country| self.repo.min_usd_by_phone(country.id, from, today)),
        )
        .await;
        let mut country_mins: Vec<(Country, HashMap<i64, f64>)> = Vec::new();
        for (country, mins) in others.into_iter().zip(results) {
            country_mins.push((country, mins?));
        }
        info!(
            phones = benchmark_mins.len(),
            countries = country_mins.len(),
            "scanning against {} benchmark",
            benchmark_country.name
        );

        let mut scan_order: Vec<i64> = benchmark_mins.keys().copied().collect();
        scan_order.sort_unstable();

        let mut critical = Vec::new();
        let mut premium = Vec::new();
        let mut tallies: HashMap<String, usize> = HashMap::new();
        for phone_id in scan_order {
            if cancel.is_cancelled() {
                debug!("aggregate benchmark cancelled mid-scan");
                return Err(EngineError::Cancelled);
            }
            let benchmark_price = benchmark_mins[&phone_id];
            for (country, mins) in &country_mins {
                let Some(&local_price) = mins.get(&phone_id) else {
                    continue;
                };
                let discount_percent = percent_below(benchmark_price, local_price);
                let Some(status) = classify_deviation(discount_percent, &self.cfg) else {
                    continue;
                };
                let violation = BenchmarkViolation {
                    phone: phone_names
                        .get(&phone_id)
                        .cloned()
                        .unwrap_or_else(|| format!("Phone #{phone_id}")),
                    phone_id,
                    country: country.name.clone(),
                    country_id: country.id,
                    channel: "Various".to_string(),
                    channel_id: None,
                    local_price: round2(local_price),
                    benchmark_price: round2(benchmark_price),
                    discount_percent,
                    status,
                };
                *tallies.entry(country.name.clone()).or_default() += 1;
                match status {
                    ViolationStatus::Critical => critical.push(violation),
                    ViolationStatus::Premium => premium.push(violation),
                }
            }
        }

        let summary = summarize(&critical, &premium);
        sort_by_severity(&mut critical, &mut premium);
        critical.truncate(self.cfg.aggregate_critical_limit);
        premium.truncate(self.cfg.premium_limit);

        let mut countries_by_violations: Vec<CountryViolations> = tallies
            .into_iter()
            .map(|(country, violations)| CountryViolations { country, violations })
            .collect();
        countries_by_violations.sort_by(|a, b| {
            b.violations.cmp(&a.violations).then(a.country.cmp(&b.country))
        });

        Ok(AggregateBenchmark {
            summary,
            top_violations: critical,
            premium_chargers: premium,
            countries_by_violations,
        })
    }
}

/// Critical when the country undercuts the benchmark by at least the critical
/// threshold; premium when it overcharges past the premium threshold. Values
/// strictly between are not reported.
fn classify_deviation(discount_percent: f64, cfg: &AnalyticsConfig) -> Option<ViolationStatus> {
    if discount_percent >= cfg.critical_discount_percent {
        Some(ViolationStatus::Critical)
    } else if discount_percent <= cfg.premium_charge_percent {
        Some(ViolationStatus::Premium)
    } else {
        None
    }
}

fn sort_by_severity(critical: &mut [BenchmarkViolation], premium: &mut [BenchmarkViolation]) {
    critical.sort_by(|a, b| {
        b.discount_percent
            .partial_cmp(&a.discount_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.country_id.cmp(&b.country_id))
    });
    // For premium chargers severity grows as the discount goes negative.
    premium.sort_by(|a, b| {
        a.discount_percent
            .partial_cmp(&b.discount_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.country_id.cmp(&b.country_id))
    });
}

fn summarize(critical: &[BenchmarkViolation], premium: &[BenchmarkViolation]) -> BenchmarkSummary {
    let all: Vec<&BenchmarkViolation> = critical.iter().chain(premium.iter()).collect();
    let mut phones: Vec<i64> = all.iter().map(|v| v.phone_id).collect();
    phones.sort_unstable();
    phones.dedup();
    let mut countries: Vec<i64> = all.iter().map(|v| v.country_id).collect();
    countries.sort_unstable();
    countries.dedup();

    let avg_discount = if all.is_empty() {
        0.0
    } else {
        round1(all.iter().map(|v| v.discount_percent).sum::<f64>() / all.len() as f64)
    };

    BenchmarkSummary {
        total_violations: all.len(),
        affected_phones: phones.len(),
        affected_countries: countries.len(),
        avg_discount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, day, observe};
    use crate::model::ChannelType;
    use crate::storage::SqliteStorage;
    use chrono::Utc;

    fn analyzer(storage: Arc<SqliteStorage>) -> BenchmarkAnalyzer {
        BenchmarkAnalyzer::new(storage, Arc::new(AnalyticsConfig::default()), "AE")
    }

    #[test]
    fn deviations_between_thresholds_are_unreported() {
        let cfg = AnalyticsConfig::default();
        assert_eq!(classify_deviation(30.0, &cfg), Some(ViolationStatus::Critical));
        assert_eq!(classify_deviation(29.9, &cfg), None);
        assert_eq!(classify_deviation(-15.0, &cfg), Some(ViolationStatus::Premium));
        assert_eq!(classify_deviation(-14.9, &cfg), None);
        assert_eq!(classify_deviation(0.0, &cfg), None);
    }

    #[tokio::test]
    async fn forty_percent_undercut_is_critical() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let uae = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let other = storage
            .record_country("EG", "Egypt", "EGP", 2, true)
            .await
            .unwrap();
        let noon = storage
            .record_channel("Noon", ChannelType::PurePlayer, uae, true)
            .await
            .unwrap();
        let souq = storage
            .record_channel("B.Tech", ChannelType::Retail, other, true)
            .await
            .unwrap();
        let phone = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();
        observe(&storage, phone, noon, 1000.0, day(5)).await;
        observe(&storage, phone, souq, 600.0, day(6)).await;

        let report = analyzer(storage)
            .phone_benchmark(phone, day(28))
            .await
            .unwrap();
        assert_eq!(report.benchmark.wholesale_price, 1000.0);
        assert_eq!(report.critical.len(), 1);
        let violation = &report.critical[0];
        assert_eq!(violation.discount_percent, 40.0);
        assert_eq!(violation.status, ViolationStatus::Critical);
        assert_eq!(violation.channel, "B.Tech");
    }

    #[tokio::test]
    async fn fixture_market_yields_one_critical_and_one_premium() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);
        let report = analyzer(storage)
            .aggregate_benchmark(day(28), &CancelToken::new())
            .await
            .unwrap();

        // Galaxy S25: 1000 vs 650 in KSA -> 35% under, critical.
        assert_eq!(report.top_violations.len(), 1);
        assert_eq!(report.top_violations[0].discount_percent, 35.0);
        assert_eq!(report.top_violations[0].phone_id, db.phone_a);

        // iPhone 16: 800 vs 950 in KSA -> 18.8% over, premium charger.
        assert_eq!(report.premium_chargers.len(), 1);
        assert_eq!(report.premium_chargers[0].discount_percent, -18.8);

        assert_eq!(report.summary.total_violations, 2);
        assert_eq!(report.summary.affected_phones, 2);
        assert_eq!(report.summary.affected_countries, 1);
        assert_eq!(report.summary.avg_discount, 8.1);
        assert_eq!(report.countries_by_violations[0].country, "Saudi Arabia");
        assert_eq!(report.countries_by_violations[0].violations, 2);
    }

    #[tokio::test]
    async fn moderate_deviations_stay_out_of_the_report() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let uae = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let other = storage
            .record_country("SA", "Saudi Arabia", "SAR", 2, true)
            .await
            .unwrap();
        let noon = storage
            .record_channel("Noon", ChannelType::PurePlayer, uae, true)
            .await
            .unwrap();
        let jarir = storage
            .record_channel("Jarir", ChannelType::Retail, other, true)
            .await
            .unwrap();
        let phone = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();
        // 10% under benchmark: inside the unreported dead zone.
        observe(&storage, phone, noon, 1000.0, day(5)).await;
        observe(&storage, phone, jarir, 900.0, day(6)).await;

        let report = analyzer(storage)
            .phone_benchmark(phone, day(28))
            .await
            .unwrap();
        assert!(report.critical.is_empty());
        assert!(report.premium_chargers.is_empty());
    }

    #[tokio::test]
    async fn missing_phone_or_benchmark_market_is_an_error() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);
        let analyzer = analyzer(Arc::clone(&storage));

        assert!(matches!(
            analyzer.phone_benchmark(9999, day(28)).await,
            Err(EngineError::NotFound(_))
        ));

        // A phone with no observations in the benchmark market.
        let orphan = storage
            .record_phone("Honor", "Magic 7", Utc::now())
            .await
            .unwrap();
        fixtures::observe(&storage, orphan, db.ksa_jarir, 500.0, day(5)).await;
        assert!(matches!(
            analyzer.phone_benchmark(orphan, day(28)).await,
            Err(EngineError::NoData)
        ));

        let wrong_market =
            BenchmarkAnalyzer::new(storage, Arc::new(AnalyticsConfig::default()), "XX");
        assert!(matches!(
            wrong_market.phone_benchmark(db.phone_a, day(28)).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_scan_returns_no_partial_result() {
        let db = fixtures::two_country_market().await;
        let storage = Arc::new(db.storage);
        let cancel = CancelToken::new();
        cancel.cancel();

        match analyzer(storage).aggregate_benchmark(day(28), &cancel).await {
            Err(EngineError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}
