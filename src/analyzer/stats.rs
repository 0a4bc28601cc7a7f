use crate::model::{PriceObservation, PriceRange};
use crate::utils::{round1, round2};

/// Usable USD prices from a set of observations. Missing and non-positive
/// prices are dropped before any statistic is computed.
pub fn price_values(observations: &[PriceObservation]) -> Vec<f64> {
    observations
        .iter()
        .filter_map(|o| o.price_usd)
        .filter(|&p| p > 0.0)
        .collect()
}

/// Range statistics over a set of observations, already filtered to the
/// caller's dimension and window. An empty set yields the zero range rather
/// than an error; callers that need to distinguish "no data" check upstream.
pub fn price_range(observations: &[PriceObservation]) -> PriceRange {
    let values = price_values(observations);
    range_of(&values)
}

/// Same computation over a bare USD price series.
pub fn range_of(values: &[f64]) -> PriceRange {
    if values.is_empty() {
        return PriceRange::empty();
    }

    let min = round2(values.iter().copied().fold(f64::INFINITY, f64::min));
    let max = round2(values.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    let avg = round2(values.iter().sum::<f64>() / values.len() as f64);

    let spread_percent = if min > 0.0 {
        round1((max - min) / min * 100.0)
    } else {
        0.0
    };

    PriceRange { min, max, avg, spread_percent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PriceType, StockStatus};
    use chrono::{NaiveDate, Utc};

    fn obs(price_usd: Option<f64>) -> PriceObservation {
        PriceObservation {
            id: 0,
            phone_id: 1,
            channel_id: 1,
            price_local: price_usd.unwrap_or(0.0),
            price_usd,
            currency: "USD".into(),
            price_type: PriceType::Nominal,
            stock_status: StockStatus::InStock,
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn min_avg_max_are_ordered() {
        let observations: Vec<_> =
            [500.0, 550.0, 700.0].into_iter().map(|p| obs(Some(p))).collect();
        let range = price_range(&observations);
        assert!(range.min <= range.avg && range.avg <= range.max);
        assert_eq!(range.min, 500.0);
        assert_eq!(range.max, 700.0);
        assert_eq!(range.avg, 583.33);
        assert_eq!(range.spread_percent, 40.0);
    }

    #[test]
    fn empty_set_yields_zero_range() {
        assert_eq!(price_range(&[]), PriceRange::empty());
    }

    #[test]
    fn non_positive_and_missing_prices_are_excluded() {
        let observations = vec![obs(Some(100.0)), obs(Some(0.0)), obs(Some(-5.0)), obs(None)];
        let range = price_range(&observations);
        assert_eq!(range.min, 100.0);
        assert_eq!(range.max, 100.0);
        assert_eq!(range.avg, 100.0);
    }

    #[test]
    fn spread_is_zero_when_min_equals_max() {
        let observations = vec![obs(Some(250.0)), obs(Some(250.0))];
        assert_eq!(price_range(&observations).spread_percent, 0.0);
    }

    #[test]
    fn only_unusable_prices_behave_like_empty() {
        let observations = vec![obs(Some(0.0)), obs(None)];
        assert_eq!(price_range(&observations), PriceRange::empty());
    }
}
