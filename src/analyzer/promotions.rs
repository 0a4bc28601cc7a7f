use crate::analyzer::stats;
use crate::config::AnalyticsConfig;
use crate::model::{
    Channel, ChannelType, EngineError, EngineResult, PriceObservation, PriceType,
};
use crate::storage::{ObservationFilter, PriceRepository};
use crate::utils::{percent_below, round1, round2};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct PromotionEntry {
    pub id: i64,
    pub phone: String,
    pub phone_id: i64,
    pub channel: String,
    pub channel_id: i64,
    /// Average of the phone's other in-window observations; when none exist
    /// this falls back to an assumed 20% markup over the promo price. An
    /// estimate of the original price, not an observed fact.
    pub original_price: f64,
    pub discounted_price: f64,
    pub discount_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneDiscountRank {
    pub phone: String,
    pub phone_id: i64,
    pub max_discount: f64,
    /// Distinct channels running a promotion on this phone.
    pub channel_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub active_promotions: Vec<PromotionEntry>,
    pub discount_ranking: Vec<PhoneDiscountRank>,
    pub total_count: usize,
    pub avg_discount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDiscount {
    pub channel: String,
    pub channel_id: i64,
    pub channel_type: ChannelType,
    pub price: f64,
    pub discount_percent: f64,
    pub is_promotional: bool,
}

/// Ranks promotional observations by discount depth against each phone's
/// estimated original price.
pub struct PromotionAnalyzer {
    repo: Arc<dyn PriceRepository>,
    cfg: Arc<AnalyticsConfig>,
}

impl PromotionAnalyzer {
    pub fn new(repo: Arc<dyn PriceRepository>, cfg: Arc<AnalyticsConfig>) -> Self {
        Self { repo, cfg }
    }

    /// Promotion-typed observations within the window, ranked by discount.
    /// Promotions shallower than the configured floor are dropped; the
    /// boundary itself is kept.
    pub async fn active_promotions(
        &self,
        country_id: Option<i64>,
        today: NaiveDate,
    ) -> EngineResult<PromotionReport> {
        let from = today - Duration::days(self.cfg.window_days);
        let promos = self
            .repo
            .observations(&ObservationFilter {
                country_id,
                price_type: Some(PriceType::Promotion),
                date_from: Some(from),
                date_to: Some(today),
                ..Default::default()
            })
            .await?;

        // Baselines come from every observation of the phone in the window,
        // regardless of country, so a single-market promo still has context.
        let all = self
            .repo
            .observations(&ObservationFilter {
                date_from: Some(from),
                date_to: Some(today),
                ..Default::default()
            })
            .await?;
        let mut by_phone: HashMap<i64, Vec<&PriceObservation>> = HashMap::new();
        for observation in &all {
            by_phone.entry(observation.phone_id).or_default().push(observation);
        }

        let phone_names: HashMap<i64, String> = self
            .repo
            .phones()
            .await?
            .into_iter()
            .map(|p| (p.id, p.full_name()))
            .collect();
        let channel_names: HashMap<i64, String> = self
            .repo
            .channels()
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let mut scored = Vec::new();
        for promo in &promos {
            let Some(price) = promo.price_usd.filter(|&p| p > 0.0) else {
                continue;
            };
            let original_price = self.estimate_original_price(promo, price, &by_phone);
            let discount_percent = percent_below(original_price, price);
            scored.push(PromotionEntry {
                id: promo.id,
                phone: phone_names
                    .get(&promo.phone_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Phone #{}", promo.phone_id)),
                phone_id: promo.phone_id,
                channel: channel_names
                    .get(&promo.channel_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                channel_id: promo.channel_id,
                original_price,
                discounted_price: round2(price),
                discount_percent,
            });
        }

        let discount_ranking = rank_by_phone(&scored, self.cfg.promo_leaderboard_limit);

        let mut active: Vec<PromotionEntry> = scored
            .into_iter()
            .filter(|p| p.discount_percent >= self.cfg.min_promo_discount_percent)
            .collect();
        active.sort_by(|a, b| {
            b.discount_percent
                .partial_cmp(&a.discount_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        active.truncate(self.cfg.promo_limit);

        let avg_discount = if active.is_empty() {
            0.0
        } else {
            round1(
                active.iter().map(|p| p.discount_percent).sum::<f64>() / active.len() as f64,
            )
        };

        Ok(PromotionReport {
            total_count: active.len(),
            active_promotions: active,
            discount_ranking,
            avg_discount,
        })
    }

    /// Per-channel discount view for one phone against its own average price.
    /// A channel counts as promotional when the observation is promo-typed or
    /// the implied discount clears the configured bar.
    pub async fn discounts_for_phone(
        &self,
        phone_id: i64,
        today: NaiveDate,
    ) -> EngineResult<Vec<ChannelDiscount>> {
        if self.repo.phone(phone_id).await?.is_none() {
            return Err(EngineError::NotFound("phone"));
        }

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

        let channel_index: HashMap<i64, Channel> = self
            .repo
            .channels()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut discounts = Vec::new();
        for observation in &observations {
            let Some(price) = observation.price_usd.filter(|&p| p > 0.0) else {
                continue;
            };
            let Some(channel) = channel_index.get(&observation.channel_id) else {
                continue;
            };
            let raw_discount = percent_below(avg_price, price);
            let discount_percent = raw_discount.max(0.0);
            let is_promotional = observation.price_type == PriceType::Promotion
                || discount_percent >= self.cfg.promo_implied_discount_percent;
            if !is_promotional {
                continue;
            }
            discounts.push(ChannelDiscount {
                channel: channel.name.clone(),
                channel_id: channel.id,
                channel_type: channel.channel_type,
                price: round2(price),
                discount_percent,
                is_promotional,
            });
        }
        discounts.sort_by(|a, b| {
            b.discount_percent
                .partial_cmp(&a.discount_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.channel_id.cmp(&b.channel_id))
        });
        Ok(discounts)
    }

    fn estimate_original_price(
        &self,
        promo: &PriceObservation,
        promo_price: f64,
        by_phone: &HashMap<i64, Vec<&PriceObservation>>,
    ) -> f64 {
        let others: Vec<f64> = by_phone
            .get(&promo.phone_id)
            .map(|observations| {
                observations
                    .iter()
                    .filter(|o| o.id != promo.id)
                    .filter_map(|o| o.price_usd)
                    .filter(|&p| p > 0.0)
                    .collect()
            })
            .unwrap_or_default();

        if others.is_empty() {
            // No baseline: assume the configured typical promo markup.
            round2(promo_price * self.cfg.promo_fallback_markup)
        } else {
            round2(others.iter().sum::<f64>() / others.len() as f64)
        }
    }
}

fn rank_by_phone(scored: &[PromotionEntry], limit: usize) -> Vec<PhoneDiscountRank> {
    let mut max_discount: HashMap<i64, (String, f64)> = HashMap::new();
    let mut channels: HashMap<i64, HashSet<i64>> = HashMap::new();
    for entry in scored {
        channels.entry(entry.phone_id).or_default().insert(entry.channel_id);
        max_discount
            .entry(entry.phone_id)
            .and_modify(|(_, best)| *best = best.max(entry.discount_percent))
            .or_insert_with(|| (entry.phone.clone(), entry.discount_percent));
    }

    let mut ranking: Vec<PhoneDiscountRank> = max_discount
        .into_iter()
        .map(|(phone_id, (phone, discount))| PhoneDiscountRank {
            phone,
            phone_id,
            max_discount: discount,
            channel_count: channels.get(&phone_id).map_or(0, |set| set.len()),
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.max_discount
            .partial_cmp(&a.max_discount)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.phone_id.cmp(&b.phone_id))
    });
    ranking.truncate(limit);
    ranking
}
