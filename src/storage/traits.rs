use crate::model::{Channel, Country, Phone, PriceObservation, PriceType, StorageError};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Composable observation filter; `None` means no restriction on that
/// dimension. Date bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub phone_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub country_id: Option<i64>,
    pub price_type: Option<PriceType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Grouping dimension for windowed aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Phone,
    Channel,
    Country,
}

/// Read-only query surface over recorded price observations. The engines
/// consume this seam only; swapping in another backend (e.g. the denormalized
/// trade-record table) must not change engine behavior.
#[async_trait::async_trait]
pub trait PriceRepository: Send + Sync {
    async fn observations(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Vec<PriceObservation>, StorageError>;

    /// Average USD price per dimension key over the window. Non-positive
    /// prices are excluded before averaging.
    async fn grouped_average(
        &self,
        group_by: GroupBy,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<i64, f64>, StorageError>;

    /// Minimum USD price per phone within one country over the window.
    async fn min_usd_by_phone(
        &self,
        country_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<i64, f64>, StorageError>;

    async fn phone(&self, id: i64) -> Result<Option<Phone>, StorageError>;

    async fn phones(&self) -> Result<Vec<Phone>, StorageError>;

    async fn phones_created_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Phone>, StorageError>;

    /// Active channels, all countries.
    async fn channels(&self) -> Result<Vec<Channel>, StorageError>;

    /// Active countries.
    async fn countries(&self) -> Result<Vec<Country>, StorageError>;

    async fn country_by_code(&self, code: &str) -> Result<Option<Country>, StorageError>;

    async fn phone_count(&self) -> Result<i64, StorageError>;

    async fn observation_count_since(&self, since: NaiveDate) -> Result<i64, StorageError>;

    async fn active_channel_count(&self) -> Result<i64, StorageError>;

    async fn latest_observation_date(&self) -> Result<Option<NaiveDate>, StorageError>;

    /// Distinct channels carrying at least one observation for the phone in
    /// the window.
    async fn distinct_channel_count(
        &self,
        phone_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, StorageError>;
}
