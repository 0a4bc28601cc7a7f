// Core domain types: observations, channels, countries, phones and the
// derived analytics records the engines produce.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Nominal,
    TelcoContract,
    Promotion,
    Bundle,
    Manual,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceType::Nominal => "nominal",
            PriceType::TelcoContract => "telco_contract",
            PriceType::Promotion => "promotion",
            PriceType::Bundle => "bundle",
            PriceType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "nominal" => Some(PriceType::Nominal),
            "telco_contract" => Some(PriceType::TelcoContract),
            "promotion" => Some(PriceType::Promotion),
            "bundle" => Some(PriceType::Bundle),
            "manual" => Some(PriceType::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    Preorder,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Preorder => "preorder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(StockStatus::InStock),
            "out_of_stock" => Some(StockStatus::OutOfStock),
            "preorder" => Some(StockStatus::Preorder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Telco,
    Retail,
    PurePlayer,
    Hypermarket,
    BrandOfficial,
    OfficialBrand,
}

impl ChannelType {
    /// Fixed display ordering (lower = shown first). Not used in analytics math.
    pub fn priority(&self) -> u8 {
        match self {
            ChannelType::Telco => 1,
            ChannelType::OfficialBrand => 2,
            ChannelType::Retail => 3,
            ChannelType::PurePlayer => 4,
            ChannelType::Hypermarket => 5,
            ChannelType::BrandOfficial => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Telco => "telco",
            ChannelType::Retail => "retail",
            ChannelType::PurePlayer => "pure_player",
            ChannelType::Hypermarket => "hypermarket",
            ChannelType::BrandOfficial => "brand_official",
            ChannelType::OfficialBrand => "official_brand",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telco" => Some(ChannelType::Telco),
            "retail" => Some(ChannelType::Retail),
            "pure_player" => Some(ChannelType::PurePlayer),
            "hypermarket" => Some(ChannelType::Hypermarket),
            "brand_official" => Some(ChannelType::BrandOfficial),
            "official_brand" => Some(ChannelType::OfficialBrand),
            _ => None,
        }
    }
}

/// A single scraped price fact. Immutable once recorded; the engines only read.
#[derive(Debug, Clone, Serialize)]
pub struct PriceObservation {
    pub id: i64,
    pub phone_id: i64,
    pub channel_id: i64,
    pub price_local: f64,
    pub price_usd: Option<f64>,
    pub currency: String,
    pub price_type: PriceType,
    pub stock_status: StockStatus,
    pub date: NaiveDate,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub country_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Country {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub currency: String,
    pub priority: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Phone {
    pub id: i64,
    pub brand: String,
    pub model: String,
    pub display_size: Option<String>,
    pub storage: Option<String>,
    pub ram: Option<String>,
    pub main_camera: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Phone {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.brand, self.model).trim().to_string()
    }
}

/// Range statistics over a set of observations. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub spread_percent: f64,
}

impl PriceRange {
    pub fn empty() -> Self {
        Self { min: 0.0, max: 0.0, avg: 0.0, spread_percent: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarketPosition {
    #[serde(rename = "premium")]
    Premium,
    #[serde(rename = "mid-range")]
    MidRange,
    #[serde(rename = "budget")]
    Budget,
}

/// Channel pricing tier. Every priced channel resolves to exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    BestValue,
    GreatDeal,
    GoodPrice,
    FairPrice,
    Overpriced,
}

/// Recommendation priority; the derive ordering is the display order (high first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    BestValue,
    LowestPrice,
    Avoid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub channel_id: i64,
    pub channel_name: String,
    pub reason: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: RecommendationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Critical,
    Premium,
}

/// A country price deviating from the benchmark market beyond a threshold.
/// `discount_percent` is signed: positive means cheaper than the benchmark.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkViolation {
    pub phone: String,
    pub phone_id: i64,
    pub country: String,
    pub country_id: i64,
    pub channel: String,
    pub channel_id: Option<i64>,
    pub local_price: f64,
    pub benchmark_price: f64,
    pub discount_percent: f64,
    pub status: ViolationStatus,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("no data for the requested window")]
    NoData,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("computation cancelled")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Cooperative cancellation for long scans. A cancelled computation returns
/// `EngineError::Cancelled` and never a partial result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}
