// In-memory database fixtures shared by the analyzer and storage tests.
use crate::model::{ChannelType, PriceType, StockStatus};
use crate::storage::SqliteStorage;
use chrono::{NaiveDate, Utc};

/// Two markets, two phones. The UAE is the benchmark market:
/// - Galaxy S25: UAE min 1000, KSA min 650 (35% under benchmark, critical)
/// - iPhone 16: UAE min 800, KSA min 950 (18.8% over benchmark, premium)
pub struct MarketFixture {
    pub storage: SqliteStorage,
    pub uae: i64,
    pub ksa: i64,
    pub uae_noon: i64,
    pub uae_sharaf: i64,
    pub ksa_jarir: i64,
    pub ksa_stc: i64,
    pub phone_a: i64,
    pub phone_b: i64,
}

pub async fn two_country_market() -> MarketFixture {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let uae = storage
        .record_country("AE", "United Arab Emirates", "AED", 1, true)
        .await
        .unwrap();
    let ksa = storage
        .record_country("SA", "Saudi Arabia", "SAR", 2, true)
        .await
        .unwrap();

    let uae_noon = storage
        .record_channel("Noon", ChannelType::PurePlayer, uae, true)
        .await
        .unwrap();
    let uae_sharaf = storage
        .record_channel("Sharaf DG", ChannelType::Retail, uae, true)
        .await
        .unwrap();
    let ksa_jarir = storage
        .record_channel("Jarir", ChannelType::Retail, ksa, true)
        .await
        .unwrap();
    let ksa_stc = storage
        .record_channel("STC", ChannelType::Telco, ksa, true)
        .await
        .unwrap();

    let phone_a = storage
        .record_phone("Samsung", "Galaxy S25", Utc::now())
        .await
        .unwrap();
    let phone_b = storage
        .record_phone("Apple", "iPhone 16", Utc::now())
        .await
        .unwrap();

    observe(&storage, phone_a, uae_noon, 1000.0, day(1)).await;
    observe(&storage, phone_a, uae_sharaf, 1100.0, day(2)).await;
    observe(&storage, phone_a, ksa_jarir, 650.0, day(3)).await;
    observe(&storage, phone_b, uae_noon, 800.0, day(1)).await;
    observe(&storage, phone_b, ksa_jarir, 950.0, day(2)).await;
    observe(&storage, phone_b, ksa_stc, 980.0, day(3)).await;

    MarketFixture {
        storage,
        uae,
        ksa,
        uae_noon,
        uae_sharaf,
        ksa_jarir,
        ksa_stc,
        phone_a,
        phone_b,
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
}

pub async fn observe(
    storage: &SqliteStorage,
    phone_id: i64,
    channel_id: i64,
    price_usd: f64,
    date: NaiveDate,
) -> i64 {
    observe_typed(storage, phone_id, channel_id, price_usd, date, PriceType::Nominal).await
}

pub async fn observe_promo(
    storage: &SqliteStorage,
    phone_id: i64,
    channel_id: i64,
    price_usd: f64,
    date: NaiveDate,
) -> i64 {
    observe_typed(storage, phone_id, channel_id, price_usd, date, PriceType::Promotion).await
}

pub async fn observe_typed(
    storage: &SqliteStorage,
    phone_id: i64,
    channel_id: i64,
    price_usd: f64,
    date: NaiveDate,
    price_type: PriceType,
) -> i64 {
    storage
        .record_observation(
            phone_id,
            channel_id,
            price_usd,
            Some(price_usd),
            "USD",
            price_type,
            StockStatus::InStock,
            date,
            Utc::now(),
        )
        .await
        .unwrap()
}
