use crate::model::{
    Channel, ChannelType, Country, Phone, PriceObservation, PriceType, StockStatus, StorageError,
};
use crate::storage::traits::{GroupBy, ObservationFilter, PriceRepository};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use tokio::sync::Mutex;

const OBSERVATION_COLUMNS: &str = "p.id, p.phone_id, p.channel_id, p.price_local, p.price_usd, \
     p.currency, p.price_type, p.stock_status, p.date, p.scraped_at";

/// SQLite-backed repository over the normalized observation schema.
/// A single connection behind a mutex keeps each computation on one
/// point-in-time view of the data.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens the database, creating the schema when missing.
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS countries (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                currency TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                channel_type TEXT NOT NULL,
                country_id INTEGER NOT NULL REFERENCES countries(id),
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS phones (
                id INTEGER PRIMARY KEY,
                brand TEXT NOT NULL,
                model TEXT NOT NULL DEFAULT '',
                display_size TEXT,
                storage TEXT,
                ram TEXT,
                main_camera TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prices (
                id INTEGER PRIMARY KEY,
                phone_id INTEGER NOT NULL REFERENCES phones(id),
                channel_id INTEGER NOT NULL REFERENCES channels(id),
                price_local REAL NOT NULL,
                price_usd REAL,
                currency TEXT NOT NULL,
                price_type TEXT NOT NULL,
                stock_status TEXT NOT NULL,
                date TEXT NOT NULL,
                scraped_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_prices_phone ON prices(phone_id);
            CREATE INDEX IF NOT EXISTS idx_prices_channel ON prices(channel_id);
            CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);
            ",
        )?;
        Ok(())
    }

    /// Ingestion write path. The analytics engines never call these; they are
    /// used by scraping glue and test fixtures.
    pub async fn record_country(
        &self,
        code: &str,
        name: &str,
        currency: &str,
        priority: i64,
        active: bool,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO countries (code, name, currency, priority, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![code, name, currency, priority, active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn record_channel(
        &self,
        name: &str,
        channel_type: ChannelType,
        country_id: i64,
        active: bool,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO channels (name, channel_type, country_id, active)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, channel_type.as_str(), country_id, active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn record_phone(
        &self,
        brand: &str,
        model: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO phones (brand, model, created_at) VALUES (?1, ?2, ?3)",
            params![brand, model, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn record_observation(
        &self,
        phone_id: i64,
        channel_id: i64,
        price_local: f64,
        price_usd: Option<f64>,
        currency: &str,
        price_type: PriceType,
        stock_status: StockStatus,
        date: NaiveDate,
        scraped_at: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO prices (
                phone_id, channel_id, price_local, price_usd, currency,
                price_type, stock_status, date, scraped_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                phone_id,
                channel_id,
                price_local,
                price_usd,
                currency,
                price_type.as_str(),
                stock_status.as_str(),
                date,
                scraped_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn map_observation(row: &Row) -> Result<PriceObservation, rusqlite::Error> {
        let price_type_str: String = row.get(6)?;
        let price_type = PriceType::parse(&price_type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown price_type: {price_type_str}").into(),
            )
        })?;
        let stock_str: String = row.get(7)?;
        let stock_status = StockStatus::parse(&stock_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown stock_status: {stock_str}").into(),
            )
        })?;

        Ok(PriceObservation {
            id: row.get(0)?,
            phone_id: row.get(1)?,
            channel_id: row.get(2)?,
            price_local: row.get(3)?,
            price_usd: row.get(4)?,
            currency: row.get(5)?,
            price_type,
            stock_status,
            date: row.get(8)?,
            scraped_at: row.get(9)?,
        })
    }

    fn map_channel(row: &Row) -> Result<Channel, rusqlite::Error> {
        let type_str: String = row.get(2)?;
        let channel_type = ChannelType::parse(&type_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown channel_type: {type_str}").into(),
            )
        })?;
        Ok(Channel {
            id: row.get(0)?,
            name: row.get(1)?,
            channel_type,
            country_id: row.get(3)?,
            active: row.get(4)?,
        })
    }

    fn map_phone(row: &Row) -> Result<Phone, rusqlite::Error> {
        Ok(Phone {
            id: row.get(0)?,
            brand: row.get(1)?,
            model: row.get(2)?,
            display_size: row.get(3)?,
            storage: row.get(4)?,
            ram: row.get(5)?,
            main_camera: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

#[async_trait::async_trait]
impl PriceRepository for SqliteStorage {
    async fn observations(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Vec<PriceObservation>, StorageError> {
        let mut sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM prices p \
             JOIN channels ch ON ch.id = p.channel_id WHERE 1=1"
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql + Send>> = Vec::new();

        if let Some(phone_id) = filter.phone_id {
            sql.push_str(" AND p.phone_id = ?");
            args.push(Box::new(phone_id));
        }
        if let Some(channel_id) = filter.channel_id {
            sql.push_str(" AND p.channel_id = ?");
            args.push(Box::new(channel_id));
        }
        if let Some(country_id) = filter.country_id {
            sql.push_str(" AND ch.country_id = ?");
            args.push(Box::new(country_id));
        }
        if let Some(price_type) = filter.price_type {
            sql.push_str(" AND p.price_type = ?");
            args.push(Box::new(price_type.as_str()));
        }
        if let Some(from) = filter.date_from {
            sql.push_str(" AND p.date >= ?");
            args.push(Box::new(from));
        }
        if let Some(to) = filter.date_to {
            sql.push_str(" AND p.date <= ?");
            args.push(Box::new(to));
        }
        sql.push_str(" ORDER BY p.date, p.id");

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            Self::map_observation,
        )?;

        let mut observations = Vec::new();
        for row in rows {
            observations.push(row?);
        }
        Ok(observations)
    }

    async fn grouped_average(
        &self,
        group_by: GroupBy,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<i64, f64>, StorageError> {
        let sql = match group_by {
            GroupBy::Phone => {
                "SELECT p.phone_id, AVG(p.price_usd) FROM prices p
                 WHERE p.price_usd > 0 AND p.date >= ?1 AND p.date <= ?2
                 GROUP BY p.phone_id"
            }
            GroupBy::Channel => {
                "SELECT p.channel_id, AVG(p.price_usd) FROM prices p
                 WHERE p.price_usd > 0 AND p.date >= ?1 AND p.date <= ?2
                 GROUP BY p.channel_id"
            }
            GroupBy::Country => {
                "SELECT ch.country_id, AVG(p.price_usd) FROM prices p
                 JOIN channels ch ON ch.id = p.channel_id
                 WHERE p.price_usd > 0 AND p.date >= ?1 AND p.date <= ?2
                 GROUP BY ch.country_id"
            }
        };

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, avg) = row?;
            map.insert(key, avg);
        }
        Ok(map)
    }

    async fn min_usd_by_phone(
        &self,
        country_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<i64, f64>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT p.phone_id, MIN(p.price_usd) FROM prices p
             JOIN channels ch ON ch.id = p.channel_id
             WHERE ch.country_id = ?1 AND p.price_usd > 0
               AND p.date >= ?2 AND p.date <= ?3
             GROUP BY p.phone_id",
        )?;
        let rows = stmt.query_map(params![country_id, from, to], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (phone_id, min) = row?;
            map.insert(phone_id, min);
        }
        Ok(map)
    }

    async fn phone(&self, id: i64) -> Result<Option<Phone>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, brand, model, display_size, storage, ram, main_camera, created_at
             FROM phones WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_phone)?;
        rows.next().transpose().map_err(StorageError::from)
    }

    async fn phones(&self) -> Result<Vec<Phone>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, brand, model, display_size, storage, ram, main_camera, created_at
             FROM phones ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::map_phone)?;
        let mut phones = Vec::new();
        for row in rows {
            phones.push(row?);
        }
        Ok(phones)
    }

    async fn phones_created_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Phone>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, brand, model, display_size, storage, ram, main_camera, created_at
             FROM phones WHERE created_at >= ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since, limit as i64], Self::map_phone)?;
        let mut phones = Vec::new();
        for row in rows {
            phones.push(row?);
        }
        Ok(phones)
    }

    async fn channels(&self) -> Result<Vec<Channel>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, channel_type, country_id, active
             FROM channels WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::map_channel)?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    async fn countries(&self) -> Result<Vec<Country>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, code, name, currency, priority, active
             FROM countries WHERE active = 1 ORDER BY priority, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Country {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                currency: row.get(3)?,
                priority: row.get(4)?,
                active: row.get(5)?,
            })
        })?;
        let mut countries = Vec::new();
        for row in rows {
            countries.push(row?);
        }
        Ok(countries)
    }

    async fn country_by_code(&self, code: &str) -> Result<Option<Country>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, code, name, currency, priority, active
             FROM countries WHERE LOWER(code) = LOWER(?1)",
        )?;
        let mut rows = stmt.query_map(params![code], |row| {
            Ok(Country {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                currency: row.get(3)?,
                priority: row.get(4)?,
                active: row.get(5)?,
            })
        })?;
        rows.next().transpose().map_err(StorageError::from)
    }

    async fn phone_count(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row("SELECT COUNT(*) FROM phones", [], |row| row.get(0))?;
        Ok(count)
    }

    async fn observation_count_since(&self, since: NaiveDate) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM prices WHERE date >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn active_channel_count(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM channels WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn latest_observation_date(&self) -> Result<Option<NaiveDate>, StorageError> {
        let conn = self.conn.lock().await;
        let latest = conn.query_row("SELECT MAX(date) FROM prices", [], |row| row.get(0))?;
        Ok(latest)
    }

    async fn distinct_channel_count(
        &self,
        phone_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT channel_id) FROM prices
             WHERE phone_id = ?1 AND date >= ?2 AND date <= ?3",
            params![phone_id, from, to],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    #[tokio::test]
    async fn filters_compose() {
        let db = fixtures::two_country_market().await;

        let all = db
            .storage
            .observations(&ObservationFilter::default())
            .await
            .unwrap();
        assert!(all.len() >= 6);

        let one_phone = db
            .storage
            .observations(&ObservationFilter {
                phone_id: Some(db.phone_a),
                country_id: Some(db.uae),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(one_phone.iter().all(|o| o.phone_id == db.phone_a));

        let promos = db
            .storage
            .observations(&ObservationFilter {
                price_type: Some(PriceType::Promotion),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(promos.iter().all(|o| o.price_type == PriceType::Promotion));
    }

    #[tokio::test]
    async fn grouped_average_skips_non_positive_prices() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let country = storage
            .record_country("AE", "United Arab Emirates", "AED", 1, true)
            .await
            .unwrap();
        let channel = storage
            .record_channel("Noon", ChannelType::PurePlayer, country, true)
            .await
            .unwrap();
        let phone = storage
            .record_phone("Samsung", "Galaxy S25", Utc::now())
            .await
            .unwrap();

        fixtures::observe(&storage, phone, channel, 100.0, day(1)).await;
        fixtures::observe(&storage, phone, channel, 200.0, day(2)).await;
        // A failed conversion lands as zero; it must not drag the average down.
        fixtures::observe(&storage, phone, channel, 0.0, day(3)).await;

        let averages = storage
            .grouped_average(GroupBy::Phone, day(1), day(5))
            .await
            .unwrap();
        assert_eq!(averages[&phone], 150.0);
    }

    #[tokio::test]
    async fn min_by_phone_is_scoped_to_country() {
        let db = fixtures::two_country_market().await;
        let mins = db
            .storage
            .min_usd_by_phone(db.uae, day(1), day(28))
            .await
            .unwrap();
        assert_eq!(mins[&db.phone_a], 1000.0);
        assert!(!mins.is_empty());
    }

    #[tokio::test]
    async fn country_lookup_is_case_insensitive() {
        let db = fixtures::two_country_market().await;
        let found = db.storage.country_by_code("ae").await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(db.uae));
        assert!(db.storage.country_by_code("XX").await.unwrap().is_none());
    }
}
