use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::{OffsetDateTime, UtcOffset};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceConfig {
    pub device_id: String,
    pub name: String,
    pub daily_goal_ml: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DrinkEvent {
    pub ts: i64,
    pub amount_ml: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyTotal {
    pub day: String, // YYYY-MM-DD, bottle-local
    pub total_ml: f64,
    pub updated_ts: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AlertEvent {
    pub ts: i64,
    pub kind: String,
}

/// Calendar day of `ts` at `utc_offset_sec`, as `YYYY-MM-DD`.
pub fn day_key(ts: OffsetDateTime, utc_offset_sec: i32) -> String {
    let offset = UtcOffset::from_whole_seconds(utc_offset_sec).unwrap_or(UtcOffset::UTC);
    let local = ts.to_offset(offset);
    format!(
        "{:04}-{:02}-{:02}",
        local.year(),
        local.month() as u8,
        local.day()
    )
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/hydration/hydration.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // An in-memory database exists per connection; keep a single one.
        let max = if db_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Devices
    // ----------------------------

    pub async fn upsert_device(&self, d: &DeviceConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, name, daily_goal_ml)
            VALUES (?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
              name=excluded.name,
              daily_goal_ml=excluded.daily_goal_ml
            "#,
        )
        .bind(&d.device_id)
        .bind(&d.name)
        .bind(d.daily_goal_ml)
        .execute(&self.pool)
        .await
        .context("upsert_device failed")?;
        Ok(())
    }

    pub async fn load_devices(&self) -> Result<Vec<DeviceConfig>> {
        sqlx::query_as::<_, DeviceConfig>(
            "SELECT device_id, name, daily_goal_ml FROM devices ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_devices failed")
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Option<DeviceConfig>> {
        sqlx::query_as::<_, DeviceConfig>(
            "SELECT device_id, name, daily_goal_ml FROM devices WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_device failed")
    }

    // ----------------------------
    // Telemetry
    // ----------------------------

    pub async fn insert_drink(&self, ts: i64, device_id: &str, amount_ml: f64) -> Result<()> {
        sqlx::query("INSERT INTO drink_events (ts, device_id, amount_ml) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(device_id)
            .bind(amount_ml)
            .execute(&self.pool)
            .await
            .context("insert_drink failed")?;
        Ok(())
    }

    /// Record the bottle's own running total for `day`; last report wins.
    pub async fn set_daily_total(
        &self,
        day: &str,
        device_id: &str,
        total_ml: f64,
        ts: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_totals (day, device_id, total_ml, updated_ts)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(day, device_id) DO UPDATE SET
              total_ml=excluded.total_ml,
              updated_ts=excluded.updated_ts
            "#,
        )
        .bind(day)
        .bind(device_id)
        .bind(total_ml)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("set_daily_total failed")?;
        Ok(())
    }

    pub async fn insert_alert(&self, ts: i64, device_id: &str, kind: &str) -> Result<()> {
        sqlx::query("INSERT INTO alert_events (ts, device_id, kind) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(device_id)
            .bind(kind)
            .execute(&self.pool)
            .await
            .context("insert_alert failed")?;
        Ok(())
    }

    // ----------------------------
    // History
    // ----------------------------

    /// Newest first.
    pub async fn recent_drinks(&self, device_id: &str, limit: i64) -> Result<Vec<DrinkEvent>> {
        sqlx::query_as::<_, DrinkEvent>(
            r#"
            SELECT ts, amount_ml FROM drink_events
            WHERE device_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_drinks failed")
    }

    /// Newest day first.
    pub async fn daily_totals(&self, device_id: &str, days: i64) -> Result<Vec<DailyTotal>> {
        sqlx::query_as::<_, DailyTotal>(
            r#"
            SELECT day, total_ml, updated_ts FROM daily_totals
            WHERE device_id = ?
            ORDER BY day DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(days)
        .fetch_all(&self.pool)
        .await
        .context("daily_totals failed")
    }

    pub async fn recent_alerts(&self, device_id: &str, limit: i64) -> Result<Vec<AlertEvent>> {
        sqlx::query_as::<_, AlertEvent>(
            r#"
            SELECT ts, kind FROM alert_events
            WHERE device_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_alerts failed")
    }

    /// Sum of drink events logged in `[from_ts, to_ts)`.  Cross-checks the
    /// bottle's own total.
    pub async fn drink_sum_between(&self, device_id: &str, from_ts: i64, to_ts: i64) -> Result<f64> {
        let sum: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount_ml) FROM drink_events
            WHERE device_id = ? AND ts >= ? AND ts < ?
            "#,
        )
        .bind(device_id)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_one(&self.pool)
        .await
        .context("drink_sum_between failed")?;
        Ok(sum.unwrap_or(0.0))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn desk() -> DeviceConfig {
        DeviceConfig {
            device_id: "desk".into(),
            name: "Desk bottle".into(),
            daily_goal_ml: 2000.0,
        }
    }

    #[test]
    fn day_key_respects_offset() {
        let ts = datetime!(2024-01-01 20:00 UTC);
        assert_eq!(day_key(ts, 0), "2024-01-01");
        assert_eq!(day_key(ts, 19_800), "2024-01-02");
        assert_eq!(day_key(ts, -8 * 3600), "2024-01-01");
    }

    #[test]
    fn day_key_invalid_offset_falls_back_to_utc() {
        let ts = datetime!(2024-03-05 23:30 UTC);
        assert_eq!(day_key(ts, 99 * 3600), "2024-03-05");
    }

    #[tokio::test]
    async fn upsert_device_replaces_fields() {
        let db = test_db().await;
        db.upsert_device(&desk()).await.unwrap();
        let mut d = desk();
        d.daily_goal_ml = 2500.0;
        db.upsert_device(&d).await.unwrap();

        let all = db.load_devices().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].daily_goal_ml, 2500.0);
        assert!(db.get_device("kitchen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drinks_newest_first_and_summed() {
        let db = test_db().await;
        db.insert_drink(100, "desk", 70.0).await.unwrap();
        db.insert_drink(200, "desk", 55.5).await.unwrap();
        db.insert_drink(150, "other", 300.0).await.unwrap();

        let drinks = db.recent_drinks("desk", 10).await.unwrap();
        assert_eq!(drinks.len(), 2);
        assert_eq!(drinks[0].ts, 200);
        assert_eq!(db.drink_sum_between("desk", 0, 1000).await.unwrap(), 125.5);
        assert_eq!(db.drink_sum_between("desk", 150, 1000).await.unwrap(), 55.5);
        assert_eq!(db.drink_sum_between("nobody", 0, 1000).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn daily_total_last_report_wins() {
        let db = test_db().await;
        db.set_daily_total("2024-01-01", "desk", 70.0, 10).await.unwrap();
        db.set_daily_total("2024-01-01", "desk", 125.5, 20).await.unwrap();
        db.set_daily_total("2024-01-02", "desk", 0.0, 30).await.unwrap();

        let totals = db.daily_totals("desk", 7).await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].day, "2024-01-02");
        assert_eq!(totals[1].total_ml, 125.5);
        assert_eq!(totals[1].updated_ts, 20);
    }

    #[tokio::test]
    async fn alerts_are_limited() {
        let db = test_db().await;
        for (ts, kind) in [(1, "missing"), (2, "replaced"), (3, "reminder_started")] {
            db.insert_alert(ts, "desk", kind).await.unwrap();
        }
        let alerts = db.recent_alerts("desk", 2).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, "reminder_started");
    }
}
