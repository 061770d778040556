//! SQLite-backed store.
//!
//! Schema is created on startup; device creation inserts the device and
//! all 16 channel rows in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{IoSrvError, Result};
use crate::model::{
    Channel, ChannelKind, ChangeSource, Device, NewDevice, StateLogEntry, CHANNELS_PER_KIND,
};
use crate::store::{DeviceStore, NewLogEntry};

/// SQLite implementation of [`DeviceStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database and ensure the schema exists
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| IoSrvError::storage(format!("Failed to open {}: {}", url, e)))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                unit_id INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                poll_interval_ms INTEGER NOT NULL,
                timeout_ms INTEGER NOT NULL,
                last_connect_ok INTEGER,
                last_connect_error TEXT,
                last_poll_at TEXT
            );

            CREATE TABLE IF NOT EXISTS channels (
                device_id INTEGER NOT NULL REFERENCES devices(id),
                kind TEXT NOT NULL,
                number INTEGER NOT NULL,
                label TEXT NOT NULL,
                state INTEGER NOT NULL DEFAULT 0,
                last_change_at TEXT,
                fail_safe_enabled INTEGER NOT NULL DEFAULT 0,
                fail_safe_value INTEGER NOT NULL DEFAULT 0,
                UNIQUE(device_id, kind, number)
            );

            CREATE TABLE IF NOT EXISTS state_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                number INTEGER NOT NULL,
                previous_state INTEGER NOT NULL,
                new_state INTEGER NOT NULL,
                source TEXT NOT NULL,
                username TEXT,
                reason TEXT,
                at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!("SQLite schema ready");
        Ok(())
    }

    fn device_from_row(row: &SqliteRow) -> Result<Device> {
        Ok(Device {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            port: row.try_get::<i64, _>("port")? as u16,
            unit_id: row.try_get::<i64, _>("unit_id")? as u8,
            enabled: row.try_get("enabled")?,
            poll_interval_ms: row.try_get::<i64, _>("poll_interval_ms")? as u64,
            timeout_ms: row.try_get::<i64, _>("timeout_ms")? as u64,
            last_connect_ok: row.try_get("last_connect_ok")?,
            last_connect_error: row.try_get("last_connect_error")?,
            last_poll_at: row.try_get("last_poll_at")?,
        })
    }

    fn channel_from_row(row: &SqliteRow) -> Result<Channel> {
        let kind: String = row.try_get("kind")?;
        Ok(Channel {
            device_id: row.try_get("device_id")?,
            kind: ChannelKind::parse(&kind)?,
            number: row.try_get::<i64, _>("number")? as u8,
            label: row.try_get("label")?,
            state: row.try_get("state")?,
            last_change_at: row.try_get("last_change_at")?,
            fail_safe_enabled: row.try_get("fail_safe_enabled")?,
            fail_safe_value: row.try_get("fail_safe_value")?,
        })
    }

    fn log_from_row(row: &SqliteRow) -> Result<StateLogEntry> {
        let kind: String = row.try_get("kind")?;
        let source: String = row.try_get("source")?;
        Ok(StateLogEntry {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            kind: ChannelKind::parse(&kind)?,
            number: row.try_get::<i64, _>("number")? as u8,
            previous: row.try_get("previous_state")?,
            new: row.try_get("new_state")?,
            source: ChangeSource::parse(&source)?,
            username: row.try_get("username")?,
            reason: row.try_get("reason")?,
            at: row.try_get("at")?,
        })
    }
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn active_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query("SELECT * FROM devices WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::device_from_row).collect()
    }

    async fn device(&self, device_id: i64) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::device_from_row).transpose()
    }

    async fn insert_device_with_channels(&self, new: NewDevice) -> Result<Device> {
        let mut tx = self.pool.begin().await?;

        let device_id = sqlx::query(
            "INSERT INTO devices (name, host, port, unit_id, enabled, poll_interval_ms, timeout_ms) \
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&new.name)
        .bind(&new.host)
        .bind(new.port as i64)
        .bind(new.unit_id as i64)
        .bind(new.poll_interval_ms as i64)
        .bind(new.timeout_ms as i64)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for kind in [ChannelKind::Input, ChannelKind::Output] {
            for number in 0..CHANNELS_PER_KIND {
                sqlx::query(
                    "INSERT INTO channels (device_id, kind, number, label, state) \
                     VALUES (?, ?, ?, ?, 0)",
                )
                .bind(device_id)
                .bind(kind.as_str())
                .bind(number as i64)
                .bind(format!("{} {}", kind.as_str(), number))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(device_id, name = %new.name, "Created device with 16 channels");

        self.device(device_id)
            .await?
            .ok_or_else(|| IoSrvError::internal("Device row vanished after insert"))
    }

    async fn channels(&self, device_id: i64) -> Result<Vec<Channel>> {
        let rows =
            sqlx::query("SELECT * FROM channels WHERE device_id = ? ORDER BY kind, number")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::channel_from_row).collect()
    }

    async fn channel(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
    ) -> Result<Option<Channel>> {
        let row =
            sqlx::query("SELECT * FROM channels WHERE device_id = ? AND kind = ? AND number = ?")
                .bind(device_id)
                .bind(kind.as_str())
                .bind(number as i64)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(Self::channel_from_row).transpose()
    }

    async fn update_channel_state(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        state: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET state = ?, last_change_at = ? \
             WHERE device_id = ? AND kind = ? AND number = ?",
        )
        .bind(state)
        .bind(at)
        .bind(device_id)
        .bind(kind.as_str())
        .bind(number as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_channel_label(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        label: &str,
    ) -> Result<Channel> {
        sqlx::query(
            "UPDATE channels SET label = ? WHERE device_id = ? AND kind = ? AND number = ?",
        )
        .bind(label)
        .bind(device_id)
        .bind(kind.as_str())
        .bind(number as i64)
        .execute(&self.pool)
        .await?;

        self.channel(device_id, kind, number)
            .await?
            .ok_or_else(|| IoSrvError::channel_not_found(format!("{}/{}/{}", device_id, kind, number)))
    }

    async fn update_fail_safe(
        &self,
        device_id: i64,
        number: u8,
        enabled: bool,
        value: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET fail_safe_enabled = ?, fail_safe_value = ? \
             WHERE device_id = ? AND kind = 'output' AND number = ?",
        )
        .bind(enabled)
        .bind(value)
        .bind(device_id)
        .bind(number as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_connection_status(
        &self,
        device_id: i64,
        ok: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET last_connect_ok = ?, last_connect_error = ?, last_poll_at = ? \
             WHERE id = ?",
        )
        .bind(ok)
        .bind(error)
        .bind(at)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_log(&self, entry: NewLogEntry) -> Result<StateLogEntry> {
        let at = Utc::now();
        let id = sqlx::query(
            "INSERT INTO state_log (device_id, kind, number, previous_state, new_state, source, username, reason, at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.device_id)
        .bind(entry.kind.as_str())
        .bind(entry.number as i64)
        .bind(entry.previous)
        .bind(entry.new)
        .bind(entry.source.as_str())
        .bind(&entry.username)
        .bind(&entry.reason)
        .bind(at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let row = sqlx::query("SELECT * FROM state_log WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Self::log_from_row(&row)
    }
}
