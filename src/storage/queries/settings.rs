//! Key-value settings persistence.
//!
//! The sync core only reads these; the settings UI writes them.

use chrono::Utc;
use rusqlite::params;

use crate::storage::database::{Database, Result};

/// Retrieves a setting value by key.
pub async fn get(db: &Database, key: &str) -> Result<Option<String>> {
    db.select_first(
        "SELECT value FROM settings WHERE key = ?1",
        vec![key.to_string()],
        |row| row.get(0),
    )
    .await
}

/// Stores a setting value.
pub async fn set(db: &Database, key: &str, value: &str) -> Result<()> {
    let key = key.to_string();
    let value = value.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Reads the configured sync lookback window, falling back to `default_days`
/// when unset or unparseable.
pub async fn sync_period_days(db: &Database, default_days: u32) -> Result<u32> {
    let value = get(db, "sync_period_days").await?;
    Ok(value
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|days| *days > 0)
        .unwrap_or(default_days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_returns_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(get(&db, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        set(&db, "sync_period_days", "90").await.unwrap();
        assert_eq!(get(&db, "sync_period_days").await.unwrap().as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let db = Database::open_in_memory().await.unwrap();
        set(&db, "key", "one").await.unwrap();
        set(&db, "key", "two").await.unwrap();
        assert_eq!(get(&db, "key").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn sync_period_days_parses_and_falls_back() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(sync_period_days(&db, 365).await.unwrap(), 365);

        set(&db, "sync_period_days", "30").await.unwrap();
        assert_eq!(sync_period_days(&db, 365).await.unwrap(), 30);

        set(&db, "sync_period_days", "not-a-number").await.unwrap();
        assert_eq!(sync_period_days(&db, 365).await.unwrap(), 365);

        set(&db, "sync_period_days", "0").await.unwrap();
        assert_eq!(sync_period_days(&db, 365).await.unwrap(), 365);
    }
}
