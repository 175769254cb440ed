//! Account query operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Account, AccountId, ProviderKind};
use crate::storage::database::{Database, DatabaseError, Result};

/// Inserts or updates an account.
pub async fn upsert(db: &Database, account: &Account) -> Result<()> {
    let account = account.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO accounts (
                id, email, display_name, provider_kind, sync_cursor, sync_enabled,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                provider_kind = excluded.provider_kind,
                sync_cursor = excluded.sync_cursor,
                sync_enabled = excluded.sync_enabled,
                updated_at = excluded.updated_at
            "#,
            params![
                account.id.0,
                account.email,
                account.display_name,
                account.provider_kind.as_str(),
                account.sync_cursor,
                account.sync_enabled as i32,
                account.created_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves an account by its ID.
pub async fn get(db: &Database, account_id: &AccountId) -> Result<Option<Account>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, email, display_name, provider_kind, sync_cursor, sync_enabled, created_at
            FROM accounts
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([&account_id.0], row_to_account).optional()?;
        result.transpose()
    })
    .await
}

/// Lists all accounts with sync enabled.
pub async fn list_sync_enabled(db: &Database) -> Result<Vec<Account>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, email, display_name, provider_kind, sync_cursor, sync_enabled, created_at
            FROM accounts
            WHERE sync_enabled = 1
            ORDER BY created_at ASC
            "#,
        )?;

        let rows = stmt.query_map([], row_to_account)?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row??);
        }
        Ok(accounts)
    })
    .await
}

/// Stores the sync cursor recorded after a completed sync.
pub async fn set_sync_cursor(
    db: &Database,
    account_id: &AccountId,
    cursor: Option<String>,
) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts SET sync_cursor = ?1, updated_at = ?2 WHERE id = ?3",
            params![cursor, now, account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Clears the sync cursor so the next sync runs as an initial sync.
pub async fn clear_sync_cursor(db: &Database, account_id: &AccountId) -> Result<()> {
    set_sync_cursor(db, account_id, None).await
}

/// Deletes an account; foreign keys cascade to every dependent table.
pub async fn delete(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM accounts WHERE id = ?1", [&account_id.0])?;
        Ok(())
    })
    .await
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Result<Account>> {
    let kind_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;

    let Some(provider_kind) = ProviderKind::parse(&kind_str) else {
        return Ok(Err(DatabaseError::InvalidRow(format!(
            "unknown provider kind: {kind_str}"
        ))));
    };

    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Ok(Account {
        id: AccountId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        provider_kind,
        sync_cursor: row.get(4)?,
        sync_enabled: row.get::<_, i32>(5)? != 0,
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn make_account(id: &str, kind: ProviderKind) -> Account {
        Account::new(id, format!("{id}@example.com"), kind)
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let db = setup().await;
        let account = make_account("acct-1", ProviderKind::FolderProtocol);

        upsert(&db, &account).await.unwrap();

        let loaded = get(&db, &account.id).await.unwrap().unwrap();
        assert_eq!(loaded.email, "acct-1@example.com");
        assert_eq!(loaded.provider_kind, ProviderKind::FolderProtocol);
        assert!(loaded.sync_cursor.is_none());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let db = setup().await;
        let loaded = get(&db, &AccountId::from("nope")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn sync_cursor_round_trip() {
        let db = setup().await;
        let account = make_account("acct-1", ProviderKind::HistoryApi);
        upsert(&db, &account).await.unwrap();

        set_sync_cursor(&db, &account.id, Some("hist-42".to_string()))
            .await
            .unwrap();
        let loaded = get(&db, &account.id).await.unwrap().unwrap();
        assert_eq!(loaded.sync_cursor, Some("hist-42".to_string()));

        clear_sync_cursor(&db, &account.id).await.unwrap();
        let loaded = get(&db, &account.id).await.unwrap().unwrap();
        assert!(loaded.sync_cursor.is_none());
    }

    #[tokio::test]
    async fn list_sync_enabled_filters() {
        let db = setup().await;
        let enabled = make_account("acct-1", ProviderKind::HistoryApi);
        let mut disabled = make_account("acct-2", ProviderKind::FolderProtocol);
        disabled.sync_enabled = false;

        upsert(&db, &enabled).await.unwrap();
        upsert(&db, &disabled).await.unwrap();

        let accounts = list_sync_enabled(&db).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, enabled.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let db = setup().await;
        let account = make_account("acct-1", ProviderKind::FolderProtocol);
        upsert(&db, &account).await.unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO folder_sync_state (account_id, folder, last_uid, uid_validity, updated_at)
                 VALUES ('acct-1', 'INBOX', 10, 1, '2025-01-01')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        delete(&db, &account.id).await.unwrap();

        let orphaned = db
            .exists(
                "SELECT COUNT(*) FROM folder_sync_state WHERE account_id = ?",
                vec!["acct-1".to_string()],
            )
            .await
            .unwrap();
        assert!(!orphaned);
    }
}
