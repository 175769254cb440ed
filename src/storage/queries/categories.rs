//! Thread category persistence.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{AccountId, Category, ThreadCategory, ThreadId};
use crate::storage::database::{Database, Result};

/// Sets a thread's category, overwriting any previous assignment.
///
/// Pass `is_manual = true` for user-chosen categories; manual assignments
/// pin the thread against automated re-classification.
pub async fn set(
    db: &Database,
    account_id: &AccountId,
    thread_id: &ThreadId,
    category: Category,
    is_manual: bool,
) -> Result<()> {
    let account_id = account_id.clone();
    let thread_id = thread_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO thread_categories (account_id, thread_id, category, is_manual, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(account_id, thread_id) DO UPDATE SET
                category = excluded.category,
                is_manual = excluded.is_manual,
                updated_at = excluded.updated_at
            "#,
            params![
                account_id.0,
                thread_id.0,
                category.as_str(),
                is_manual as i32,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    })
    .await
}

/// Sets a rule-derived category using a borrowed connection.
///
/// Never overwrites a manual assignment: the conditional upsert only updates
/// rows where `is_manual = 0`.
pub fn set_from_rules_in(
    conn: &Connection,
    account_id: &AccountId,
    thread_id: &ThreadId,
    category: Category,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO thread_categories (account_id, thread_id, category, is_manual, updated_at)
        VALUES (?1, ?2, ?3, 0, ?4)
        ON CONFLICT(account_id, thread_id) DO UPDATE SET
            category = excluded.category,
            updated_at = excluded.updated_at
        WHERE is_manual = 0
        "#,
        params![
            account_id.0,
            thread_id.0,
            category.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Retrieves a thread's category assignment.
pub async fn get(
    db: &Database,
    account_id: &AccountId,
    thread_id: &ThreadId,
) -> Result<Option<ThreadCategory>> {
    let account_id = account_id.clone();
    let thread_id = thread_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, thread_id, category, is_manual
            FROM thread_categories
            WHERE account_id = ?1 AND thread_id = ?2
            "#,
        )?;

        let result = stmt
            .query_row(params![account_id.0, thread_id.0], |row| {
                Ok(ThreadCategory {
                    account_id: AccountId(row.get(0)?),
                    thread_id: ThreadId(row.get(1)?),
                    category: Category::parse(&row.get::<_, String>(2)?),
                    is_manual: row.get::<_, i32>(3)? != 0,
                })
            })
            .optional()?;
        Ok(result)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, ProviderKind};
    use crate::storage::queries::accounts;

    async fn setup() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        let account = Account::new("acct-1", "test@example.com", ProviderKind::HistoryApi);
        accounts::upsert(&db, &account).await.unwrap();
        db
    }

    fn acct() -> AccountId {
        AccountId::from("acct-1")
    }

    fn thread() -> ThreadId {
        ThreadId::from("thread-1")
    }

    #[tokio::test]
    async fn set_and_get() {
        let db = setup().await;

        set(&db, &acct(), &thread(), Category::Social, false)
            .await
            .unwrap();

        let loaded = get(&db, &acct(), &thread()).await.unwrap().unwrap();
        assert_eq!(loaded.category, Category::Social);
        assert!(!loaded.is_manual);
    }

    #[tokio::test]
    async fn rules_update_non_manual_assignment() {
        let db = setup().await;

        db.with_conn({
            let (account_id, thread_id) = (acct(), thread());
            move |conn| set_from_rules_in(conn, &account_id, &thread_id, Category::Promotions)
        })
        .await
        .unwrap();

        db.with_conn({
            let (account_id, thread_id) = (acct(), thread());
            move |conn| set_from_rules_in(conn, &account_id, &thread_id, Category::Updates)
        })
        .await
        .unwrap();

        let loaded = get(&db, &acct(), &thread()).await.unwrap().unwrap();
        assert_eq!(loaded.category, Category::Updates);
    }

    #[tokio::test]
    async fn rules_never_overwrite_manual_pin() {
        let db = setup().await;

        set(&db, &acct(), &thread(), Category::Primary, true)
            .await
            .unwrap();

        db.with_conn({
            let (account_id, thread_id) = (acct(), thread());
            move |conn| set_from_rules_in(conn, &account_id, &thread_id, Category::Promotions)
        })
        .await
        .unwrap();

        let loaded = get(&db, &acct(), &thread()).await.unwrap().unwrap();
        assert_eq!(loaded.category, Category::Primary);
        assert!(loaded.is_manual);
    }

    #[tokio::test]
    async fn manual_set_overrides_rules() {
        let db = setup().await;

        set(&db, &acct(), &thread(), Category::Promotions, false)
            .await
            .unwrap();
        set(&db, &acct(), &thread(), Category::Primary, true)
            .await
            .unwrap();

        let loaded = get(&db, &acct(), &thread()).await.unwrap().unwrap();
        assert_eq!(loaded.category, Category::Primary);
        assert!(loaded.is_manual);
    }
}
