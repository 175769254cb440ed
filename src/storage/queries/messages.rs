//! Message query operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{AccountId, Address, Message, MessageId, ThreadId};
use crate::storage::database::{Database, Result};

/// Inserts or updates a message using a borrowed connection.
///
/// The referenced thread row must already exist; ingestion writes the
/// placeholder thread first in the same transaction.
pub fn upsert_in(conn: &Connection, message: &Message) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let references = serde_json::to_string(&message.references).unwrap_or_default();
    let to_addresses = serde_json::to_string(&message.to).unwrap_or_default();
    let labels = serde_json::to_string(&message.labels).unwrap_or_default();

    conn.execute(
        r#"
        INSERT INTO messages (
            id, account_id, thread_id, rfc_message_id, in_reply_to, references_json,
            from_address, from_name, to_addresses, subject, body_text, snippet, date,
            is_read, is_starred, folder, labels, list_unsubscribe, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
        )
        ON CONFLICT(id) DO UPDATE SET
            thread_id = excluded.thread_id,
            subject = excluded.subject,
            body_text = excluded.body_text,
            snippet = excluded.snippet,
            is_read = excluded.is_read,
            is_starred = excluded.is_starred,
            folder = excluded.folder,
            labels = excluded.labels,
            list_unsubscribe = excluded.list_unsubscribe,
            updated_at = excluded.updated_at
        "#,
        params![
            message.id.0,
            message.account_id.0,
            message.thread_id.0,
            message.rfc_message_id,
            message.in_reply_to,
            references,
            message.from.email,
            message.from.name,
            to_addresses,
            message.subject,
            message.body_text,
            message.snippet,
            message.date.to_rfc3339(),
            message.is_read as i32,
            message.is_starred as i32,
            message.folder,
            labels,
            message.list_unsubscribe,
            now,
            now,
        ],
    )?;

    Ok(())
}

/// Inserts or updates a message.
pub async fn upsert(db: &Database, message: &Message) -> Result<()> {
    let message = message.clone();
    db.with_conn(move |conn| upsert_in(conn, &message)).await
}

/// Retrieves a message by its ID.
pub async fn get_by_id(db: &Database, message_id: &MessageId) -> Result<Option<Message>> {
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&select_sql("WHERE id = ?1"))?;
        let result = stmt.query_row([&message_id.0], row_to_message).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all messages for an account, ordered by date ascending.
///
/// Used by the threading pass, which needs the full reference headers.
pub async fn get_all_for_account(db: &Database, account_id: &AccountId) -> Result<Vec<Message>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&select_sql("WHERE account_id = ?1 ORDER BY date ASC"))?;
        let rows = stmt.query_map([&account_id.0], row_to_message)?;
        let messages: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(messages?)
    })
    .await
}

/// Batch-repoints messages to their final thread, using a borrowed connection.
pub fn set_thread_ids_in(
    conn: &Connection,
    account_id: &AccountId,
    message_ids: &[MessageId],
    thread_id: &ThreadId,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "UPDATE messages SET thread_id = ?1, updated_at = ?2 WHERE account_id = ?3 AND id = ?4",
    )?;
    for message_id in message_ids {
        stmt.execute(params![thread_id.0, now, account_id.0, message_id.0])?;
    }
    Ok(())
}

/// Applies a partial update from a remote change (read/starred/labels).
pub async fn apply_update(
    db: &Database,
    message_id: &MessageId,
    is_read: Option<bool>,
    is_starred: Option<bool>,
    labels: Option<Vec<String>>,
) -> Result<()> {
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        if let Some(read) = is_read {
            conn.execute(
                "UPDATE messages SET is_read = ?1, updated_at = ?2 WHERE id = ?3",
                params![read as i32, now, message_id.0],
            )?;
        }
        if let Some(starred) = is_starred {
            conn.execute(
                "UPDATE messages SET is_starred = ?1, updated_at = ?2 WHERE id = ?3",
                params![starred as i32, now, message_id.0],
            )?;
        }
        if let Some(labels) = labels {
            let labels_json = serde_json::to_string(&labels).unwrap_or_default();
            conn.execute(
                "UPDATE messages SET labels = ?1, updated_at = ?2 WHERE id = ?3",
                params![labels_json, now, message_id.0],
            )?;
        }
        Ok(())
    })
    .await
}

/// Deletes a message.
pub async fn delete(db: &Database, message_id: &MessageId) -> Result<()> {
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM messages WHERE id = ?1", [&message_id.0])?;
        Ok(())
    })
    .await
}

/// Deletes all messages for an account.
pub async fn delete_all_for_account(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "DELETE FROM messages WHERE account_id = ?1",
            [&account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Counts messages for an account.
pub async fn count_by_account(db: &Database, account_id: &AccountId) -> Result<u32> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1",
            [&account_id.0],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

fn select_sql(clause: &str) -> String {
    format!(
        r#"
        SELECT id, account_id, thread_id, rfc_message_id, in_reply_to, references_json,
               from_address, from_name, to_addresses, subject, body_text, snippet, date,
               is_read, is_starred, folder, labels, list_unsubscribe
        FROM messages
        {clause}
        "#
    )
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let references_json: Option<String> = row.get(5)?;
    let to_json: Option<String> = row.get(8)?;
    let labels_json: Option<String> = row.get(16)?;
    let date_str: String = row.get(12)?;

    let references: Vec<String> = references_json
        .map(|json| serde_json::from_str(&json).unwrap_or_default())
        .unwrap_or_default();
    let to: Vec<Address> = to_json
        .map(|json| serde_json::from_str(&json).unwrap_or_default())
        .unwrap_or_default();
    let labels: Vec<String> = labels_json
        .map(|json| serde_json::from_str(&json).unwrap_or_default())
        .unwrap_or_default();

    let date = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let from_email: String = row.get(6)?;
    let from_name: Option<String> = row.get(7)?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        thread_id: ThreadId(row.get(2)?),
        rfc_message_id: row.get(3)?,
        in_reply_to: row.get(4)?,
        references,
        from: Address {
            email: from_email,
            name: from_name,
        },
        to,
        subject: row.get(9)?,
        body_text: row.get(10)?,
        snippet: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        date,
        is_read: row.get::<_, i32>(13)? != 0,
        is_starred: row.get::<_, i32>(14)? != 0,
        folder: row.get(15)?,
        labels,
        list_unsubscribe: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, ProviderKind, Thread};
    use crate::storage::queries::{accounts, threads};

    async fn setup() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        let account = Account::new("acct-1", "test@example.com", ProviderKind::FolderProtocol);
        accounts::upsert(&db, &account).await.unwrap();
        db
    }

    fn make_message(id: &str) -> Message {
        Message {
            id: MessageId::from(id),
            account_id: AccountId::from("acct-1"),
            thread_id: ThreadId::from(id),
            rfc_message_id: Some(format!("<{id}@example.com>")),
            in_reply_to: None,
            references: vec![],
            from: Address::with_name("sender@example.com", "Sender"),
            to: vec![Address::new("recipient@example.com")],
            subject: Some("Subject".to_string()),
            body_text: Some("Body".to_string()),
            snippet: "Body".to_string(),
            date: Utc::now(),
            is_read: false,
            is_starred: false,
            folder: Some("INBOX".to_string()),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
            list_unsubscribe: None,
        }
    }

    async fn insert_with_placeholder(db: &Database, message: &Message) {
        let message = message.clone();
        db.transaction(move |tx| {
            threads::upsert_in(tx, &Thread::placeholder(&message))?;
            upsert_in(tx, &message)?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let db = setup().await;
        let message = make_message("msg-1");

        insert_with_placeholder(&db, &message).await;

        let loaded = get_by_id(&db, &message.id).await.unwrap().unwrap();
        assert_eq!(loaded.subject, Some("Subject".to_string()));
        assert_eq!(loaded.from.email, "sender@example.com");
        assert_eq!(loaded.labels, vec!["INBOX", "UNREAD"]);
        assert!(loaded.has_placeholder_thread());
    }

    #[tokio::test]
    async fn insert_without_thread_violates_foreign_key() {
        let db = setup().await;
        let message = make_message("msg-1");

        let result = upsert(&db, &message).await;
        assert!(result.is_err(), "message insert must require a thread row");
    }

    #[tokio::test]
    async fn set_thread_ids_repoints_messages() {
        let db = setup().await;
        let msg1 = make_message("msg-1");
        let msg2 = make_message("msg-2");
        insert_with_placeholder(&db, &msg1).await;
        insert_with_placeholder(&db, &msg2).await;

        let account_id = AccountId::from("acct-1");
        let final_thread = ThreadId::from("thread-final");
        let ids = vec![msg1.id.clone(), msg2.id.clone()];

        db.transaction(move |tx| {
            let mut thread = Thread::placeholder(&make_message("msg-1"));
            thread.id = ThreadId::from("thread-final");
            threads::upsert_in(tx, &thread)?;
            set_thread_ids_in(tx, &account_id, &ids, &final_thread)?;
            Ok(())
        })
        .await
        .unwrap();

        let loaded = get_by_id(&db, &msg1.id).await.unwrap().unwrap();
        assert_eq!(loaded.thread_id, ThreadId::from("thread-final"));
        assert!(!loaded.has_placeholder_thread());
    }

    #[tokio::test]
    async fn apply_update_changes_flags() {
        let db = setup().await;
        let message = make_message("msg-1");
        insert_with_placeholder(&db, &message).await;

        apply_update(
            &db,
            &message.id,
            Some(true),
            Some(true),
            Some(vec!["INBOX".to_string()]),
        )
        .await
        .unwrap();

        let loaded = get_by_id(&db, &message.id).await.unwrap().unwrap();
        assert!(loaded.is_read);
        assert!(loaded.is_starred);
        assert_eq!(loaded.labels, vec!["INBOX"]);
    }

    #[tokio::test]
    async fn get_all_for_account_orders_by_date() {
        let db = setup().await;
        let mut older = make_message("msg-old");
        older.date = Utc::now() - chrono::Duration::hours(2);
        let newer = make_message("msg-new");

        insert_with_placeholder(&db, &newer).await;
        insert_with_placeholder(&db, &older).await;

        let all = get_all_for_account(&db, &AccountId::from("acct-1"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, MessageId::from("msg-old"));
    }

    #[tokio::test]
    async fn delete_all_for_account_clears() {
        let db = setup().await;
        insert_with_placeholder(&db, &make_message("msg-1")).await;

        delete_all_for_account(&db, &AccountId::from("acct-1"))
            .await
            .unwrap();

        let count = count_by_account(&db, &AccountId::from("acct-1"))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
