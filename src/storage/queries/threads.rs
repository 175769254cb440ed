//! Thread query operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{AccountId, Thread, ThreadId};
use crate::storage::database::{Database, Result};

/// Inserts or updates a thread using a borrowed connection.
///
/// Used inside ingestion transactions so placeholder threads commit
/// atomically with their messages.
pub fn upsert_in(conn: &Connection, thread: &Thread) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let participants = serde_json::to_string(&thread.participants).unwrap_or_default();
    let labels = serde_json::to_string(&thread.labels).unwrap_or_default();

    conn.execute(
        r#"
        INSERT INTO threads (
            id, account_id, subject, snippet, participant_emails, last_message_date,
            message_count, unread_count, is_starred, labels, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            subject = excluded.subject,
            snippet = excluded.snippet,
            participant_emails = excluded.participant_emails,
            last_message_date = excluded.last_message_date,
            message_count = excluded.message_count,
            unread_count = excluded.unread_count,
            is_starred = excluded.is_starred,
            labels = excluded.labels,
            updated_at = excluded.updated_at
        "#,
        params![
            thread.id.0,
            thread.account_id.0,
            thread.subject,
            thread.snippet,
            participants,
            thread.last_message_date.to_rfc3339(),
            thread.message_count,
            thread.unread_count,
            thread.is_starred as i32,
            labels,
            now,
            now,
        ],
    )?;

    Ok(())
}

/// Inserts or updates a thread.
pub async fn upsert(db: &Database, thread: &Thread) -> Result<()> {
    let thread = thread.clone();
    db.with_conn(move |conn| upsert_in(conn, &thread)).await
}

/// Retrieves a thread by its ID.
pub async fn get_by_id(db: &Database, thread_id: &ThreadId) -> Result<Option<Thread>> {
    let thread_id = thread_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account_id, subject, snippet, participant_emails, last_message_date,
                   message_count, unread_count, is_starred, labels
            FROM threads
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([&thread_id.0], row_to_thread).optional()?;
        Ok(result)
    })
    .await
}

/// Counts threads for an account.
pub async fn count_by_account(db: &Database, account_id: &AccountId) -> Result<u32> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM threads WHERE account_id = ?1",
            [&account_id.0],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

/// Recomputes a thread row from its messages, using a borrowed connection.
///
/// Used by the history engine, where the provider assigns thread ids and a
/// conversation accumulates messages across many sync runs.
pub fn refresh_in(conn: &Connection, account_id: &AccountId, thread_id: &ThreadId) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        SELECT subject, snippet, from_address, date, is_read, is_starred, labels
        FROM messages
        WHERE account_id = ?1 AND thread_id = ?2
        ORDER BY date ASC
        "#,
    )?;

    struct MemberRow {
        subject: Option<String>,
        snippet: Option<String>,
        from_address: String,
        date: String,
        is_read: bool,
        is_starred: bool,
        labels: Vec<String>,
    }

    let rows = stmt.query_map(params![account_id.0, thread_id.0], |row| {
        let labels_json: Option<String> = row.get(6)?;
        Ok(MemberRow {
            subject: row.get(0)?,
            snippet: row.get(1)?,
            from_address: row.get(2)?,
            date: row.get(3)?,
            is_read: row.get::<_, i32>(4)? != 0,
            is_starred: row.get::<_, i32>(5)? != 0,
            labels: labels_json
                .map(|json| serde_json::from_str(&json).unwrap_or_default())
                .unwrap_or_default(),
        })
    })?;

    let members: std::result::Result<Vec<_>, _> = rows.collect();
    let members = members?;
    if members.is_empty() {
        return Ok(());
    }

    let mut participants: Vec<String> = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    let mut unread = 0u32;
    let mut starred = false;
    for member in &members {
        if !participants.contains(&member.from_address) {
            participants.push(member.from_address.clone());
        }
        for label in &member.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        if !member.is_read {
            unread += 1;
        }
        starred |= member.is_starred;
    }

    let first = &members[0];
    let last = &members[members.len() - 1];
    let last_message_date = DateTime::parse_from_rfc3339(&last.date)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    upsert_in(
        conn,
        &Thread {
            id: thread_id.clone(),
            account_id: account_id.clone(),
            subject: first.subject.clone(),
            snippet: last.snippet.clone().unwrap_or_default(),
            participants,
            last_message_date,
            message_count: members.len() as u32,
            unread_count: unread,
            is_starred: starred,
            labels,
        },
    )
}

/// Deletes threads that no message references, using a borrowed connection.
///
/// Run after the threading pass has repointed messages away from their
/// placeholder threads.
pub fn delete_orphans_in(conn: &Connection, account_id: &AccountId) -> Result<usize> {
    let deleted = conn.execute(
        r#"
        DELETE FROM threads
        WHERE account_id = ?1
          AND id NOT IN (SELECT DISTINCT thread_id FROM messages WHERE account_id = ?1)
        "#,
        [&account_id.0],
    )?;
    Ok(deleted)
}

/// Deletes all threads for an account (messages must be deleted first).
pub async fn delete_all_for_account(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM threads WHERE account_id = ?1", [&account_id.0])?;
        Ok(())
    })
    .await
}

fn row_to_thread(row: &Row<'_>) -> rusqlite::Result<Thread> {
    let participants_json: String = row.get(4)?;
    let labels_json: Option<String> = row.get(9)?;
    let date_str: String = row.get(5)?;

    let participants: Vec<String> = serde_json::from_str(&participants_json).unwrap_or_default();
    let labels: Vec<String> = labels_json
        .map(|json| serde_json::from_str(&json).unwrap_or_default())
        .unwrap_or_default();

    let last_message_date = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Thread {
        id: ThreadId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        subject: row.get(2)?,
        snippet: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        participants,
        last_message_date,
        message_count: row.get(6)?,
        unread_count: row.get(7)?,
        is_starred: row.get::<_, i32>(8)? != 0,
        labels,
    })
}
