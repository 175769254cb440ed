//! SQL schema definitions as const strings.
//!
//! The complete SQLite schema for the local mail cache. Statements run in
//! order from [`all_migrations`]; every statement is idempotent.

/// SQL to create the accounts table.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    display_name TEXT,
    provider_kind TEXT NOT NULL,
    sync_cursor TEXT,
    sync_enabled INTEGER DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the threads table.
///
/// Threads are created before the messages that reference them; during
/// ingestion a placeholder row (id = message id) satisfies the foreign key
/// until conversation grouping runs.
pub const CREATE_THREADS: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    subject TEXT,
    snippet TEXT,
    participant_emails TEXT NOT NULL,
    last_message_date TEXT NOT NULL,
    message_count INTEGER DEFAULT 1,
    unread_count INTEGER DEFAULT 0,
    is_starred INTEGER DEFAULT 0,
    labels TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create thread indexes.
pub const CREATE_THREAD_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_threads_account ON threads(account_id);
CREATE INDEX IF NOT EXISTS idx_threads_date ON threads(last_message_date DESC)
"#;

/// SQL to create the messages table.
pub const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
    rfc_message_id TEXT,
    in_reply_to TEXT,
    references_json TEXT,
    from_address TEXT NOT NULL,
    from_name TEXT,
    to_addresses TEXT,
    subject TEXT,
    body_text TEXT,
    snippet TEXT,
    date TEXT NOT NULL,
    is_read INTEGER DEFAULT 0,
    is_starred INTEGER DEFAULT 0,
    folder TEXT,
    labels TEXT,
    list_unsubscribe TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create message indexes.
pub const CREATE_MESSAGE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account_id);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date DESC)
"#;

/// SQL to create the per-folder sync cursor table.
pub const CREATE_FOLDER_SYNC_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS folder_sync_state (
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    folder TEXT NOT NULL,
    last_uid INTEGER NOT NULL,
    uid_validity INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (account_id, folder)
)
"#;

/// SQL to create the offline operation queue table.
pub const CREATE_PENDING_OPERATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS pending_operations (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    operation_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    params TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER DEFAULT 0,
    max_retries INTEGER DEFAULT 3,
    next_retry_at TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create pending operation indexes.
pub const CREATE_PENDING_OPERATION_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_pending_ops_status ON pending_operations(status, created_at);
CREATE INDEX IF NOT EXISTS idx_pending_ops_resource ON pending_operations(account_id, resource_id)
"#;

/// SQL to create the thread categories table.
pub const CREATE_THREAD_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS thread_categories (
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    thread_id TEXT NOT NULL,
    category TEXT NOT NULL,
    is_manual INTEGER DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (account_id, thread_id)
)
"#;

/// SQL to create the settings table.
pub const CREATE_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Returns all schema creation statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_ACCOUNTS,
        CREATE_THREADS,
        CREATE_THREAD_INDEXES,
        CREATE_MESSAGES,
        CREATE_MESSAGE_INDEXES,
        CREATE_FOLDER_SYNC_STATE,
        CREATE_PENDING_OPERATIONS,
        CREATE_PENDING_OPERATION_INDEXES,
        CREATE_THREAD_CATEGORIES,
        CREATE_SETTINGS,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_migrations_returns_statements() {
        let migrations = all_migrations();
        assert!(migrations.len() >= 10);
    }

    #[test]
    fn messages_reference_threads() {
        assert!(CREATE_MESSAGES.contains("REFERENCES threads(id)"));
    }

    #[test]
    fn account_children_cascade() {
        for sql in [
            CREATE_THREADS,
            CREATE_MESSAGES,
            CREATE_FOLDER_SYNC_STATE,
            CREATE_PENDING_OPERATIONS,
            CREATE_THREAD_CATEGORIES,
        ] {
            assert!(sql.contains("ON DELETE CASCADE"), "missing cascade: {sql}");
        }
    }

    #[test]
    fn statements_are_idempotent() {
        for sql in all_migrations() {
            assert!(sql.contains("IF NOT EXISTS"));
        }
    }
}
