//! Provider client interfaces and error handling.
//!
//! The concrete wire protocols live outside this crate; sync engines and the
//! queue executor talk to providers exclusively through these traits.

pub mod classify;
pub mod client;

pub use classify::{classify, classify_message, is_connection_error, ErrorClass};
pub use client::{
    FolderClient, FolderSearch, HistoryClient, HistoryDelta, HistoryMessage, HistoryUpdate,
    MailboxActions, ProviderError, RemoteFolder, RemoteMessage, Result,
};
