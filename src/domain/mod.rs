//! Domain types for the sync core.
//!
//! Pure data structures shared across storage, providers and services.

mod account;
mod category;
mod folder;
mod message;
mod operation;
mod thread;
mod types;

pub use account::{Account, ProviderKind};
pub use category::{Category, ThreadCategory, ALL_CATEGORIES};
pub use folder::FolderSyncState;
pub use message::{folder_message_id, labels_for_flags, snippet_or_fallback, Message};
pub use operation::{
    OperationKind, OperationStatus, PendingOperation, BACKOFF_SCHEDULE_SECS,
};
pub use thread::Thread;
pub use types::{AccountId, Address, MessageId, ThreadId};
