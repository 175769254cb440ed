//! Configuration types.

mod settings;

pub use settings::SyncSettings;
