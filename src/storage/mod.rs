//! Local cache storage layer.
//!
//! [`Database`] is the single gateway to the embedded store; the `queries`
//! modules provide typed CRUD operations on top of it. [`KeychainAccess`]
//! keeps secret credential material out of the database.

pub mod database;
pub mod keychain;
pub mod queries;
pub mod schema;

pub use database::{Database, DatabaseError};
pub use keychain::{KeychainAccess, KeychainError};
