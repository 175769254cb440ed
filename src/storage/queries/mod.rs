//! Database query modules for CRUD operations.
//!
//! Each module provides async functions that operate on the database. The
//! `*_in` variants take a borrowed connection so callers can compose several
//! writes inside one gateway transaction.

pub mod accounts;
pub mod categories;
pub mod folder_sync;
pub mod messages;
pub mod operations;
pub mod settings;
pub mod threads;
