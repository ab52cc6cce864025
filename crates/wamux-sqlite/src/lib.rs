//! # wamux-sqlite
//!
//! sqlx-backed SQLite implementation of the wamux `AccountStore` and
//! `WaStore` traits.

pub mod sqlite;

pub use sqlite::*;
