mod types;
mod schema;
mod store;

pub use types::*;
pub use schema::{migrate, TABLES};
pub use store::SqliteStore;
