pub mod activity;
pub mod analytics;
pub mod categories;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod tasks;
pub mod users;

pub use database::Database;
pub use error::StoreError;
