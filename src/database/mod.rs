pub mod manager;
pub mod memory;
pub mod models;
pub mod query_builder;
pub mod schema;
pub mod users;

pub use manager::{DatabaseError, DatabaseManager};
pub use memory::MemoryUserStore;
pub use users::{PgUserStore, UserStore};
