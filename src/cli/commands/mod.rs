pub mod schema;
pub mod seed;
pub mod tasks;
