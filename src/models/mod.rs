pub mod connections;
pub mod mapping;
pub mod schema;
