//! Infrastructure adapters for storage and agent backends.

pub mod backends;
pub mod sqlite;
