//! SQLite storage: the bounded connection pool and the message repository.

pub mod message;
pub mod pool;
