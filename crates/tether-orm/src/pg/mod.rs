//! PostgreSQL backend.

mod connection;
mod decode;
pub mod sql;
mod store;

pub use connection::{Connection, PoolConfig};
pub use decode::row_to_record;
pub use store::{PgStore, PgTransaction};
