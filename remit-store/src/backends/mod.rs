//! Backend implementations of [`DeliveryStore`](crate::DeliveryStore)
//!
//! - `memory`: In-memory storage for tests and development
//! - `sqlite`: Durable `SQLite` storage for production use
//! - `test`: Memory storage with synchronisation and fault injection

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDeliveryStore;
pub use sqlite::SqliteDeliveryStore;
pub use test::TestDeliveryStore;
