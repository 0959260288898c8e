pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod transaction;

pub use backends::{MemoryDeliveryStore, SqliteDeliveryStore, TestDeliveryStore};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use r#trait::DeliveryStore;
pub use transaction::{IdAllocator, NewDelivery, NewFailure, Sequences, Transaction, WriteOp};
