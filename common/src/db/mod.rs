// Database layer: connection pool, store traits and their backends

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::InMemoryStore;
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::{ScheduleStore, StoreTx};
