pub mod memory;
pub mod migrate;
pub mod postgres;
pub mod traits;

pub use memory::{FailureKind, MemoryStore, StoreOp};
pub use migrate::migrate;
pub use postgres::PgStore;
pub use traits::{
    AlertStore, AnomalyStore, AttributionStore, DonationStore, JobStore, MentionStore, Store,
    TouchpointStore, TrendStore, WatchlistStore,
};
