//! Sensor feed: cached access to live or synthetic telemetry.
//!
//! `SensorFeed` is the entry point. It picks a `RowSource` from config,
//! normalizes rows into readings, and serves sites, latest snapshots and
//! metric series through a cache-aside layer over a `KvStore`.

pub mod aggregate;
pub mod api;
pub mod clock;
pub mod fetcher;
pub mod preload;
pub mod source;
pub mod store;
pub mod warmup;

pub use api::SensorFeed;
pub use clock::{Clock, ManualClock, SystemClock};
pub use fetcher::CacheAside;
pub use source::RowSource;
pub use store::{CacheEntry, JsonFileStore, KvStore, MemoryStore};
pub use warmup::{ConnectionClass, NetworkHints, WarmupOutcome, WarmupReport, WarmupScheduler};
