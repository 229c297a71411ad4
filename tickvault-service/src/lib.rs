//! TickVault Service: write-behind persistence over the tick store and a relational backend.
//!
//! This crate builds on `tickvault-core` to provide:
//! - `StoreConfig` loaded from TOML
//! - The `RelationalBackend` interface with typed rows, queries and delete criteria
//! - An in-memory reference backend
//! - The `Dispatcher`: batching, retry, read-after-write and shutdown drain

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod stats;

pub use backend::{
    open_backend, BackendError, DeleteCriteria, EntityKind, InMemoryBackend, Query,
    RelationalBackend, Row, Rows,
};
pub use config::{BackendConfig, BackendKind, ConfigError, StoreConfig};
pub use dispatcher::{DispatchError, Dispatcher};
pub use stats::{DispatcherStats, StatsSnapshot};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn dispatcher_is_send_sync() {
        assert_send::<Dispatcher>();
        assert_sync::<Dispatcher>();
    }

    #[test]
    fn backends_are_send() {
        assert_send::<InMemoryBackend>();
        assert_send::<Box<dyn RelationalBackend>>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<DispatchError>();
        assert_sync::<DispatchError>();
        assert_send::<ConfigError>();
        assert_sync::<ConfigError>();
    }
}
