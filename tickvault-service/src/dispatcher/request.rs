//! Messages from [`Dispatcher`](super::Dispatcher) handles to the worker.

use std::sync::mpsc::Sender;

use tickvault_core::domain::{MarketKey, TickRecord};

use super::DispatchError;
use crate::backend::{Query, Rows};

pub(crate) type Reply<T> = Sender<Result<T, DispatchError>>;

/// One unit of work for the worker. Channel order is enqueue order.
pub(crate) enum Request {
    Ticks { key: MarketKey, ticks: Vec<TickRecord> },
    Rows(Rows),
    /// Serviced after every earlier insert of the same kind has been attempted.
    Select { query: Query, reply: Reply<Rows> },
    Cleanup { now_ms: i64, reply: Reply<u64> },
    SetContinuous(bool),
    /// Force-flush every queue and tick store once, then reply.
    Flush { reply: Sender<()> },
    Shutdown,
}
