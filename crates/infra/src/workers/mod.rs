//! Background workers consuming the in-process event bus.

pub mod event_worker;

pub use event_worker::{EventWorker, WorkerHandle};
