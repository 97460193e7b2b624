//! In-memory doubles for testing code built on courier.
//!
//! - [`InMemoryJobStore`] implements the per-record lease with one async
//!   mutex per row, so lease contention behaves like the PostgreSQL store.
//! - [`InMemoryListBackend`] and [`InMemoryMessageBackend`] stand in for the
//!   Redis and SQS clients underneath [`courier::ListQueue`] and
//!   [`courier::DelayQueue`].
//! - [`MockQueue`] is a queue adapter that records pushes and fails on
//!   demand.

mod backend;
mod fixtures;
mod mock;
mod store;

pub use backend::{InMemoryListBackend, InMemoryMessageBackend};
pub use fixtures::*;
pub use mock::{MockQueue, PushRecord};
pub use store::InMemoryJobStore;
