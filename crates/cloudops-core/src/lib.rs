//! CloudOps Core
//!
//! Generic layer for operations against a remote cloud management API:
//! instances, functions, buckets and objects.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  cloudops CLI                    │
//! └─────────────────┬───────────────────────────────┘
//!                   │ plans::*
//! ┌─────────────────▼───────────────────────────────┐
//! │                 Coordinator                      │
//! │   run(steps) -> OutcomeRecord                    │
//! │  ┌──────────────┐  ┌──────────────┐              │
//! │  │    Cursor    │  │  wait_for_   │              │
//! │  │  (list)      │  │  state       │              │
//! │  └──────┬───────┘  └──────┬───────┘              │
//! │  ┌──────▼─────────────────▼───────┐              │
//! │  │        ResourceClient          │──► classify  │
//! │  └──────────────┬─────────────────┘              │
//! └─────────────────┼───────────────────────────────┘
//!                   │ trait Transport
//!         ┌─────────┴─────────┐
//! ┌───────▼───────┐   ┌───────▼───────┐
//! │ HttpTransport │   │ MemoryBackend │
//! │(cloudops-http)│   │  (in-process) │
//! └───────────────┘   └───────────────┘
//! ```

mod cancel;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod model;
pub mod pagination;
pub mod plans;
pub mod retry;
pub mod transport;
pub mod waiter;

// Re-exports
pub use client::{ClientSet, RawResult, ResourceClient};
pub use coordinator::{CompletedStep, Coordinator, OutcomeRecord, ReadinessPolicy, WAIT_PARAM};
pub use error::{
    ClassifiedError, CoreError, ErrorKind, InvalidWaitSpec, PageError, RawFailure, Result,
    RetryError, TransportFailure, WaitError, classify,
};
pub use memory::MemoryBackend;
pub use model::{Action, Category, OperationStep, ResourceRef, Service};
pub use pagination::{Cursor, PAGE_SIZE_PARAM, Page};
pub use retry::{RetryConfig, with_retries};
pub use transport::{Request, Response, Transport};
pub use tokio_util::sync::CancellationToken;
pub use waiter::{Observed, WaitSpec, wait_for_state};
