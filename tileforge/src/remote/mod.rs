//! Remote workers.
//!
//! A coordinator owns the [`JobQueue`](crate::queue::JobQueue) and serves it
//! through an [`RpcHandler`]. Worker processes elsewhere run a
//! [`RemoteWorkerClient`] that claims jobs over a [`RemoteQueue`] transport,
//! tiles them against a shared file store and reports back.
//!
//! ```text
//! RemoteWorkerClient ──claim──► RemoteQueue ──► RpcHandler ──► JobQueue
//!        │          ◄─complete─┘  (HTTP or loopback)
//!        ▼
//!   TileJobRunner ──► TilePyramidBuilder ──► TileFileLayout
//! ```

mod client;
mod handler;
mod loopback;
mod protocol;
mod transport;

pub use client::{
    ClientConfig, RemoteWorkerClient, RunSummary, WorkerError, DEFAULT_POLL_INTERVAL,
    DEFAULT_THREADS,
};
pub use handler::{RpcError, RpcHandler};
pub use loopback::LoopbackQueue;
pub use protocol::{ClaimResponse, CompletionAck, CompletionReport, JobDescriptor, ReportedOutcome};
pub use transport::{HttpRemoteQueue, RemoteQueue, TransportError, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};
