//! Shared library for the Search Test Harness.
//!
//! Houses the orchestration core: node and topology types, the `STH_*`
//! configuration surface, the error taxonomy, the HTTP retry client with
//! its cluster convergence accommodation, typed API wrappers for the
//! server under test, and the process controller/manager pair.

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod net;
pub mod process;
pub mod types;

pub use client::{ClusterClient, FetchOptions, NodeClient, fetch_with_retry};
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult};
pub use process::{ProcessController, ProcessManager, SetupOptions, StartOptions};
pub use types::{ClusterMembership, NodeDescriptor, Phase, Topology};
