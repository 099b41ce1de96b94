//! Process orchestration: one controller per spawned server process, one
//! manager per harness run.

pub mod controller;
pub mod manager;

pub use controller::ProcessController;
pub use manager::{ProcessManager, SetupOptions, StartOptions};
