//! # mirror-sync
//!
//! Parallel mirror-sync engine and metadata reconciler.
//!
//! Call [`pipeline::run`] for a full invocation, or drive the pieces
//! directly: [`catalog::load_tasks`] builds tasks, [`executor::run`] runs them
//! on a worker pool against a [`dispatch::Dispatch`], [`ledger`] records the
//! outcome and [`metadata`] keeps the policy snapshot current.

pub mod catalog;
pub mod command;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod ledger;
pub mod locks;
pub mod metadata;
pub mod pipeline;
pub mod worker_log;

pub use dispatch::{Dispatch, MirrorDispatch, Progress};
pub use error::SyncError;
pub use executor::PoolOptions;
pub use locks::{LockName, MirrorLocks};
pub use pipeline::{PipelineConfig, PipelineReport, SnapshotUpdate};
pub use worker_log::WorkerLog;
