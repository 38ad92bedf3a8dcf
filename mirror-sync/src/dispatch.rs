//! Type-to-handler dispatch.
//!
//! Every artifact kind maps to exactly one [`Handler`] variant. Each handler
//! exposes a single attempt-once operation; retrying is the executor's job.

use std::future::Future;
use std::sync::Arc;

use mirror_core::{ArtifactKind, Task};

use crate::command::CommandRunner;
use crate::error::SyncError;
use crate::handlers::{self, Halt, MirrorContext};
use crate::worker_log::WorkerLog;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Finished; carries the handler's output.
    Done(String),
    /// Not finished yet; poll again after the backoff.
    Pending,
}

/// Something the executor can hand a task to.
pub trait Dispatch: Send + Sync + 'static {
    fn attempt(
        &self,
        task: &Task,
        log: &WorkerLog,
    ) -> impl Future<Output = Result<Progress, SyncError>> + Send;
}

/// The closed set of handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Container images through the mirror's container plugin.
    Image,
    /// Package repositories through the mirror's rpm plugin.
    Rpm,
    /// Single downloaded files: tarball, manifest, iso, shell.
    File,
    /// Source trees and language packages fetched into the store.
    Fetch,
}

impl Handler {
    pub fn for_kind(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Image => Handler::Image,
            ArtifactKind::Rpm => Handler::Rpm,
            ArtifactKind::Tarball
            | ArtifactKind::Manifest
            | ArtifactKind::Iso
            | ArtifactKind::Shell => Handler::File,
            ArtifactKind::Git | ArtifactKind::PipModule | ArtifactKind::AnsibleGalaxyCollection => {
                Handler::Fetch
            }
        }
    }
}

/// Production dispatcher over a shared [`MirrorContext`].
pub struct MirrorDispatch<R> {
    ctx: Arc<MirrorContext<R>>,
}

impl<R> MirrorDispatch<R> {
    pub fn new(ctx: MirrorContext<R>) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &MirrorContext<R> {
        &self.ctx
    }
}

impl<R: CommandRunner> Dispatch for MirrorDispatch<R> {
    async fn attempt(&self, task: &Task, log: &WorkerLog) -> Result<Progress, SyncError> {
        let ctx = self.ctx.as_ref();
        let outcome = match Handler::for_kind(task.kind()) {
            Handler::Image => handlers::image::attempt(ctx, task, log).await,
            Handler::Rpm => handlers::rpm::attempt(ctx, task, log).await,
            Handler::File => handlers::file::attempt(ctx, task, log).await,
            Handler::Fetch => handlers::fetch::attempt(ctx, task, log).await,
        };
        match outcome {
            Ok(output) => Ok(Progress::Done(output)),
            Err(Halt::Retry) => Ok(Progress::Pending),
            Err(Halt::Fail(e)) => Err(e),
        }
    }
}
