//! The two named locks guarding check-then-create sequences against the
//! mirror service, which has no atomic create-if-absent.
//!
//! Handles are passed into every worker's context; there are no globals.
//! A lock covers the existence check and the creation call only and is
//! released before any sync call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Which critical section a caller is entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockName {
    /// "does the sync target exist, else create it"
    Repository,
    /// the same for the upstream source/remote definition
    Remote,
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockName::Repository => f.write_str("repository_creation_lock"),
            LockName::Remote => f.write_str("remote_creation_lock"),
        }
    }
}

/// Whether a create-if-absent call found the resource or made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existed,
    Created,
}

/// Shared lock handles for one batch. Cloning shares the same locks.
#[derive(Debug, Clone, Default)]
pub struct MirrorLocks {
    repository: Arc<Mutex<()>>,
    remote: Arc<Mutex<()>>,
}

impl MirrorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: LockName) -> &Mutex<()> {
        match name {
            LockName::Repository => &self.repository,
            LockName::Remote => &self.remote,
        }
    }

    /// Run `section` while holding `name`.
    pub async fn with_lock<T, F, Fut>(&self, name: LockName, section: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.handle(name).lock().await;
        tracing::debug!("acquired {name}");
        let out = section().await;
        tracing::debug!("released {name}");
        out
    }

    /// Under `name`: call `exists`, and `create` only if it reported false.
    pub async fn create_if_absent<E, X, XF, C, CF>(
        &self,
        name: LockName,
        exists: X,
        create: C,
    ) -> Result<Ensured, E>
    where
        X: FnOnce() -> XF,
        XF: Future<Output = Result<bool, E>>,
        C: FnOnce() -> CF,
        CF: Future<Output = Result<(), E>>,
    {
        self.with_lock(name, || async move {
            if exists().await? {
                return Ok(Ensured::Existed);
            }
            create().await?;
            Ok(Ensured::Created)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeService {
        exists: AtomicBool,
        creations: AtomicUsize,
        inside: AtomicUsize,
        max_inside: AtomicUsize,
    }

    impl FakeService {
        async fn check(&self) -> Result<bool, String> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inside.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let exists = self.exists.load(Ordering::SeqCst);
            if exists {
                self.inside.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(exists)
        }

        async fn create(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.exists.swap(true, Ordering::SeqCst) {
                return Err("already exists".into());
            }
            self.creations.fetch_add(1, Ordering::SeqCst);
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creators_create_exactly_once() {
        let locks = MirrorLocks::new();
        let service = Arc::new(FakeService::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let s1 = Arc::clone(&service);
                let s2 = Arc::clone(&service);
                locks
                    .create_if_absent(
                        LockName::Repository,
                        || async move { s1.check().await },
                        || async move { s2.create().await },
                    )
                    .await
            }));
        }

        let mut created = 0;
        for h in handles {
            match h.await.expect("join").expect("no duplicate creation") {
                Ensured::Created => created += 1,
                Ensured::Existed => {}
            }
        }
        assert_eq!(created, 1);
        assert_eq!(service.creations.load(Ordering::SeqCst), 1);
        assert_eq!(service.max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn locks_are_independent() {
        let locks = MirrorLocks::new();
        let held = locks.repository.lock().await;
        // The remote lock is free while the repository lock is held.
        let out = locks.with_lock(LockName::Remote, || async { 7 }).await;
        assert_eq!(out, 7);
        drop(held);
    }
}
