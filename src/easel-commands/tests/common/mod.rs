//! Shared mocks for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use easel_commands::{
    Command, CommandCategory, CommandContext, CommandDescriptor, CommandError, CommandResult,
    Parameters,
};

// =============================================================================
// Lifecycle counters
// =============================================================================

/// Counts every lifecycle call made on a [`MockCommand`].
#[derive(Debug, Default)]
pub struct Counters {
    pub prepare: AtomicUsize,
    pub execute: AtomicUsize,
    pub cleanup: AtomicUsize,
    pub dispose: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Counters {
    pub fn prepare(&self) -> usize {
        self.prepare.load(Ordering::SeqCst)
    }

    pub fn execute(&self) -> usize {
        self.execute.load(Ordering::SeqCst)
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup.load(Ordering::SeqCst)
    }

    pub fn dispose(&self) -> usize {
        self.dispose.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// (prepare, execute, cleanup)
    pub fn lifecycle(&self) -> (usize, usize, usize) {
        (self.prepare(), self.execute(), self.cleanup())
    }
}

// =============================================================================
// Mock Command
// =============================================================================

/// What a [`MockCommand`] does when executed.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return success.
    Succeed,
    /// Return `Err(CommandError::Failed)`.
    Fail,
    /// Return `Ok(CommandResult::Failure)`.
    ReportFailure,
    /// Panic inside execute.
    Panic,
    /// Sleep, checking the cancellation token.
    Sleep(Duration),
    /// Sleep without ever looking at the cancellation token.
    IgnoreCancel(Duration),
}

pub struct MockCommand {
    descriptor: CommandDescriptor,
    behavior: Behavior,
    fail_cleanup: bool,
    fail_dispose: bool,
    reentrant: bool,
    pub counters: Arc<Counters>,
}

impl MockCommand {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            descriptor: CommandDescriptor::new(id, id),
            behavior,
            fail_cleanup: false,
            fail_dispose: false,
            reentrant: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn succeed(id: &str) -> Self {
        Self::new(id, Behavior::Succeed)
    }

    pub fn with_descriptor(mut self, descriptor: CommandDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn in_category(mut self, category: CommandCategory, priority: i32) -> Self {
        self.descriptor = self
            .descriptor
            .with_category(category)
            .with_priority(priority);
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn failing_dispose(mut self) -> Self {
        self.fail_dispose = true;
        self
    }

    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Wrap in an `Arc`, returning the counters alongside.
    pub fn build(self) -> (Arc<dyn Command>, Arc<Counters>) {
        let counters = self.counters.clone();
        (Arc::new(self), counters)
    }
}

struct ActiveGuard<'a>(&'a Counters);

impl<'a> ActiveGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Command for MockCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }

    async fn prepare(&self, _ctx: &CommandContext) -> Result<(), CommandError> {
        self.counters.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        _params: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        self.counters.execute.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard::enter(&self.counters);

        match &self.behavior {
            Behavior::Succeed => Ok(CommandResult::success(self.descriptor.id.clone())),
            Behavior::Fail => Err(CommandError::failed("mock failure")),
            Behavior::ReportFailure => Ok(CommandResult::failure("reported failure")),
            Behavior::Panic => panic!("mock panic"),
            Behavior::Sleep(duration) => {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(CommandResult::cancelled()),
                    _ = tokio::time::sleep(*duration) => {
                        Ok(CommandResult::success(self.descriptor.id.clone()))
                    }
                }
            }
            Behavior::IgnoreCancel(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(CommandResult::ok())
            }
        }
    }

    async fn cleanup(
        &self,
        _ctx: &CommandContext,
        _cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        self.counters.cleanup.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            Err(CommandError::failed("cleanup failed"))
        } else {
            Ok(())
        }
    }

    fn dispose(&self) -> Result<(), CommandError> {
        self.counters.dispose.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            Err(CommandError::failed("dispose failed"))
        } else {
            Ok(())
        }
    }
}
