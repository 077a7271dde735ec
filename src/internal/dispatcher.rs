use std::{
    cell::Cell,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{select, sync::mpsc::UnboundedReceiver};
use tokio_util::sync::CancellationToken;

/// An erased pinned delivery, ready to run on the dispatcher task.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Identifies one bus's dispatcher. Buses coexist in one process, so the
/// "am I on the pinned context" check must be per-dispatcher, not a plain
/// boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatcherId(u64);

impl DispatcherId {
    pub(crate) fn next() -> Self {
        // 0 is the thread-local's "no dispatcher" value.
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    static ACTIVE_DISPATCHER: Cell<u64> = const { Cell::new(0) };
}

/// Whether the current code is executing inside a job of this dispatcher.
///
/// Jobs are synchronous closures, so the marker cannot span an await point;
/// it is only observable from code the dispatcher itself called into.
pub(crate) fn on_pinned_context(id: DispatcherId) -> bool {
    ACTIVE_DISPATCHER.with(Cell::get) == id.0
}

struct ContextGuard {
    prior: u64,
}

impl ContextGuard {
    fn enter(id: DispatcherId) -> Self {
        let prior = ACTIVE_DISPATCHER.with(|active| active.replace(id.0));
        Self { prior }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prior = self.prior;
        ACTIVE_DISPATCHER.with(|active| active.set(prior));
    }
}

fn run_job(id: DispatcherId, job: Job) {
    let _guard = ContextGuard::enter(id);
    job();
}

/// Spawn the single task that is the bus's designated pinned context.
///
/// Jobs run one at a time in FIFO order. The loop ends when the bus is
/// cancelled or every sender is gone; jobs that raced the cancellation are
/// drained best-effort before the receiver is dropped.
pub(crate) fn spawn(id: DispatcherId, mut jobs: UnboundedReceiver<Job>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            select! {
                biased;
                _ = cancel.cancelled() => break,
                maybe_job = jobs.recv() => {
                    let Some(job) = maybe_job else {
                        break;
                    };
                    run_job(id, job);
                }
            }
        }
        while let Ok(job) = jobs.try_recv() {
            run_job(id, job);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_set_only_while_a_job_runs() {
        let id = DispatcherId::next();
        assert!(!on_pinned_context(id));
        run_job(
            id,
            Box::new(move || {
                assert!(on_pinned_context(id));
            }),
        );
        assert!(!on_pinned_context(id));
    }

    #[test]
    fn nested_jobs_keep_the_marker_set() {
        let id = DispatcherId::next();
        run_job(
            id,
            Box::new(move || {
                run_job(
                    id,
                    Box::new(move || {
                        assert!(on_pinned_context(id));
                    }),
                );
                assert!(on_pinned_context(id));
            }),
        );
        assert!(!on_pinned_context(id));
    }

    #[test]
    fn dispatchers_do_not_see_each_other_as_pinned() {
        let mine = DispatcherId::next();
        let other = DispatcherId::next();
        run_job(
            mine,
            Box::new(move || {
                assert!(on_pinned_context(mine));
                assert!(!on_pinned_context(other));
            }),
        );
    }
}
