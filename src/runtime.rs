use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{BoxFuture, join_all};

use crate::error::{FormError, FormResult};
use crate::form::FormOptions;
use crate::node::NodeId;
use crate::path::FieldPath;

static LISTENER_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);
static EDGE_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    active: Arc<AtomicBool>,
    callback: Callback,
}

impl Listener {
    pub(crate) fn new(callback: Callback) -> Self {
        Self {
            id: ListenerId::next(),
            active: Arc::new(AtomicBool::new(true)),
            callback,
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Idempotent unsubscribe handle. Clones share the same underlying actions, so running
/// any clone (or dropping the owning `Form`) releases them exactly once.
#[derive(Clone, Default)]
pub struct Cleanup {
    actions: Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>,
}

impl Cleanup {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        let cleanup = Self::default();
        cleanup.push(action);
        cleanup
    }

    pub fn noop() -> Self {
        Self::default()
    }

    pub fn push(&self, action: impl FnOnce() + Send + 'static) {
        lock(&self.actions).push(Box::new(action));
    }

    pub fn add(&self, other: Cleanup) {
        self.push(move || other.run());
    }

    pub fn run(&self) {
        let actions = std::mem::take(&mut *lock(&self.actions));
        for action in actions {
            action();
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.actions).is_empty()
    }
}

struct ComputedEdge {
    id: u64,
    scope: NodeId,
    source: FieldPath,
    target: FieldPath,
}

#[derive(Default)]
struct Scheduler {
    batch_depth: usize,
    flushing: bool,
    pending: VecDeque<Listener>,
    runs: BTreeMap<ListenerId, usize>,
}

struct RuntimeInner {
    options: FormOptions,
    scheduler: Mutex<Scheduler>,
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
    edges: Mutex<Vec<ComputedEdge>>,
}

/// Per-form reactive runtime: batches change notifications, flushes effects in
/// registration order once the outermost mutation finishes, and queues deferred async
/// work until the owner drives it with [`Runtime::settle`].
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(options: FormOptions) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                options,
                scheduler: Mutex::new(Scheduler::default()),
                tasks: Mutex::new(Vec::new()),
                edges: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> &FormOptions {
        &self.inner.options
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        lock(&self.inner.scheduler).batch_depth += 1;
        let _guard = BatchGuard { runtime: self };
        f()
    }

    pub(crate) fn notify(&self, listeners: Vec<Listener>) {
        if listeners.is_empty() {
            return;
        }
        {
            let mut scheduler = lock(&self.inner.scheduler);
            for listener in listeners {
                if !scheduler.pending.iter().any(|queued| queued.id == listener.id) {
                    scheduler.pending.push_back(listener);
                }
            }
        }
        self.flush();
    }

    fn flush(&self) {
        {
            let mut scheduler = lock(&self.inner.scheduler);
            if scheduler.flushing || scheduler.batch_depth > 0 {
                return;
            }
            scheduler.flushing = true;
            scheduler.runs.clear();
        }
        let _guard = FlushGuard { runtime: self };
        let max_runs = self.inner.options.max_effect_runs;

        loop {
            let next = {
                let mut scheduler = lock(&self.inner.scheduler);
                let Some(listener) = scheduler.pending.pop_front() else {
                    break;
                };
                let runs = scheduler.runs.entry(listener.id).or_default();
                *runs += 1;
                if *runs > max_runs {
                    log::error!(
                        "effect {:?} re-triggered more than {max_runs} times in one flush; dropping it for this change",
                        listener.id
                    );
                    None
                } else {
                    Some(listener)
                }
            };
            if let Some(listener) = next.filter(Listener::is_active) {
                log::trace!("running effect {:?}", listener.id);
                (listener.callback)();
            }
        }
    }

    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        lock(&self.inner.tasks).push(Box::pin(task));
    }

    pub fn has_pending_tasks(&self) -> bool {
        !lock(&self.inner.tasks).is_empty()
    }

    /// Drives queued async validations and debounced behaviors until none remain.
    pub async fn settle(&self) {
        loop {
            let batch = std::mem::take(&mut *lock(&self.inner.tasks));
            if batch.is_empty() {
                break;
            }
            join_all(batch).await;
        }
    }

    /// Records `sources -> target` compute edges for `scope`, refusing any registration
    /// that lets the target reach itself.
    pub(crate) fn register_computed(
        &self,
        scope: NodeId,
        sources: &[FieldPath],
        target: &FieldPath,
    ) -> FormResult<Cleanup> {
        let mut edges = lock(&self.inner.edges);
        let overlaps = |a: &FieldPath, b: &FieldPath| a.starts_with(b) || b.starts_with(a);

        let mut visited: Vec<FieldPath> = Vec::new();
        let mut frontier = vec![target.clone()];
        while let Some(current) = frontier.pop() {
            if sources.iter().any(|source| overlaps(source, &current)) {
                return Err(FormError::CyclicDependency {
                    target: target.to_string(),
                });
            }
            if visited.contains(&current) {
                continue;
            }
            for edge in edges
                .iter()
                .filter(|edge| edge.scope == scope && overlaps(&edge.source, &current))
            {
                frontier.push(edge.target.clone());
            }
            visited.push(current);
        }

        let ids = sources
            .iter()
            .map(|source| {
                let id = EDGE_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst);
                edges.push(ComputedEdge {
                    id,
                    scope,
                    source: source.clone(),
                    target: target.clone(),
                });
                id
            })
            .collect::<Vec<_>>();

        let runtime = self.clone();
        Ok(Cleanup::new(move || {
            lock(&runtime.inner.edges).retain(|edge| !ids.contains(&edge.id));
        }))
    }
}

struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        {
            let mut scheduler = lock(&self.runtime.inner.scheduler);
            scheduler.batch_depth = scheduler.batch_depth.saturating_sub(1);
        }
        self.runtime.flush();
    }
}

struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        lock(&self.runtime.inner.scheduler).flushing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = counter.clone();
        Listener::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn batch_defers_and_deduplicates_notifications() {
        let runtime = Runtime::new(FormOptions::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);

        runtime.batch(|| {
            runtime.notify(vec![listener.clone()]);
            runtime.notify(vec![listener.clone()]);
            assert_eq!(counter.load(Ordering::SeqCst), 0);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deactivated_listeners_are_skipped() {
        let runtime = Runtime::new(FormOptions::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        listener.deactivate();
        runtime.notify(vec![listener]);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cleanup_runs_once_across_clones() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cleanup = {
            let counter = counter.clone();
            Cleanup::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let composite = Cleanup::noop();
        composite.add(cleanup.clone());
        composite.run();
        cleanup.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cleanup.is_empty());
    }

    #[test]
    fn transitive_compute_cycles_are_refused() {
        let runtime = Runtime::new(FormOptions::default());
        let scope = NodeId::next();
        let path = |raw: &str| FieldPath::parse(raw).expect("parse");

        runtime
            .register_computed(scope, &[path("a")], &path("b"))
            .expect("a -> b");
        runtime
            .register_computed(scope, &[path("b")], &path("c"))
            .expect("b -> c");
        assert!(matches!(
            runtime.register_computed(scope, &[path("c")], &path("a")),
            Err(FormError::CyclicDependency { .. })
        ));
        assert!(matches!(
            runtime.register_computed(scope, &[path("total")], &path("total")),
            Err(FormError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn released_edges_no_longer_block_registration() {
        let runtime = Runtime::new(FormOptions::default());
        let scope = NodeId::next();
        let path = |raw: &str| FieldPath::parse(raw).expect("parse");

        let edge = runtime
            .register_computed(scope, &[path("a")], &path("b"))
            .expect("a -> b");
        edge.run();
        runtime
            .register_computed(scope, &[path("b")], &path("a"))
            .expect("b -> a after release");
    }

    #[test]
    fn settle_drains_tasks_spawned_by_tasks() {
        let runtime = Runtime::new(FormOptions::default());
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let runtime_inner = runtime.clone();
            let counter = counter.clone();
            runtime.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = counter.clone();
                runtime_inner.spawn(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        futures::executor::block_on(runtime.settle());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!runtime.has_pending_tasks());
    }
}
