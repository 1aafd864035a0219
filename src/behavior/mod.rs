mod context;
mod effects;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_timer::Delay;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FormError, FormResult};
use crate::node::{FormNode, GroupNode, Node};
use crate::path::{AsFieldPath, FieldPath, PathHandle};
use crate::runtime::{Cleanup, lock};
use crate::validation::{Predicate, decode};
use crate::value::pick_keys;

pub use context::BehaviorContext;

use effects::{resolve_or_warn, watch, write_derived};

type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;
type Install = Box<dyn FnOnce(&GroupNode) -> FormResult<Cleanup>>;

fn typed_predicate<T, P>(predicate: P) -> Predicate
where
    T: DeserializeOwned,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| decode::<T>(value).is_ok_and(|decoded| predicate(&decoded)))
}

struct When {
    path: FormResult<FieldPath>,
    predicate: Predicate,
}

#[derive(Default)]
pub struct CopyOptions {
    when: Option<When>,
    fields: Option<Vec<String>>,
    transform: Option<Transform>,
}

impl CopyOptions {
    /// Copies only while the value at `path` satisfies `predicate`.
    pub fn when<T, P>(mut self, path: impl AsFieldPath, predicate: P) -> Self
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.when = Some(When {
            path: path.to_field_path(),
            predicate: typed_predicate(predicate),
        });
        self
    }

    /// Copies only these keys of an object source.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn transform(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EnableOptions {
    pub reset_on_disable: bool,
}

impl EnableOptions {
    pub fn reset_on_disable() -> Self {
        Self {
            reset_on_disable: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub immediate: bool,
}

impl WatchOptions {
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Collects reactive behaviors while a schema function runs; [`BehaviorBuilder::finish`]
/// installs them as standing effects.
pub struct BehaviorBuilder {
    strict: bool,
    registrations: Vec<(&'static str, Install)>,
    errors: Vec<FormError>,
}

impl BehaviorBuilder {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            registrations: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Keeps `target` equal to `source`, optionally filtered, picked and transformed.
    pub fn copy_from(
        &mut self,
        target: impl AsFieldPath,
        source: impl AsFieldPath,
        options: CopyOptions,
    ) {
        let Some((target, source)) = self.paths2(target, source) else {
            return;
        };
        let CopyOptions {
            when,
            fields,
            transform,
        } = options;
        let when = match when {
            Some(When { path, predicate }) => match path {
                Ok(path) => Some((path, predicate)),
                Err(error) => {
                    self.errors.push(error);
                    return;
                }
            },
            None => None,
        };

        self.register("copy_from", move |scope| {
            scope.resolve(&target)?;
            let mut deps = vec![source];
            let predicate = when.map(|(path, predicate)| {
                deps.push(path);
                predicate
            });
            for dep in &deps {
                scope.resolve(dep)?;
            }
            Ok(watch(scope, deps, true, move |scope, values| {
                if let Some(predicate) = &predicate {
                    if !predicate(&values[1]) {
                        return;
                    }
                }
                let mut value = values[0].clone();
                if let Some(fields) = &fields {
                    value = pick_keys(&value, fields);
                }
                if let Some(transform) = &transform {
                    value = transform(value);
                }
                write_derived(scope, &target, value);
            }))
        });
    }

    /// Enables `target` while the value at `condition` satisfies `predicate`, disabling
    /// it (and optionally resetting it first) otherwise.
    pub fn enable_when<T, P>(
        &mut self,
        target: impl AsFieldPath,
        condition: impl AsFieldPath,
        predicate: P,
        options: EnableOptions,
    ) where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = typed_predicate(predicate);
        self.toggle("enable_when", target, condition, predicate, options);
    }

    pub fn disable_when<T, P>(
        &mut self,
        target: impl AsFieldPath,
        condition: impl AsFieldPath,
        predicate: P,
        options: EnableOptions,
    ) where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = typed_predicate(predicate);
        let inverted: Predicate = Arc::new(move |value: &Value| !predicate(value));
        self.toggle("disable_when", target, condition, inverted, options);
    }

    fn toggle(
        &mut self,
        kind: &'static str,
        target: impl AsFieldPath,
        condition: impl AsFieldPath,
        enabled: Predicate,
        options: EnableOptions,
    ) {
        let Some((target, condition)) = self.paths2(target, condition) else {
            return;
        };
        self.register(kind, move |scope| {
            scope.resolve(&target)?;
            scope.resolve(&condition)?;
            Ok(watch(scope, vec![condition], true, move |scope, values| {
                let Some(node) = resolve_or_warn(scope, &target) else {
                    return;
                };
                if enabled(&values[0]) {
                    if node.disabled() {
                        node.enable();
                    }
                } else if !node.disabled() {
                    if options.reset_on_disable {
                        node.reset();
                    }
                    node.disable();
                }
            }))
        });
    }

    /// Keeps `target` equal to `compute` over the source values. A registration that lets
    /// `target` depend on itself, directly or through other computed fields, is refused.
    pub fn compute_from<S, F>(&mut self, target: impl AsFieldPath, sources: S, compute: F)
    where
        S: IntoIterator,
        S::Item: AsFieldPath,
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let Some(target) = self.path(target) else {
            return;
        };
        let sources = match sources
            .into_iter()
            .map(|source| source.to_field_path())
            .collect::<FormResult<Vec<_>>>()
        {
            Ok(sources) => sources,
            Err(error) => {
                self.errors.push(error);
                return;
            }
        };
        self.register("compute_from", move |scope| {
            scope.resolve(&target)?;
            for source in &sources {
                scope.resolve(source)?;
            }
            let edges = scope
                .runtime()
                .register_computed(scope.id(), &sources, &target)?;
            let effect = watch(scope, sources, true, move |scope, values| {
                write_derived(scope, &target, compute(values));
            });
            effect.add(edges);
            Ok(effect)
        });
    }

    /// Calls `callback` whenever the value at `source` changes. With a debounce only the
    /// last change in a burst is delivered, once [`crate::Form::settle`] drives the timer.
    pub fn watch_field<F>(&mut self, source: impl AsFieldPath, callback: F, options: WatchOptions)
    where
        F: Fn(&Value, &BehaviorContext) + Send + Sync + 'static,
    {
        let Some(source) = self.path(source) else {
            return;
        };
        let callback = Arc::new(callback);
        self.register("watch_field", move |scope| {
            scope.resolve(&source)?;
            let generation = Arc::new(AtomicU64::new(0));
            let effect = {
                let generation = generation.clone();
                watch(scope, vec![source], options.immediate, move |scope, values| {
                    let value = values[0].clone();
                    if options.debounce.is_zero() {
                        callback(&value, &BehaviorContext::new(scope.clone()));
                        return;
                    }
                    let ticket = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let generation = generation.clone();
                    let callback = callback.clone();
                    let weak = scope.downgrade();
                    scope.runtime().spawn(async move {
                        Delay::new(options.debounce).await;
                        if generation.load(Ordering::SeqCst) != ticket {
                            log::trace!("debounced watcher superseded");
                            return;
                        }
                        if let Some(scope) = weak.upgrade() {
                            callback(&value, &BehaviorContext::new(scope));
                        }
                    });
                })
            };
            effect.push(move || {
                generation.fetch_add(1, Ordering::SeqCst);
            });
            Ok(effect)
        });
    }

    /// Async flavour of [`BehaviorBuilder::watch_field`] for remote lookups. The context
    /// passed to `callback` goes stale when the source changes again, dropping the
    /// superseded call's writes.
    pub fn watch_field_async<F, Fut>(
        &mut self,
        source: impl AsFieldPath,
        callback: F,
        options: WatchOptions,
    ) where
        F: Fn(Value, BehaviorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(source) = self.path(source) else {
            return;
        };
        let callback = Arc::new(callback);
        self.register("watch_field_async", move |scope| {
            scope.resolve(&source)?;
            let generation = Arc::new(AtomicU64::new(0));
            let effect = {
                let generation = generation.clone();
                watch(scope, vec![source], options.immediate, move |scope, values| {
                    let value = values[0].clone();
                    let ticket = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let generation = generation.clone();
                    let callback = callback.clone();
                    let weak = scope.downgrade();
                    scope.runtime().spawn(async move {
                        if !options.debounce.is_zero() {
                            Delay::new(options.debounce).await;
                        }
                        if generation.load(Ordering::SeqCst) != ticket {
                            log::trace!("async watcher superseded before running");
                            return;
                        }
                        let Some(scope) = weak.upgrade() else {
                            return;
                        };
                        let context = BehaviorContext::tracking(scope, generation, ticket);
                        callback(value, context).await;
                    });
                })
            };
            effect.push(move || {
                generation.fetch_add(1, Ordering::SeqCst);
            });
            Ok(effect)
        });
    }

    /// Re-runs `target`'s validation whenever any of `deps` changes.
    pub fn revalidate_when<D>(&mut self, target: impl AsFieldPath, deps: D)
    where
        D: IntoIterator,
        D::Item: AsFieldPath,
    {
        let Some(target) = self.path(target) else {
            return;
        };
        let deps = match deps
            .into_iter()
            .map(|dep| dep.to_field_path())
            .collect::<FormResult<Vec<_>>>()
        {
            Ok(deps) => deps,
            Err(error) => {
                self.errors.push(error);
                return;
            }
        };
        self.register("revalidate_when", move |scope| {
            scope.resolve(&target)?;
            for dep in &deps {
                scope.resolve(dep)?;
            }
            Ok(watch(scope, deps, false, move |scope, _| {
                if let Some(node) = resolve_or_warn(scope, &target) {
                    node.validate();
                }
            }))
        });
    }

    /// Two-way copy: a change on either side is written to the other.
    pub fn sync_fields(&mut self, a: impl AsFieldPath, b: impl AsFieldPath) {
        let Some((a, b)) = self.paths2(a, b) else {
            return;
        };
        self.register("sync_fields", move |scope| {
            scope.resolve(&a)?;
            scope.resolve(&b)?;
            let forward = {
                let b = b.clone();
                watch(scope, vec![a.clone()], false, move |scope, values| {
                    write_derived(scope, &b, values[0].clone());
                })
            };
            let backward = watch(scope, vec![b], false, move |scope, values| {
                write_derived(scope, &a, values[0].clone());
            });
            forward.add(backward);
            Ok(forward)
        });
    }

    /// Resets `target` to its initial value whenever the value at `condition` changes to
    /// one satisfying `predicate`.
    pub fn reset_when<T, P>(
        &mut self,
        target: impl AsFieldPath,
        condition: impl AsFieldPath,
        predicate: P,
    ) where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = typed_predicate(predicate);
        let Some((target, condition)) = self.paths2(target, condition) else {
            return;
        };
        self.register("reset_when", move |scope| {
            scope.resolve(&target)?;
            scope.resolve(&condition)?;
            Ok(watch(scope, vec![condition], false, move |scope, values| {
                if !predicate(&values[0]) {
                    return;
                }
                if let Some(node) = resolve_or_warn(scope, &target) {
                    node.reset();
                }
            }))
        });
    }

    /// Installs `schema` on every item of the array at `array`, current and future.
    /// Removing an item runs the cleanups of the effects installed on it.
    pub fn each<H, F>(&mut self, array: impl AsFieldPath, schema: F)
    where
        H: PathHandle,
        F: Fn(&mut BehaviorBuilder, H) + Send + Sync + 'static,
    {
        let Some(array) = self.path(array) else {
            return;
        };
        let schema = Arc::new(move |builder: &mut BehaviorBuilder| {
            schema(builder, H::from_field_path(FieldPath::root()))
        });
        self.register("each", move |scope| match scope.resolve(&array)? {
            FormNode::Array(node) => node.add_item_behavior(schema),
            _ => Err(FormError::NodeKindMismatch {
                path: array.to_string(),
                expected: "array",
            }),
        });
    }

    /// Runs a reusable schema once per base handle.
    pub fn apply<H, I, F>(&mut self, bases: I, schema: F)
    where
        I: IntoIterator<Item = H>,
        F: Fn(&mut BehaviorBuilder, H),
    {
        for base in bases {
            schema(self, base);
        }
    }

    /// Installs `schema` when the value at `condition` starts satisfying `predicate` and
    /// removes it when it stops. At most one activation is live at a time.
    pub fn apply_when<T, P, F>(&mut self, condition: impl AsFieldPath, predicate: P, schema: F)
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(&mut BehaviorBuilder) + Send + Sync + 'static,
    {
        let Some(condition) = self.path(condition) else {
            return;
        };
        let predicate = typed_predicate(predicate);
        let strict = self.strict;
        self.register("apply_when", move |scope| {
            scope.resolve(&condition)?;
            let active: Arc<Mutex<Option<Cleanup>>> = Arc::new(Mutex::new(None));
            let effect = {
                let active = active.clone();
                watch(scope, vec![condition], true, move |scope, values| {
                    let holds = predicate(&values[0]);
                    let current = lock(&active).take();
                    match (holds, current) {
                        (true, Some(live)) => *lock(&active) = Some(live),
                        (true, None) => {
                            let mut builder = BehaviorBuilder::new(strict);
                            schema(&mut builder);
                            match builder.finish(scope) {
                                Ok(cleanup) => *lock(&active) = Some(cleanup),
                                Err(error) => {
                                    log::warn!("conditional behaviors not installed: {error}")
                                }
                            }
                        }
                        (false, Some(live)) => live.run(),
                        (false, None) => {}
                    }
                })
            };
            effect.push(move || {
                if let Some(live) = lock(&active).take() {
                    live.run();
                }
            });
            Ok(effect)
        });
    }

    fn register(
        &mut self,
        kind: &'static str,
        install: impl FnOnce(&GroupNode) -> FormResult<Cleanup> + 'static,
    ) {
        self.registrations.push((kind, Box::new(install)));
    }

    fn path(&mut self, path: impl AsFieldPath) -> Option<FieldPath> {
        path.to_field_path()
            .map_err(|error| self.errors.push(error))
            .ok()
    }

    fn paths2(
        &mut self,
        a: impl AsFieldPath,
        b: impl AsFieldPath,
    ) -> Option<(FieldPath, FieldPath)> {
        let a = self.path(a);
        let b = self.path(b);
        a.zip(b)
    }

    /// Installs every registered behavior on `scope` inside one batch. With strict paths
    /// the first failure undoes what was installed and is returned; otherwise failures
    /// are logged and skipped.
    pub(crate) fn finish(self, scope: &GroupNode) -> FormResult<Cleanup> {
        let strict = self.strict;
        if strict {
            if let Some(error) = self.errors.into_iter().next() {
                return Err(error);
            }
        } else {
            for error in self.errors {
                log::warn!("skipping behavior: {error}");
            }
        }

        let cleanup = Cleanup::noop();
        let count = self.registrations.len();
        scope.runtime().batch(|| {
            for (kind, install) in self.registrations {
                match install(scope) {
                    Ok(installed) => cleanup.add(installed),
                    Err(error) if strict => {
                        cleanup.run();
                        return Err(error);
                    }
                    Err(error) => log::warn!("skipping {kind} behavior: {error}"),
                }
            }
            Ok(())
        })?;
        log::debug!(
            "behavior schema installed {count} effects under `{}`",
            FormNode::Group(scope.clone()).path()
        );
        Ok(cleanup)
    }
}
