use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::node::{FormNode, GroupNode, Node, SetValueOptions};
use crate::path::FieldPath;
use crate::runtime::{Cleanup, lock};

type EffectFn = Arc<dyn Fn(&GroupNode, &[Value]) + Send + Sync>;

/// Standing effect over `deps`, resolved against `scope` each time it runs. It is
/// notified on any change below `scope` but only calls `run` when one of the dependency
/// values differs from the previous run.
pub(crate) fn watch(
    scope: &GroupNode,
    deps: Vec<FieldPath>,
    immediate: bool,
    run: impl Fn(&GroupNode, &[Value]) + Send + Sync + 'static,
) -> Cleanup {
    let run: EffectFn = Arc::new(run);
    let memo: Arc<Mutex<Option<Vec<Value>>>> = Arc::new(Mutex::new(None));
    let weak = scope.downgrade();

    let check = {
        let memo = memo.clone();
        let deps = deps.clone();
        Arc::new(move || {
            let Some(scope) = weak.upgrade() else {
                return;
            };
            let values = read_deps(&scope, &deps);
            {
                let mut memo = lock(&memo);
                if memo.as_ref() == Some(&values) {
                    return;
                }
                *memo = Some(values.clone());
            }
            run(&scope, &values);
        })
    };

    let cleanup = scope.core().subscribe(check.clone());
    if immediate {
        check();
    } else {
        *lock(&memo) = Some(read_deps(scope, &deps));
    }
    cleanup
}

fn read_deps(scope: &GroupNode, deps: &[FieldPath]) -> Vec<Value> {
    deps.iter()
        .map(|path| match scope.resolve(path) {
            Ok(node) => node.raw_value(),
            Err(error) => {
                log::warn!("effect dependency `{path}` unavailable: {error}");
                Value::Null
            }
        })
        .collect()
}

pub(crate) fn resolve_or_warn(scope: &GroupNode, path: &FieldPath) -> Option<FormNode> {
    match scope.resolve(path) {
        Ok(node) => Some(node),
        Err(error) => {
            log::warn!("effect target `{path}` unavailable: {error}");
            None
        }
    }
}

/// Writes an engine-derived value, skipping the write when nothing would change.
pub(crate) fn write_derived(scope: &GroupNode, target: &FieldPath, value: Value) {
    let Some(node) = resolve_or_warn(scope, target) else {
        return;
    };
    if node.raw_value() == value {
        return;
    }
    if let Err(error) = node.set_value_with(value, SetValueOptions::derived()) {
        log::warn!("derived write to `{target}` rejected: {error}");
    }
}
