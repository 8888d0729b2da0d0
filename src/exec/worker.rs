// src/exec/worker.rs

//! Runs one execution request against a tool's namespace.

use std::collections::BTreeSet;
use std::sync::Arc;

use rhai::{Dynamic, Engine};
use tracing::{debug, info, info_span, warn};

use crate::channel::{PortableValue, Variables};
use crate::errors::ComputationError;
use crate::exec::namespace::{CONFIG, Namespace, STYLES};
use crate::exec::script::{build_engine, config_map};
use crate::exec::snapshot::{SnapshotStore, Slot};
use crate::exec::{ExecutionRequest, ExecutionResult};

/// Stateless apart from the engine and the snapshot store; the per-tool
/// namespace is passed in by the caller so it can outlive a single run.
pub struct Worker {
    engine: Engine,
    store: Arc<dyn SnapshotStore>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(store: Arc<dyn SnapshotStore>, max_operations: u64) -> Self {
        Self {
            engine: build_engine(max_operations),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Execute `request`. Blocking; call from a blocking thread.
    pub fn run(&self, request: &ExecutionRequest, namespace: &mut Namespace) -> ExecutionResult {
        let span = info_span!("run", tool = %request.tool, request = %request.id);
        let _guard = span.enter();

        self.stage_inputs(request);
        namespace.scrub();

        let loaded = match self.store.load(request.tool, Slot::In) {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "input snapshot unavailable; running with no staged inputs");
                Variables::new()
            }
        };
        let mut excluded = namespace.merge(&loaded);
        excluded.remove(STYLES);

        bind_aliases(request, namespace, &mut excluded);

        namespace.insert(CONFIG, Dynamic::from_map(config_map(&request.config)));
        namespace.insert("_tool", Dynamic::from(request.tool_name.clone()));
        namespace.insert("_request", Dynamic::from_int(request.id.0 as i64));

        let mut scope = namespace.to_scope();
        let outcome = self
            .engine
            .compile(&*request.body)
            .map_err(|err| ComputationError::new(format!("parse error: {err}")))
            .and_then(|ast| {
                self.engine
                    .run_ast_with_scope(&mut scope, &ast)
                    .map_err(|err| ComputationError::new(err.to_string()))
            });
        namespace.absorb(&scope);

        if let Err(err) = outcome {
            warn!(tool_name = %request.tool_name, error = %err, "script failed");
            return ExecutionResult::Failure(err);
        }

        let outputs = namespace.collect(&excluded);
        info!(
            tool_name = %request.tool_name,
            outputs = ?outputs.keys().collect::<Vec<_>>(),
            "script finished"
        );

        if let Err(err) = self.store.save(request.tool, Slot::Out, &outputs) {
            warn!(error = %err, "failed to persist outputs");
        }

        ExecutionResult::Success(outputs)
    }

    /// Write the resolved inputs, under their internal names, plus the
    /// session styles to the `in` snapshot.
    fn stage_inputs(&self, request: &ExecutionRequest) {
        let mut staged = Variables::new();
        for dataset in request.inputs.values().flatten() {
            staged.insert(dataset.key().internal_name(), dataset.value().clone());
        }
        if let Some(styles) = &request.styles {
            staged.insert(STYLES.to_string(), PortableValue::Styles(styles.clone()));
        }

        debug!(entries = staged.len(), "staging inputs");
        if let Err(err) = self.store.save(request.tool, Slot::In, &staged) {
            warn!(error = %err, "failed to stage inputs");
        }
    }
}

/// Bind each input port name to the value staged under its dataset's
/// internal name, or to unit when there is none.
fn bind_aliases(
    request: &ExecutionRequest,
    namespace: &mut Namespace,
    excluded: &mut BTreeSet<String>,
) {
    for (input, dataset) in &request.inputs {
        let value = dataset
            .as_ref()
            .and_then(|d| namespace.get(&d.key().internal_name()).cloned())
            .unwrap_or(Dynamic::UNIT);
        if value.is_unit() {
            debug!(%input, "input unbound; aliased to unit");
        }
        namespace.insert(input.clone(), value);
        excluded.insert(input.clone());
    }
}
