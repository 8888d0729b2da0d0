#![allow(dead_code, unused_imports)]

pub use toolflow_test_utils::builders;
pub use toolflow_test_utils::fake_executor;
pub use toolflow_test_utils::presenter;
pub use toolflow_test_utils::{init_tracing, with_timeout};

use std::sync::Arc;

use toolflow::channel::{PortableValue, Variables};
use toolflow::dag::{Dataset, DatasetKey};
use toolflow::engine::{CoreCommand, CoreStep};
use toolflow::exec::{ExecutionRequest, ExecutionResult};

/// All requests dispatched by a core step, in order.
pub fn dispatched(step: &CoreStep) -> Vec<ExecutionRequest> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(requests) => Some(requests.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Names of the tools a core step dispatched.
pub fn dispatched_names(step: &CoreStep) -> Vec<String> {
    dispatched(step).into_iter().map(|r| r.tool_name).collect()
}

pub fn success(outputs: &[(&str, PortableValue)]) -> ExecutionResult {
    ExecutionResult::Success(variables(outputs))
}

pub fn variables(entries: &[(&str, PortableValue)]) -> Variables {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// The dataset a request resolved for `input`.
pub fn input_of(request: &ExecutionRequest, input: &str) -> Option<Arc<Dataset>> {
    request.inputs.get(input).cloned().flatten()
}

pub fn key(producer: u64, output: &str) -> DatasetKey {
    DatasetKey::new(toolflow::types::ToolId(producer), output)
}
