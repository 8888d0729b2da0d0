// tests/core_scenarios.rs

mod common;
use crate::common::builders::{array_value, table_value, ToolSpecBuilder};
use crate::common::{dispatched, dispatched_names, init_tracing, input_of, success};

use toolflow::channel::{Figure, NumericArray, PortableValue, Primitive, StyleSheet, ValueKind};
use toolflow::dag::{ConsumerDefinition, DatasetKey};
use toolflow::engine::{
    CoreCommand, CoreRuntime, CoreStep, RuntimeEvent, RuntimeOptions, SessionState, ToolSpec,
    ToolStatus, TriggerReason,
};
use toolflow::errors::ComputationError;
use toolflow::exec::{ExecutionRequest, ExecutionResult};
use toolflow::types::{Recalculate, ToolId};

fn tables() -> ConsumerDefinition {
    ConsumerDefinition::any().with_kind(ValueKind::Table)
}

fn rows(n: usize, m: usize) -> Vec<Vec<f64>> {
    vec![vec![1.0; m]; n]
}

fn core_with(specs: Vec<ToolSpec>, options: RuntimeOptions) -> (CoreRuntime, Vec<ToolId>) {
    init_tracing();
    let mut state = SessionState::new(StyleSheet::default());
    let ids = specs
        .into_iter()
        .map(|spec| state.add_tool(spec).expect("tool added"))
        .collect();
    (CoreRuntime::new(state, options), ids)
}

fn trigger(core: &mut CoreRuntime, tool: ToolId) -> CoreStep {
    core.step(RuntimeEvent::ToolTriggered {
        tool,
        reason: TriggerReason::Manual,
    })
}

fn complete(core: &mut CoreRuntime, request: &ExecutionRequest, result: ExecutionResult) -> CoreStep {
    core.step(RuntimeEvent::RunCompleted {
        tool: request.tool,
        request: request.id,
        result,
    })
}

/// Trigger `tool` and immediately complete its run with `outputs`.
fn run_to_completion(
    core: &mut CoreRuntime,
    tool: ToolId,
    outputs: &[(&str, PortableValue)],
) -> CoreStep {
    let requests = dispatched(&trigger(core, tool));
    assert_eq!(requests.len(), 1, "expected a single dispatch");
    complete(core, &requests[0], success(outputs))
}

fn single(step: &CoreStep) -> ExecutionRequest {
    let requests = dispatched(step);
    assert_eq!(requests.len(), 1, "expected exactly one dispatch, got {requests:?}");
    requests.into_iter().next().expect("one request")
}

fn first_value(request: &ExecutionRequest, input: &str) -> f64 {
    match input_of(request, input).map(|d| d.value().clone()) {
        Some(PortableValue::Array(NumericArray { data, .. })) => data[0],
        other => panic!("unexpected input {other:?}"),
    }
}

fn source_and_sink() -> Vec<ToolSpec> {
    vec![
        ToolSpecBuilder::new("A").output("scores").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.scores")
            .output("summary")
            .build(),
    ]
}

#[test]
fn republished_shape_change_triggers_consumer() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("scores").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", tables(), "A.scores")
            .output("summary")
            .build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);

    let step = run_to_completion(&mut core, a, &[("scores", table_value(rows(10, 3)))]);
    let req_b = single(&step);
    assert_eq!(req_b.tool, b);
    assert_eq!(input_of(&req_b, "data").expect("bound").shape(), &[10, 3]);
    assert!(dispatched(&complete(&mut core, &req_b, success(&[]))).is_empty());

    let step = run_to_completion(&mut core, a, &[("scores", table_value(rows(10, 4)))]);
    let req_b = single(&step);
    assert_eq!(input_of(&req_b, "data").expect("bound").shape(), &[10, 4]);
}

#[test]
fn three_updates_while_running_cause_one_rerun_with_latest() {
    let (mut core, ids) = core_with(source_and_sink(), RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);

    let step = run_to_completion(&mut core, a, &[("scores", array_value(vec![1.0]))]);
    let running = single(&step);
    assert_eq!(first_value(&running, "data"), 1.0);

    // I2 and I3 arrive while B is still running.
    let step = run_to_completion(&mut core, a, &[("scores", array_value(vec![2.0]))]);
    assert!(dispatched(&step).is_empty());
    let step = run_to_completion(&mut core, a, &[("scores", array_value(vec![3.0]))]);
    assert!(dispatched(&step).is_empty());
    assert!(core.state().tool(b).expect("B").queue.has_pending());

    let rerun = single(&complete(&mut core, &running, success(&[])));
    assert_eq!(rerun.tool, b);
    assert_eq!(first_value(&rerun, "data"), 3.0);

    assert!(dispatched(&complete(&mut core, &rerun, success(&[]))).is_empty());
    assert!(core.is_idle());
}

#[test]
fn failure_keeps_previous_outputs_and_does_not_propagate() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("scores").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.scores")
            .output("summary")
            .build(),
        ToolSpecBuilder::new("C")
            .input_from("data", ConsumerDefinition::any(), "B.summary")
            .build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let req_b = single(&run_to_completion(&mut core, a, &[("scores", array_value(vec![1.0]))]));
    let req_c = single(&complete(&mut core, &req_b, success(&[("summary", array_value(vec![10.0]))])));
    assert_eq!(req_c.tool, c);
    complete(&mut core, &req_c, success(&[]));

    let req_b = single(&run_to_completion(&mut core, a, &[("scores", array_value(vec![2.0]))]));
    let step = complete(
        &mut core,
        &req_b,
        ExecutionResult::Failure(ComputationError::new("boom (line 1, position 1)")),
    );

    assert!(dispatched(&step).is_empty(), "downstream must not run after a failure");
    let tool_b = core.state().tool(b).expect("B");
    assert_eq!(tool_b.status, ToolStatus::Error("boom (line 1, position 1)".to_string()));
    let summary = core
        .state()
        .registry()
        .get(&DatasetKey::new(b, "summary"))
        .expect("previous output still published");
    assert_eq!(summary.value(), &array_value(vec![10.0]));
}

#[test]
fn stale_completion_is_ignored() {
    let (mut core, ids) = core_with(source_and_sink(), RuntimeOptions::default());
    let a = ids[0];

    let req = single(&trigger(&mut core, a));
    let mut bogus = req.clone();
    bogus.id = toolflow::types::RequestId(req.id.0 + 100);

    let step = complete(&mut core, &bogus, success(&[("scores", array_value(vec![1.0]))]));
    assert!(step.commands.is_empty());
    assert_eq!(core.state().tool(a).expect("A").status, ToolStatus::Active);
    assert!(core.state().registry().list_all().is_empty());

    let step = core.step(RuntimeEvent::RunCompleted {
        tool: ToolId(999),
        request: req.id,
        result: success(&[]),
    });
    assert!(step.commands.is_empty());
}

#[test]
fn success_publishes_declared_outputs_and_renders_every_binding() {
    let specs = vec![ToolSpecBuilder::new("pca").output("scores").output("count").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());

    let step = run_to_completion(
        &mut core,
        ids[0],
        &[
            ("scores", table_value(rows(2, 2))),
            ("count", PortableValue::Primitive(Primitive::Int(2))),
            ("Scores 1v2", PortableValue::Figure(Figure::new("Scores 1v2"))),
        ],
    );

    let rendered: Vec<_> = step
        .commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Render { outputs, .. } => Some(outputs.keys().cloned().collect::<Vec<_>>()),
            _ => None,
        })
        .collect();
    assert_eq!(
        rendered,
        vec![vec!["Scores 1v2".to_string(), "count".to_string(), "scores".to_string()]]
    );

    let published: Vec<_> = core
        .state()
        .registry()
        .list_all()
        .iter()
        .map(|d| d.key().output.clone())
        .collect();
    assert_eq!(published, vec!["count".to_string(), "scores".to_string()]);

    let last = core.state().tool(ids[0]).expect("pca").last_outputs.clone().expect("outputs");
    assert!(last.contains_key("Scores 1v2"));
}

#[test]
fn view_recalc_rerenders_undeclared_figures() {
    let specs = vec![ToolSpecBuilder::new("pca").output("scores").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    run_to_completion(
        &mut core,
        ids[0],
        &[
            ("scores", table_value(rows(2, 2))),
            ("PC1", PortableValue::Figure(Figure::new("PC1"))),
        ],
    );

    let step = core.step(RuntimeEvent::ConfigChanged {
        tool: ids[0],
        key: "colour".to_string(),
        value: Primitive::Text("red".to_string()),
        recalc: Recalculate::View,
    });

    assert!(dispatched(&step).is_empty());
    assert!(step.commands.iter().any(|c| matches!(
        c,
        CoreCommand::Render { outputs, .. } if outputs.contains_key("PC1")
    )));
}

#[test]
fn tool_added_at_runtime_runs_on_existing_data() {
    let specs = vec![ToolSpecBuilder::new("A").output("t").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let a = ids[0];
    run_to_completion(&mut core, a, &[("t", table_value(rows(3, 2)))]);

    let step = core.step(RuntimeEvent::ToolAdded {
        spec: ToolSpecBuilder::new("C").input("data", tables()).build(),
    });

    let request = single(&step);
    assert_eq!(request.tool_name, "C");
    assert_eq!(
        input_of(&request, "data").map(|d| d.key().clone()),
        Some(DatasetKey::new(a, "t"))
    );
}

#[test]
fn tool_added_without_matching_data_stays_idle() {
    let specs = vec![ToolSpecBuilder::new("A").output("t").build()];
    let (mut core, _ids) = core_with(specs, RuntimeOptions::default());

    let step = core.step(RuntimeEvent::ToolAdded {
        spec: ToolSpecBuilder::new("C").input("data", tables()).build(),
    });

    assert!(dispatched(&step).is_empty());
    let c = core.state().tool_id("C").expect("created");
    assert!(core.state().tool(c).expect("C").is_idle());
}

#[test]
fn tool_added_with_cyclic_source_is_rejected() {
    let specs = vec![ToolSpecBuilder::new("A")
        .input_from("data", ConsumerDefinition::any(), "B.out")
        .output("out")
        .build()];
    let (mut core, _ids) = core_with(specs, RuntimeOptions::default());

    let step = core.step(RuntimeEvent::ToolAdded {
        spec: ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.out")
            .output("out")
            .build(),
    });

    assert!(dispatched(&step).is_empty());
    assert!(core.state().tool_id("B").is_none());
}

#[test]
fn input_bound_and_lost_in_one_step_does_not_run_manual_consumer() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("t").build(),
        ToolSpecBuilder::new("B").input("data", tables()).auto_consume(false).build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);
    run_to_completion(&mut core, a, &[("t", table_value(rows(2, 2)))]);

    // Binding a published key queues an update for B; the removal of A in
    // the same step takes the source away again.
    core.state_mut()
        .bind_input(b, "data", DatasetKey::new(a, "t"))
        .expect("binds");
    assert!(core.state().tool(b).expect("B").data.is_pinned("data"));
    let step = core.step(RuntimeEvent::ToolRemoved { tool: a });

    assert!(dispatched(&step).is_empty());
    let b_tool = core.state().tool(b).expect("B");
    assert!(b_tool.data.binding("data").is_none());
    assert!(!b_tool.data.is_pinned("data"));
}

#[test]
fn coalesced_rerun_is_dropped_when_paused_meanwhile() {
    let (mut core, ids) = core_with(source_and_sink(), RuntimeOptions::default());
    let a = ids[0];

    let first = single(&trigger(&mut core, a));
    assert!(dispatched(&trigger(&mut core, a)).is_empty(), "coalesced");
    core.step(RuntimeEvent::PauseChanged { tool: a, paused: true });

    let step = complete(&mut core, &first, success(&[]));

    assert!(dispatched(&step).iter().all(|r| r.tool != a));
    let tool = core.state().tool(a).expect("A");
    assert!(tool.is_idle());
    assert!(tool.stale);
    assert_eq!(tool.status, ToolStatus::Paused);

    let resumed = core.step(RuntimeEvent::PauseChanged { tool: a, paused: false });
    assert_eq!(single(&resumed).tool, a);
}

#[test]
fn explicit_source_may_name_a_later_tool() {
    let specs = vec![
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.scores")
            .build(),
        ToolSpecBuilder::new("A").output("scores").build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (b, a) = (ids[0], ids[1]);

    assert_eq!(core.state().tool(b).expect("B").data.binding("data"), Some(&DatasetKey::new(a, "scores")));
    assert_eq!(core.state().roots(), vec![a]);

    let req = single(&run_to_completion(&mut core, a, &[("scores", array_value(vec![5.0]))]));
    assert_eq!(req.tool, b);
}

#[test]
fn mutual_explicit_sources_are_rejected() {
    init_tracing();
    let mut state = SessionState::new(StyleSheet::default());
    state
        .add_tool(
            ToolSpecBuilder::new("A")
                .input_from("in", ConsumerDefinition::any(), "B.out")
                .output("out")
                .build(),
        )
        .expect("first half is fine");
    let err = state
        .add_tool(
            ToolSpecBuilder::new("B")
                .input_from("in", ConsumerDefinition::any(), "A.out")
                .output("out")
                .build(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn duplicate_tool_names_are_rejected() {
    init_tracing();
    let mut state = SessionState::new(StyleSheet::default());
    state.add_tool(ToolSpec::new("A", "")).expect("added");
    assert!(state.add_tool(ToolSpec::new("A", "")).is_err());
}

#[test]
fn auto_consume_binds_new_dataset_and_runs() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("t").build(),
        ToolSpecBuilder::new("C").input("data", tables()).build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, c) = (ids[0], ids[1]);
    assert!(core.state().tool(c).expect("C").data.binding("data").is_none());

    let req = single(&run_to_completion(&mut core, a, &[("t", table_value(rows(2, 2)))]));
    assert_eq!(req.tool, c);
    assert_eq!(
        input_of(&req, "data").map(|d| d.key().clone()),
        Some(DatasetKey::new(a, "t"))
    );
}

#[test]
fn auto_consume_on_creation_prefers_most_recent_producer() {
    init_tracing();
    let mut state = SessionState::new(StyleSheet::default());
    let a1 = state.add_tool(ToolSpecBuilder::new("A1").output("t").build()).expect("A1");
    let a2 = state.add_tool(ToolSpecBuilder::new("A2").output("t").build()).expect("A2");
    let mut core = CoreRuntime::new(state, RuntimeOptions::default());
    run_to_completion(&mut core, a1, &[("t", table_value(rows(1, 1)))]);
    run_to_completion(&mut core, a2, &[("t", table_value(rows(1, 1)))]);

    let c = core
        .state_mut()
        .add_tool(ToolSpecBuilder::new("C").input("data", tables()).build())
        .expect("C");

    assert_eq!(
        core.state().tool(c).expect("C").data.binding("data"),
        Some(&DatasetKey::new(a2, "t"))
    );
}

#[test]
fn removing_upstream_re_resolves_auto_consumers() {
    let specs = vec![
        ToolSpecBuilder::new("A1").output("t").build(),
        ToolSpecBuilder::new("A2").output("t").build(),
        ToolSpecBuilder::new("C").input("data", tables()).build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a1, a2, c) = (ids[0], ids[1], ids[2]);

    let req_c = single(&run_to_completion(&mut core, a1, &[("t", table_value(rows(1, 1)))]));
    complete(&mut core, &req_c, success(&[]));
    assert!(dispatched(&run_to_completion(&mut core, a2, &[("t", table_value(rows(2, 2)))])).is_empty());

    let step = core.step(RuntimeEvent::ToolRemoved { tool: a1 });

    assert!(step.commands.iter().any(|cmd| matches!(cmd, CoreCommand::Release(t) if *t == a1)));
    let rerun = single(&step);
    assert_eq!(rerun.tool, c);
    assert_eq!(
        input_of(&rerun, "data").map(|d| d.key().clone()),
        Some(DatasetKey::new(a2, "t"))
    );
    assert!(core.state().tool(a1).is_none());
    assert!(core.state().tool_id("A1").is_none());
}

#[test]
fn removing_upstream_leaves_manual_consumer_idle() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("t").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.t")
            .auto_consume(false)
            .build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);

    let req = single(&run_to_completion(&mut core, a, &[("t", table_value(rows(1, 1)))]));
    complete(&mut core, &req, success(&[]));

    let step = core.step(RuntimeEvent::ToolRemoved { tool: a });
    assert!(dispatched(&step).is_empty());
    let tool_b = core.state().tool(b).expect("B");
    assert!(tool_b.data.binding("data").is_none());
    assert!(tool_b.is_idle());
}

#[test]
fn paused_tool_ignores_automatic_triggers_until_resumed() {
    let specs = vec![
        ToolSpecBuilder::new("A").output("scores").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.scores")
            .paused(true)
            .build(),
    ];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);

    let step = run_to_completion(&mut core, a, &[("scores", array_value(vec![1.0]))]);
    assert!(dispatched(&step).is_empty());
    let tool_b = core.state().tool(b).expect("B");
    assert_eq!(tool_b.status, ToolStatus::Paused);
    assert!(tool_b.stale);

    let step = core.step(RuntimeEvent::PauseChanged { tool: b, paused: false });
    let req = single(&step);
    assert_eq!(req.tool, b);
    assert_eq!(first_value(&req, "data"), 1.0);
}

#[test]
fn manual_trigger_runs_paused_tool() {
    let specs = vec![ToolSpecBuilder::new("A").output("x").paused(true).build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    assert_eq!(dispatched_names(&trigger(&mut core, ids[0])), vec!["A".to_string()]);
}

#[test]
fn view_recalculation_re_renders_without_running() {
    let specs = vec![ToolSpecBuilder::new("A").output("scores").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let a = ids[0];

    // No outputs yet: falls back to a full recompute.
    let step = core.step(RuntimeEvent::ConfigChanged {
        tool: a,
        key: "color".to_string(),
        value: Primitive::Text("red".to_string()),
        recalc: Recalculate::View,
    });
    let req = single(&step);
    assert_eq!(req.config.get("color"), Some(&Primitive::Text("red".to_string())));
    complete(&mut core, &req, success(&[("scores", table_value(rows(1, 1)))]));

    let step = core.step(RuntimeEvent::ConfigChanged {
        tool: a,
        key: "color".to_string(),
        value: Primitive::Text("blue".to_string()),
        recalc: Recalculate::View,
    });
    assert!(dispatched(&step).is_empty());
    assert!(step.commands.iter().any(|c| matches!(c, CoreCommand::Render { .. })));

    let step = core.step(RuntimeEvent::ConfigChanged {
        tool: a,
        key: "factor".to_string(),
        value: Primitive::Float(2.0),
        recalc: Recalculate::All,
    });
    let req = single(&step);
    assert_eq!(req.config.get("factor"), Some(&Primitive::Float(2.0)));
}

#[test]
fn script_change_reruns_only_when_body_differs() {
    let specs = vec![ToolSpecBuilder::new("A").body("let x = 1;").output("x").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());
    let a = ids[0];

    let step = core.step(RuntimeEvent::ScriptChanged {
        tool: a,
        body: "let x = 1;".to_string(),
    });
    assert!(dispatched(&step).is_empty());

    let step = core.step(RuntimeEvent::ScriptChanged {
        tool: a,
        body: "let x = 2;".to_string(),
    });
    assert_eq!(&*single(&step).body, "let x = 2;");
}

#[test]
fn styles_output_replaces_session_sheet() {
    let specs = vec![ToolSpecBuilder::new("Theme").build()];
    let (mut core, ids) = core_with(specs, RuntimeOptions::default());

    let mut sheet = StyleSheet::default();
    sheet.set("control", "color", "#ff0000");
    run_to_completion(&mut core, ids[0], &[("styles", PortableValue::Styles(sheet.clone()))]);

    assert_eq!(core.state().styles(), &sheet);
    let req = single(&trigger(&mut core, ids[0]));
    assert_eq!(req.styles, Some(sheet));
}

#[test]
fn unbind_request_reruns_without_the_input() {
    let (mut core, ids) = core_with(source_and_sink(), RuntimeOptions::default());
    let (a, b) = (ids[0], ids[1]);
    let req = single(&run_to_completion(&mut core, a, &[("scores", array_value(vec![1.0]))]));
    complete(&mut core, &req, success(&[]));

    let step = core.step(RuntimeEvent::UnbindRequested {
        tool: b,
        input: "data".to_string(),
    });
    let req = single(&step);
    assert!(input_of(&req, "data").is_none());
    complete(&mut core, &req, success(&[]));

    // Republishing upstream no longer reaches B.
    let step = run_to_completion(&mut core, a, &[("scores", array_value(vec![2.0]))]);
    assert!(dispatched(&step).is_empty());

    let step = core.step(RuntimeEvent::BindRequested {
        tool: b,
        input: "data".to_string(),
        source: DatasetKey::new(a, "scores"),
    });
    assert_eq!(first_value(&single(&step), "data"), 2.0);
}

#[test]
fn once_mode_requests_exit_when_all_idle() {
    let (mut core, ids) = core_with(source_and_sink(), RuntimeOptions { exit_when_idle: true });
    let a = ids[0];

    let step = trigger(&mut core, a);
    assert!(step.keep_running);
    let req_a = single(&step);

    let step = complete(&mut core, &req_a, success(&[("scores", array_value(vec![1.0]))]));
    assert!(step.keep_running, "B is now running");
    let req_b = single(&step);

    let step = complete(&mut core, &req_b, success(&[]));
    assert!(!step.keep_running);
    assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
}
