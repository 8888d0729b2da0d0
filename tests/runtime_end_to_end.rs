// tests/runtime_end_to_end.rs

mod common;
use crate::common::builders::{table_value, ToolSpecBuilder};
use crate::common::fake_executor::FakeExecutor;
use crate::common::presenter::RecordingPresenter;
use crate::common::{init_tracing, variables, with_timeout};

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use toolflow::channel::{Markup, MarkupFormat, PortableValue, Primitive, StyleSheet};
use toolflow::dag::{ConsumerDefinition, DatasetKey};
use toolflow::engine::{
    CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, SessionState, ToolSpec, ToolStatus,
    TriggerReason,
};
use toolflow::exec::{ExecutionRequest, ExecutionResult, MemorySnapshotStore, RealExecutorBackend, Worker};
use toolflow::present::RenderKind;
use toolflow::types::ToolId;

type TestResult = Result<(), Box<dyn Error>>;

fn session(specs: Vec<ToolSpec>) -> (SessionState, Vec<ToolId>) {
    let mut state = SessionState::new(StyleSheet::default());
    let ids = specs
        .into_iter()
        .map(|spec| state.add_tool(spec).expect("tool added"))
        .collect();
    (state, ids)
}

fn once() -> RuntimeOptions {
    RuntimeOptions {
        exit_when_idle: true,
    }
}

async fn trigger(tx: &mpsc::Sender<RuntimeEvent>, tool: ToolId) -> TestResult {
    tx.send(RuntimeEvent::ToolTriggered {
        tool,
        reason: TriggerReason::Manual,
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn fake_executor_chain_runs_and_presents() -> TestResult {
    init_tracing();

    let (state, ids) = session(vec![
        ToolSpecBuilder::new("A").output("scores").build(),
        ToolSpecBuilder::new("B")
            .input_from("data", ConsumerDefinition::any(), "A.scores")
            .output("report")
            .build(),
    ]);
    let (a, b) = (ids[0], ids[1]);

    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::with_responder(
        tx.clone(),
        Arc::new(|req: &ExecutionRequest| match req.tool_name.as_str() {
            "A" => ExecutionResult::Success(variables(&[(
                "scores",
                table_value(vec![vec![1.0, 2.0]]),
            )])),
            _ => ExecutionResult::Success(variables(&[(
                "report",
                PortableValue::Markup(Markup {
                    format: MarkupFormat::Html,
                    source: "<p>ok</p>".to_string(),
                }),
            )])),
        }),
    );
    let requests = executor.requests();
    let presenter = RecordingPresenter::new();
    let seen = presenter.seen();

    trigger(&tx, a).await?;

    let runtime = Runtime::new(CoreRuntime::new(state, once()), rx, executor, presenter);
    let core = with_timeout(runtime.run()).await?;

    let names: Vec<_> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.tool_name.clone())
        .collect();
    assert_eq!(names, vec!["A", "B"]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].tool_name, "A");
    assert_eq!(seen[0].payloads["scores"].kind, RenderKind::Table);
    assert_eq!(seen[1].tool_name, "B");
    assert_eq!(seen[1].payloads["report"].kind, RenderKind::Markup);

    assert_eq!(core.state().tool(b).expect("B").status, ToolStatus::Done);
    Ok(())
}

#[tokio::test]
async fn non_displayable_outputs_are_not_presented() -> TestResult {
    init_tracing();

    let (state, ids) = session(vec![ToolSpecBuilder::new("A").output("n").build()]);
    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::with_responder(
        tx.clone(),
        Arc::new(|_: &ExecutionRequest| {
            ExecutionResult::Success(variables(&[("n", PortableValue::Primitive(Primitive::Int(1)))]))
        }),
    );
    let presenter = RecordingPresenter::new();
    let seen = presenter.seen();

    trigger(&tx, ids[0]).await?;
    let runtime = Runtime::new(CoreRuntime::new(state, once()), rx, executor, presenter);
    let core = with_timeout(runtime.run()).await?;

    assert!(seen.lock().unwrap().is_empty());
    assert!(core.state().registry().contains(&DatasetKey::new(ids[0], "n")));
    Ok(())
}

#[tokio::test]
async fn removal_releases_worker_state() -> TestResult {
    init_tracing();

    let (state, ids) = session(vec![
        ToolSpecBuilder::new("A").output("x").build(),
        ToolSpecBuilder::new("B").output("y").build(),
    ]);
    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone());
    let released = executor.released();

    tx.send(RuntimeEvent::ToolRemoved { tool: ids[0] }).await?;
    tx.send(RuntimeEvent::ShutdownRequested).await?;

    let runtime = Runtime::new(
        CoreRuntime::new(state, RuntimeOptions::default()),
        rx,
        executor,
        RecordingPresenter::new(),
    );
    let core = with_timeout(runtime.run()).await?;

    assert_eq!(*released.lock().unwrap(), vec![ids[0]]);
    assert!(core.state().tool(ids[0]).is_none());
    assert!(core.state().tool(ids[1]).is_some());
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_an_idle_runtime() -> TestResult {
    init_tracing();

    let (state, _ids) = session(vec![ToolSpecBuilder::new("A").build()]);
    let (tx, rx) = mpsc::channel(4);
    let executor = FakeExecutor::new(tx.clone());
    let requests = executor.requests();

    tx.send(RuntimeEvent::ShutdownRequested).await?;
    let runtime = Runtime::new(
        CoreRuntime::new(state, RuntimeOptions::default()),
        rx,
        executor,
        RecordingPresenter::new(),
    );
    with_timeout(runtime.run()).await?;

    assert!(requests.lock().unwrap().is_empty());
    Ok(())
}

fn real_backend(tx: mpsc::Sender<RuntimeEvent>, max_workers: usize) -> RealExecutorBackend {
    let worker = Arc::new(Worker::new(Arc::new(MemorySnapshotStore::new()), 0));
    RealExecutorBackend::new(tx, worker, max_workers)
}

#[tokio::test]
async fn real_executor_runs_scripts_end_to_end() -> TestResult {
    init_tracing();

    let (state, ids) = session(vec![
        ToolSpecBuilder::new("load")
            .body(r#"let scores = table([[1.0, 2.0], [3.0, 4.0]], ["s1", "s2"], ["m1", "m2"]);"#)
            .output("scores")
            .build(),
        ToolSpecBuilder::new("scale")
            .body("let scaled = data.scale(config.factor); let n = data.n_rows;")
            .input_from("data", ConsumerDefinition::any(), "load.scores")
            .output("scaled")
            .output("n")
            .config("factor", Primitive::Float(2.0))
            .build(),
    ]);
    let (load, scale) = (ids[0], ids[1]);

    let (tx, rx) = mpsc::channel(16);
    let executor = real_backend(tx.clone(), 2);
    let presenter = RecordingPresenter::new();
    let seen = presenter.seen();

    trigger(&tx, load).await?;
    let runtime = Runtime::new(CoreRuntime::new(state, once()), rx, executor, presenter);
    let core = with_timeout(runtime.run()).await?;

    let scaled = core
        .state()
        .registry()
        .get(&DatasetKey::new(scale, "scaled"))
        .expect("scaled published");
    match scaled.value() {
        PortableValue::Table(t) => assert_eq!(t.values, vec![2.0, 4.0, 6.0, 8.0]),
        other => panic!("unexpected {other:?}"),
    }
    let n = core
        .state()
        .registry()
        .get(&DatasetKey::new(scale, "n"))
        .expect("n published");
    assert_eq!(n.value(), &PortableValue::Primitive(Primitive::Int(2)));

    let tools: Vec<_> = seen.lock().unwrap().iter().map(|p| p.tool_name.clone()).collect();
    assert_eq!(tools, vec!["load", "scale"]);
    Ok(())
}

#[tokio::test]
async fn real_executor_reports_script_failure() -> TestResult {
    init_tracing();

    let (state, ids) = session(vec![
        ToolSpecBuilder::new("bad")
            .body(r#"throw "no data";"#)
            .output("x")
            .build(),
    ]);

    let (tx, rx) = mpsc::channel(16);
    let executor = real_backend(tx.clone(), 0);

    trigger(&tx, ids[0]).await?;
    let runtime = Runtime::new(
        CoreRuntime::new(state, once()),
        rx,
        executor,
        RecordingPresenter::new(),
    );
    let core = with_timeout(runtime.run()).await?;

    match &core.state().tool(ids[0]).expect("tool").status {
        ToolStatus::Error(text) => assert!(text.contains("no data"), "{text}"),
        other => panic!("expected error status, got {other}"),
    }
    assert!(core.state().registry().list_all().is_empty());
    Ok(())
}

#[tokio::test]
async fn real_executor_runs_independent_roots() -> TestResult {
    init_tracing();

    let (state, ids) = session(
        (0..4)
            .map(|i| {
                ToolSpecBuilder::new(&format!("t{i}"))
                    .body(&format!("let v = {i};"))
                    .output("v")
                    .build()
            })
            .collect(),
    );

    let (tx, rx) = mpsc::channel(16);
    let executor = real_backend(tx.clone(), 1);

    for id in &ids {
        trigger(&tx, *id).await?;
    }
    let runtime = Runtime::new(
        CoreRuntime::new(state, once()),
        rx,
        executor,
        RecordingPresenter::new(),
    );
    let core = with_timeout(runtime.run()).await?;

    for (i, id) in ids.iter().enumerate() {
        let v = core
            .state()
            .registry()
            .get(&DatasetKey::new(*id, "v"))
            .expect("published");
        assert_eq!(v.value(), &PortableValue::Primitive(Primitive::Int(i as i64)));
    }
    Ok(())
}
