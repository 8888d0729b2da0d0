// src/lib.rs

pub mod channel;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod present;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, OutputFormat};
use crate::config::loader::{base_dir_of, load_and_validate};
use crate::config::model::SessionFile;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, SessionState, TriggerReason};
use crate::errors::ToolflowError;
use crate::exec::{build_store, RealExecutorBackend, Worker};
use crate::present::{JsonLinesPresenter, LogPresenter, Presenter};
use crate::types::ToolId;
use crate::watch::WatchedScript;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - session loading and tool creation
/// - snapshot store, worker and executor pool
/// - presenter
/// - (optional) script watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let session_path = PathBuf::from(&args.session);
    let session = load_and_validate(&session_path)?;
    let base_dir = base_dir_of(&session_path);

    if args.dry_run {
        print_dry_run(&session, &base_dir);
        return Ok(());
    }

    // Tools in file order; explicit sources bind as their producers appear.
    let mut state = SessionState::new(session.styles.clone());
    let mut scripts = Vec::new();
    for tool in &session.tools {
        let id = state.add_tool(tool.to_spec(&base_dir)?)?;
        if let Some(path) = tool.resolved_script_path(&base_dir) {
            scripts.push(WatchedScript { tool: id, path });
        }
    }

    let initial = initial_triggers(&state, args.tool.as_deref())?;
    if args.once && initial.is_empty() {
        info!("nothing to run; exiting");
        return Ok(());
    }

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let cache_dir = base_dir.join(&session.config.cache_dir);
    let store = build_store(session.config.snapshot_storage, &cache_dir);
    let worker = Arc::new(Worker::new(store, session.config.max_operations));
    let executor = RealExecutorBackend::new(rt_tx.clone(), worker, session.config.max_workers);

    let presenter: Box<dyn Presenter> = match args.output {
        OutputFormat::Log => Box::new(LogPresenter),
        OutputFormat::Json => Box::new(JsonLinesPresenter::stdout()),
    };

    // Script watcher (disabled in --once mode).
    let _watcher_handle = if session.config.watch_scripts && !args.once && !scripts.is_empty() {
        Some(crate::watch::spawn_script_watcher(scripts, rt_tx.clone())?)
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    info!(tools = ?initial, "initial tools to trigger at startup");
    for tool in initial {
        rt_tx
            .send(RuntimeEvent::ToolTriggered {
                tool,
                reason: TriggerReason::Manual,
            })
            .await?;
    }

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };

    // Construct the pure core runtime (single source of truth for semantics).
    let core = CoreRuntime::new(state, options);

    // Construct the async IO shell around the core.
    let runtime = Runtime::new(core, rt_rx, executor, presenter);
    let core = runtime.run().await?;

    for tool in core.state().tools() {
        debug!(tool = %tool.id, name = %tool.name, status = %tool.status, "final tool status");
    }
    Ok(())
}

/// Tools to trigger at startup: the named one, or every tool without inputs.
pub fn initial_triggers(state: &SessionState, only: Option<&str>) -> Result<Vec<ToolId>> {
    match only {
        Some(name) => {
            let id = state
                .tool_id(name)
                .ok_or_else(|| ToolflowError::ToolNotFound(name.to_string()))?;
            Ok(vec![id])
        }
        None => Ok(state.roots()),
    }
}

/// Simple dry-run output: print tools, ports and explicit sources.
fn print_dry_run(session: &SessionFile, base_dir: &Path) {
    println!("toolflow dry-run");
    println!(
        "  config.snapshot_storage = {:?}",
        session.config.snapshot_storage
    );
    println!(
        "  config.cache_dir = {}",
        base_dir.join(&session.config.cache_dir).display()
    );
    println!("  config.max_workers = {}", session.config.max_workers);
    if !session.styles.classes.is_empty() {
        let classes: Vec<_> = session.styles.classes.keys().collect();
        println!("  styles: {classes:?}");
    }
    println!();

    println!("tools ({}):", session.tools.len());
    for tool in &session.tools {
        println!("  - {}", tool.name);
        match tool.resolved_script_path(base_dir) {
            Some(path) => println!("      script_path: {}", path.display()),
            None => println!("      script: inline"),
        }
        if !tool.outputs.is_empty() {
            println!("      outputs: {:?}", tool.outputs);
        }
        for (name, input) in &tool.inputs {
            match &input.source {
                Some(source) => println!("      input {name} <- {source}"),
                None if tool.auto_consume => println!("      input {name} <- (auto)"),
                None => println!("      input {name} <- (unbound)"),
            }
        }
        if !tool.config.is_empty() {
            let keys: Vec<_> = tool.config.keys().collect();
            println!("      config: {keys:?}");
        }
        if tool.paused {
            println!("      paused: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
