// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{parse_source, RawSessionFile, SessionFile};
use crate::errors::{Result, ToolflowError};
use crate::exec::namespace::{CONFIG, STYLES};

impl TryFrom<RawSessionFile> for SessionFile {
    type Error = ToolflowError;

    fn try_from(raw: RawSessionFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_session(&raw)?;
        Ok(SessionFile::new_unchecked(raw))
    }
}

fn validate_raw_session(cfg: &RawSessionFile) -> Result<()> {
    ensure_has_tools(cfg)?;
    validate_tool_names(cfg)?;
    validate_ports(cfg)?;
    validate_sources(cfg)?;
    validate_binding_graph(cfg)?;
    Ok(())
}

fn ensure_has_tools(cfg: &RawSessionFile) -> Result<()> {
    if cfg.tools.is_empty() {
        return Err(ToolflowError::ConfigError(
            "session must contain at least one [[tool]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_tool_names(cfg: &RawSessionFile) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in &cfg.tools {
        if tool.name.is_empty() || tool.name.contains('.') {
            return Err(ToolflowError::ConfigError(format!(
                "invalid tool name '{}' (must be non-empty and contain no '.')",
                tool.name
            )));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(ToolflowError::ConfigError(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
        match (&tool.script, &tool.script_path) {
            (Some(_), Some(_)) => {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}' sets both `script` and `script_path`",
                    tool.name
                )));
            }
            (None, None) => {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}' needs `script` or `script_path`",
                    tool.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_port_name(tool: &str, kind: &str, name: &str) -> Result<()> {
    if !is_identifier(name) {
        return Err(ToolflowError::ConfigError(format!(
            "tool '{tool}': {kind} '{name}' is not a valid identifier"
        )));
    }
    if name == CONFIG || name == STYLES {
        return Err(ToolflowError::ConfigError(format!(
            "tool '{tool}': {kind} name '{name}' is reserved"
        )));
    }
    Ok(())
}

fn validate_ports(cfg: &RawSessionFile) -> Result<()> {
    for tool in &cfg.tools {
        let mut outputs = HashSet::new();
        for output in &tool.outputs {
            check_port_name(&tool.name, "output", output)?;
            if !outputs.insert(output.as_str()) {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}' declares output '{output}' twice",
                    tool.name
                )));
            }
        }

        for (name, input) in &tool.inputs {
            check_port_name(&tool.name, "input", name)?;
            if outputs.contains(name.as_str()) {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}': '{name}' is both an input and an output",
                    tool.name
                )));
            }
            if let Some(ndim) = input.ndim {
                if !input.shape.is_empty() && input.shape.len() != ndim {
                    return Err(ToolflowError::ConfigError(format!(
                        "tool '{}': input '{name}' has ndim = {ndim} but a {}-axis shape",
                        tool.name,
                        input.shape.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_sources(cfg: &RawSessionFile) -> Result<()> {
    for tool in &cfg.tools {
        for (name, input) in &tool.inputs {
            let Some(raw) = &input.source else {
                continue;
            };
            let source = parse_source(raw).ok_or_else(|| {
                ToolflowError::ConfigError(format!(
                    "tool '{}': input '{name}' source '{raw}' is not of the form \"tool.output\"",
                    tool.name
                ))
            })?;

            if source.tool == tool.name {
                return Err(ToolflowError::BindingCycle(format!(
                    "tool '{}' cannot consume its own output '{}'",
                    tool.name, source.output
                )));
            }

            let Some(producer) = cfg.tools.iter().find(|t| t.name == source.tool) else {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}': input '{name}' refers to unknown tool '{}'",
                    tool.name, source.tool
                )));
            };
            if !producer.outputs.contains(&source.output) {
                return Err(ToolflowError::ConfigError(format!(
                    "tool '{}': input '{name}' refers to undeclared output '{source}'",
                    tool.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_binding_graph(cfg: &RawSessionFile) -> Result<()> {
    // Edge direction follows the data: for
    //   [tool.inputs.x]
    //   source = "A.out"
    // on tool B we add A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for tool in &cfg.tools {
        graph.add_node(tool.name.as_str());
    }

    for tool in &cfg.tools {
        for input in tool.inputs.values() {
            if let Some(source) = input.source.as_deref().and_then(|s| s.split_once('.')) {
                graph.add_edge(source.0, tool.name.as_str(), ());
            }
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(ToolflowError::BindingCycle(format!(
            "cycle detected in tool bindings involving tool '{}'",
            cycle.node_id()
        ))),
    }
}
