// src/present.rs

//! Presentation boundary.
//!
//! The core never draws anything. After a successful run (or a view-only
//! recalculation) it hands the tool's displayable outputs to a
//! [`Presenter`] as tagged [`RenderPayload`]s.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;
use tracing::{info, warn};

use crate::channel::{PortableValue, Variables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Figure,
    Table,
    Markup,
}

/// A displayable output, tagged with how to show it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPayload {
    pub kind: RenderKind,
    pub value: PortableValue,
}

impl RenderPayload {
    /// `None` for kinds that have no visual form (arrays, primitives, styles).
    pub fn from_value(value: &PortableValue) -> Option<Self> {
        let kind = match value {
            PortableValue::Figure(_) => RenderKind::Figure,
            PortableValue::Table(_) => RenderKind::Table,
            PortableValue::Markup(_) => RenderKind::Markup,
            _ => return None,
        };
        Some(Self {
            kind,
            value: value.clone(),
        })
    }
}

/// Displayable subset of a tool's outputs.
pub fn render_payloads(outputs: &Variables) -> BTreeMap<String, RenderPayload> {
    outputs
        .iter()
        .filter_map(|(name, value)| RenderPayload::from_value(value).map(|p| (name.clone(), p)))
        .collect()
}

/// Receives render payloads from the runtime.
pub trait Presenter: Send {
    fn present(&mut self, tool_name: &str, payloads: BTreeMap<String, RenderPayload>);
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn present(&mut self, tool_name: &str, payloads: BTreeMap<String, RenderPayload>) {
        (**self).present(tool_name, payloads);
    }
}

/// Summarises payloads as log events.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn present(&mut self, tool_name: &str, payloads: BTreeMap<String, RenderPayload>) {
        for (name, payload) in payloads {
            match &payload.value {
                PortableValue::Figure(fig) => info!(
                    tool_name,
                    output = %name,
                    title = %fig.title,
                    series = fig.series.len(),
                    "figure"
                ),
                PortableValue::Table(table) => info!(
                    tool_name,
                    output = %name,
                    rows = table.n_rows(),
                    cols = table.n_cols(),
                    row_entity = ?table.row_entity,
                    column_entity = ?table.column_entity,
                    "table"
                ),
                PortableValue::Markup(markup) => info!(
                    tool_name,
                    output = %name,
                    format = ?markup.format,
                    bytes = markup.source.len(),
                    "markup"
                ),
                other => info!(tool_name, output = %name, kind = %other.kind(), "output"),
            }
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    tool: &'a str,
    output: &'a str,
    #[serde(flatten)]
    payload: &'a RenderPayload,
}

/// Writes one JSON object per payload to the given writer (stdout by
/// default).
pub struct JsonLinesPresenter<W: Write + Send> {
    out: W,
}

impl JsonLinesPresenter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> JsonLinesPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Presenter for JsonLinesPresenter<W> {
    fn present(&mut self, tool_name: &str, payloads: BTreeMap<String, RenderPayload>) {
        for (name, payload) in &payloads {
            let line = JsonLine {
                tool: tool_name,
                output: name,
                payload,
            };
            let written = serde_json::to_writer(&mut self.out, &line)
                .map_err(std::io::Error::from)
                .and_then(|()| self.out.write_all(b"\n"))
                .and_then(|()| self.out.flush());
            if let Err(err) = written {
                warn!(tool_name, output = %name, error = %err, "failed to write render payload");
            }
        }
    }
}
