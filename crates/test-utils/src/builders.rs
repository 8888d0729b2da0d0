#![allow(dead_code)]

use std::collections::BTreeMap;

use toolflow::channel::{NumericArray, PortableValue, Primitive, Table};
use toolflow::config::{ConfigSection, ConfigValue, InputConfig, RawSessionFile, SessionFile, ToolConfig};
use toolflow::dag::ConsumerDefinition;
use toolflow::engine::{InputSpec, SourceRef, ToolSpec};

/// Builder for `ToolSpec` to simplify core-level test setup.
pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ToolSpec::new(name, ""),
        }
    }

    pub fn body(mut self, body: &str) -> Self {
        self.spec.body = body.to_string();
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.spec.outputs.push(name.to_string());
        self
    }

    /// Input with no explicit source.
    pub fn input(mut self, name: &str, definition: ConsumerDefinition) -> Self {
        self.spec.inputs.push(InputSpec {
            name: name.to_string(),
            definition,
            source: None,
        });
        self
    }

    /// Input bound to `tool.output`.
    pub fn input_from(mut self, name: &str, definition: ConsumerDefinition, source: &str) -> Self {
        let (tool, output) = source
            .split_once('.')
            .expect("source must look like tool.output");
        self.spec.inputs.push(InputSpec {
            name: name.to_string(),
            definition,
            source: Some(SourceRef {
                tool: tool.to_string(),
                output: output.to_string(),
            }),
        });
        self
    }

    pub fn config(mut self, key: &str, value: Primitive) -> Self {
        self.spec.config.insert(key.to_string(), value);
        self
    }

    pub fn auto_consume(mut self, val: bool) -> Self {
        self.spec.auto_consume = val;
        self
    }

    pub fn paused(mut self, val: bool) -> Self {
        self.spec.paused = val;
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }
}

/// Builder for `SessionFile` to simplify config-level test setup.
pub struct SessionFileBuilder {
    raw: RawSessionFile,
}

impl SessionFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawSessionFile {
                config: ConfigSection::default(),
                styles: BTreeMap::new(),
                tools: Vec::new(),
            },
        }
    }

    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.raw.tools.push(tool);
        self
    }

    pub fn with_style(mut self, class: &str, attr: &str, value: &str) -> Self {
        self.raw
            .styles
            .entry(class.to_string())
            .or_default()
            .insert(attr.to_string(), value.to_string());
        self
    }

    pub fn with_config(mut self, config: ConfigSection) -> Self {
        self.raw.config = config;
        self
    }

    pub fn build_raw(self) -> RawSessionFile {
        self.raw
    }

    pub fn build(self) -> SessionFile {
        SessionFile::try_from(self.raw).expect("Failed to build valid session from builder")
    }
}

impl Default for SessionFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ToolConfig`.
pub struct ToolConfigBuilder {
    tool: ToolConfig,
}

impl ToolConfigBuilder {
    pub fn new(name: &str, script: &str) -> Self {
        Self {
            tool: ToolConfig {
                name: name.to_string(),
                script: Some(script.to_string()),
                script_path: None,
                outputs: vec![],
                inputs: BTreeMap::new(),
                config: BTreeMap::new(),
                auto_consume: true,
                paused: false,
            },
        }
    }

    pub fn script_path(mut self, path: &str) -> Self {
        self.tool.script = None;
        self.tool.script_path = Some(path.into());
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.tool.outputs.push(name.to_string());
        self
    }

    pub fn input(mut self, name: &str, input: InputConfig) -> Self {
        self.tool.inputs.insert(name.to_string(), input);
        self
    }

    pub fn input_from(mut self, name: &str, source: &str) -> Self {
        self.tool.inputs.insert(
            name.to_string(),
            InputConfig {
                source: Some(source.to_string()),
                ..InputConfig::default()
            },
        );
        self
    }

    pub fn config(mut self, key: &str, value: ConfigValue) -> Self {
        self.tool.config.insert(key.to_string(), value);
        self
    }

    pub fn auto_consume(mut self, val: bool) -> Self {
        self.tool.auto_consume = val;
        self
    }

    pub fn paused(mut self, val: bool) -> Self {
        self.tool.paused = val;
        self
    }

    pub fn build(self) -> ToolConfig {
        self.tool
    }
}

/// Labelled table with `r0..` / `c0..` labels.
pub fn table(rows: Vec<Vec<f64>>) -> Table {
    let n_rows = rows.len();
    let n_cols = rows.first().map(Vec::len).unwrap_or(0);
    Table::new(
        rows,
        (0..n_rows).map(|i| format!("r{i}")).collect(),
        (0..n_cols).map(|i| format!("c{i}")).collect(),
    )
    .expect("rectangular rows")
}

pub fn table_value(rows: Vec<Vec<f64>>) -> PortableValue {
    PortableValue::Table(table(rows))
}

pub fn array_value(data: Vec<f64>) -> PortableValue {
    PortableValue::Array(NumericArray::from_vec(data))
}
