// src/channel/value.rs

//! The closed set of value kinds that may cross the execution boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminant of a [`PortableValue`], used by consumer definitions to
/// declare which kinds an input accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Array,
    Table,
    Figure,
    Markup,
    Styles,
    Primitive,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Array => "array",
            ValueKind::Table => "table",
            ValueKind::Figure => "figure",
            ValueKind::Markup => "markup",
            ValueKind::Styles => "styles",
            ValueKind::Primitive => "primitive",
        };
        f.write_str(s)
    }
}

/// A value that the serialization channel knows how to transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PortableValue {
    Array(NumericArray),
    Table(Table),
    Figure(Figure),
    Markup(Markup),
    Styles(StyleSheet),
    Primitive(Primitive),
}

impl PortableValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PortableValue::Array(_) => ValueKind::Array,
            PortableValue::Table(_) => ValueKind::Table,
            PortableValue::Figure(_) => ValueKind::Figure,
            PortableValue::Markup(_) => ValueKind::Markup,
            PortableValue::Styles(_) => ValueKind::Styles,
            PortableValue::Primitive(_) => ValueKind::Primitive,
        }
    }

    /// Axis sizes. Non-tabular kinds are zero-dimensional.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            PortableValue::Array(a) => a.shape.clone(),
            PortableValue::Table(t) => vec![t.n_rows(), t.n_cols()],
            _ => Vec::new(),
        }
    }

    /// Entity tag per axis, aligned with [`PortableValue::shape`].
    pub fn entities(&self) -> Vec<Option<String>> {
        match self {
            PortableValue::Array(a) => vec![None; a.shape.len()],
            PortableValue::Table(t) => vec![t.row_entity.clone(), t.column_entity.clone()],
            _ => Vec::new(),
        }
    }

    /// Drop transient render state, if this is a figure.
    pub fn strip_render_cache(&mut self) {
        if let PortableValue::Figure(fig) = self {
            fig.strip_render_cache();
        }
    }
}

/// Small configuration-style values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "v", rename_all = "lowercase")]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Bool(b) => write!(f, "{b}"),
            Primitive::Int(i) => write!(f, "{i}"),
            Primitive::Float(x) => write!(f, "{x}"),
            Primitive::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Dense n-dimensional array of floats, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    pub shape: Vec<usize>,
    #[serde(with = "float_repr::seq")]
    pub data: Vec<f64>,
}

impl NumericArray {
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Build a 2-D array from rows. Fails if rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, String> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(format!(
                    "row {i} has {} values, expected {n_cols}",
                    row.len()
                ));
            }
            data.extend(row);
        }
        Ok(Self {
            shape: vec![n_rows, n_cols],
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `shape` accounts for exactly `data.len()` elements.
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }
}

/// A labeled 2-D table with optional entity tags on each axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    #[serde(default)]
    pub row_entity: Option<String>,
    #[serde(default)]
    pub column_entity: Option<String>,
    /// Row-major values, `row_labels.len() * column_labels.len()` long.
    #[serde(with = "float_repr::seq")]
    pub values: Vec<f64>,
}

impl Table {
    pub fn new(
        rows: Vec<Vec<f64>>,
        row_labels: Vec<String>,
        column_labels: Vec<String>,
    ) -> Result<Self, String> {
        if rows.len() != row_labels.len() {
            return Err(format!(
                "table has {} rows but {} row labels",
                rows.len(),
                row_labels.len()
            ));
        }
        let mut values = Vec::with_capacity(rows.len() * column_labels.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != column_labels.len() {
                return Err(format!(
                    "row {i} has {} values but there are {} column labels",
                    row.len(),
                    column_labels.len()
                ));
            }
            values.extend(row);
        }
        Ok(Self {
            row_labels,
            column_labels,
            row_entity: None,
            column_entity: None,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn n_cols(&self) -> usize {
        self.column_labels.len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.n_rows() || col >= self.n_cols() {
            return None;
        }
        self.values.get(row * self.n_cols() + col).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.n_rows() {
            return None;
        }
        let n = self.n_cols();
        Some(&self.values[row * n..(row + 1) * n])
    }

    pub fn column(&self, col: usize) -> Option<Vec<f64>> {
        if col >= self.n_cols() {
            return None;
        }
        Some(
            (0..self.n_rows())
                .map(|r| self.values[r * self.n_cols() + col])
                .collect(),
        )
    }

    pub fn transpose(&self) -> Table {
        let (rows, cols) = (self.n_rows(), self.n_cols());
        let mut values = Vec::with_capacity(self.values.len());
        for c in 0..cols {
            for r in 0..rows {
                values.push(self.values[r * cols + c]);
            }
        }
        Table {
            row_labels: self.column_labels.clone(),
            column_labels: self.row_labels.clone(),
            row_entity: self.column_entity.clone(),
            column_entity: self.row_entity.clone(),
            values,
        }
    }
}

/// One plotted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    #[serde(with = "float_repr::seq")]
    pub x: Vec<f64>,
    #[serde(with = "float_repr::seq")]
    pub y: Vec<f64>,
    #[serde(default)]
    pub style_class: Option<String>,
}

/// Backend state attached to a figure once it has been drawn. Never
/// transported.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCache {
    pub backend: String,
    pub raster: Vec<u8>,
}

/// A plot description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: String,
    pub series: Vec<Series>,
    #[serde(skip)]
    pub render_cache: Option<RenderCache>,
}

impl Figure {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            series: Vec::new(),
            render_cache: None,
        }
    }

    pub fn strip_render_cache(&mut self) {
        self.render_cache = None;
    }

    pub fn is_rendered(&self) -> bool {
        self.render_cache.is_some()
    }
}

// The render cache is transient and does not take part in equality.
impl PartialEq for Figure {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.series == other.series
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupFormat {
    Html,
    Svg,
}

/// Styled display object (HTML or SVG source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Markup {
    pub format: MarkupFormat,
    pub source: String,
}

/// Session-wide plot styles: class name -> attribute -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleSheet {
    pub classes: BTreeMap<String, BTreeMap<String, String>>,
}

impl StyleSheet {
    pub fn get(&self, class: &str, attr: &str) -> Option<&str> {
        self.classes
            .get(class)
            .and_then(|attrs| attrs.get(attr))
            .map(String::as_str)
    }

    pub fn set(&mut self, class: &str, attr: &str, value: impl Into<String>) {
        self.classes
            .entry(class.to_string())
            .or_default()
            .insert(attr.to_string(), value.into());
    }
}

/// JSON has no NaN/inf; non-finite floats are written as strings.
pub(crate) mod float_repr {
    use serde::de::{self, Deserializer};
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    fn to_repr(v: f64) -> Repr {
        if v.is_nan() {
            Repr::Special("nan".to_string())
        } else if v == f64::INFINITY {
            Repr::Special("inf".to_string())
        } else if v == f64::NEG_INFINITY {
            Repr::Special("-inf".to_string())
        } else {
            Repr::Finite(v)
        }
    }

    fn from_repr<E: de::Error>(r: Repr) -> Result<f64, E> {
        match r {
            Repr::Finite(v) => Ok(v),
            Repr::Special(s) => match s.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::custom(format!("invalid float literal {other:?}"))),
            },
        }
    }

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        to_repr(*v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        from_repr(Repr::deserialize(d)?)
    }

    pub mod seq {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
            let reprs: Vec<Repr> = v.iter().copied().map(to_repr).collect();
            reprs.serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
            Vec::<Repr>::deserialize(d)?
                .into_iter()
                .map(from_repr)
                .collect()
        }
    }
}
