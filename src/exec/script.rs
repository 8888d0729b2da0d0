// src/exec/script.rs

//! Rhai engine setup and conversions between Rhai values and portable values.
//!
//! ## Script API
//!
//! Constructors:
//! - `array([..])` / `matrix([[..], ..])` - numeric arrays
//! - `table(rows, row_labels, column_labels)` - labeled 2-D table
//! - `figure(title)` - empty plot
//! - `html(source)` / `svg(source)` - markup
//! - `style_sheet()` - empty style sheet
//!
//! Tables: `.n_rows`, `.n_cols`, `.row_labels`, `.column_labels`,
//! `.row_entity`, `.column_entity`, `.values`, `get(r, c)`, `row(r)`,
//! `column(c)`, `transpose()`, `scale(f)`, `add_column(label, values)`,
//! `with_entities(row_entity, column_entity)`.
//!
//! Arrays: `.shape`, `len()`, `get(i)`, `sum()`, `mean()`, `scale(f)`,
//! `to_array()`.
//!
//! Figures: `.title`, `add_series(label, x, y[, style_class])`, `render()`.
//!
//! Style sheets: `get(class, attr)`, `set(class, attr, value)`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT, Map};
use tracing::{debug, info};

use crate::channel::{
    Figure, Markup, MarkupFormat, NumericArray, PortableValue, Primitive, RenderCache, Series,
    StyleSheet, Table,
};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

fn script_error<T>(message: String) -> FnResult<T> {
    Err(message.into())
}

/// Build an engine with the script API registered.
///
/// `max_operations` of 0 leaves the engine unlimited.
pub fn build_engine(max_operations: u64) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(max_operations);
    engine.set_max_expr_depths(128, 64);

    engine.on_print(|text| info!(target: "toolflow::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "toolflow::script", ?source, %pos, "{text}");
    });

    register_arrays(&mut engine);
    register_tables(&mut engine);
    register_figures(&mut engine);
    register_markup(&mut engine);
    register_styles(&mut engine);

    engine
}

fn number(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

fn numbers(values: &Array, what: &str) -> FnResult<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match number(v) {
            Some(n) => Ok(n),
            None => script_error(format!("{what}[{i}] is a {}, not a number", v.type_name())),
        })
        .collect()
}

fn rows_of(values: &Array) -> FnResult<Vec<Vec<f64>>> {
    values
        .iter()
        .enumerate()
        .map(|(i, row)| {
            match row.clone().into_array() {
                Ok(row) => numbers(&row, &format!("row {i}")),
                Err(t) => script_error(format!("row {i} is a {t}, not an array")),
            }
        })
        .collect()
}

fn labels(values: &Array, what: &str) -> FnResult<Vec<String>> {
    values
        .iter()
        .map(|v| {
            if v.is_string() {
                Ok(v.to_string())
            } else if let Some(n) = number(v) {
                Ok(n.to_string())
            } else {
                script_error(format!(
                    "{what} must be strings or numbers, found {}",
                    v.type_name()
                ))
            }
        })
        .collect()
}

fn index(i: INT, len: usize, what: &str) -> FnResult<usize> {
    usize::try_from(i)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| format!("{what} index {i} out of bounds (len {len})").into())
}

fn float_array(values: impl IntoIterator<Item = f64>) -> Array {
    values.into_iter().map(Dynamic::from_float).collect()
}

fn string_array(values: &[String]) -> Array {
    values.iter().map(|s| Dynamic::from(s.clone())).collect()
}

fn optional_string(value: &Option<String>) -> Dynamic {
    value.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT)
}

fn register_arrays(engine: &mut Engine) {
    engine.register_type_with_name::<NumericArray>("NumericArray");

    engine.register_fn("array", |values: Array| -> FnResult<NumericArray> {
        Ok(NumericArray::from_vec(numbers(&values, "array")?))
    });
    engine.register_fn("matrix", |rows: Array| -> FnResult<NumericArray> {
        NumericArray::from_rows(rows_of(&rows)?).map_err(Into::into)
    });

    engine.register_get("shape", |a: &mut NumericArray| -> Array {
        a.shape.iter().map(|n| Dynamic::from_int(*n as INT)).collect()
    });
    engine.register_fn("len", |a: &mut NumericArray| a.len() as INT);
    engine.register_fn("get", |a: &mut NumericArray, i: INT| -> FnResult<FLOAT> {
        let i = index(i, a.len(), "array")?;
        Ok(a.data[i])
    });
    engine.register_fn("sum", |a: &mut NumericArray| a.data.iter().sum::<f64>());
    engine.register_fn("mean", |a: &mut NumericArray| {
        if a.is_empty() {
            f64::NAN
        } else {
            a.data.iter().sum::<f64>() / a.len() as f64
        }
    });
    engine.register_fn("scale", |a: &mut NumericArray, factor: FLOAT| scale_array(a, factor));
    engine.register_fn("scale", |a: &mut NumericArray, factor: INT| {
        scale_array(a, factor as f64)
    });
    engine.register_fn("to_array", |a: &mut NumericArray| float_array(a.data.iter().copied()));
}

fn scale_array(a: &NumericArray, factor: f64) -> NumericArray {
    NumericArray {
        shape: a.shape.clone(),
        data: a.data.iter().map(|v| v * factor).collect(),
    }
}

fn register_tables(engine: &mut Engine) {
    engine.register_type_with_name::<Table>("Table");

    engine.register_fn(
        "table",
        |rows: Array, row_labels: Array, column_labels: Array| -> FnResult<Table> {
            Table::new(
                rows_of(&rows)?,
                labels(&row_labels, "row labels")?,
                labels(&column_labels, "column labels")?,
            )
            .map_err(Into::into)
        },
    );

    engine.register_get("n_rows", |t: &mut Table| t.n_rows() as INT);
    engine.register_get("n_cols", |t: &mut Table| t.n_cols() as INT);
    engine.register_get("row_labels", |t: &mut Table| string_array(&t.row_labels));
    engine.register_get("column_labels", |t: &mut Table| string_array(&t.column_labels));
    engine.register_get("row_entity", |t: &mut Table| optional_string(&t.row_entity));
    engine.register_get("column_entity", |t: &mut Table| optional_string(&t.column_entity));
    engine.register_get("values", |t: &mut Table| -> Array {
        (0..t.n_rows())
            .filter_map(|r| t.row(r))
            .map(|row| Dynamic::from_array(float_array(row.iter().copied())))
            .collect()
    });

    engine.register_fn(
        "with_entities",
        |t: &mut Table, row_entity: &str, column_entity: &str| {
            let mut tagged = t.clone();
            tagged.row_entity = Some(row_entity.to_string()).filter(|s| !s.is_empty());
            tagged.column_entity = Some(column_entity.to_string()).filter(|s| !s.is_empty());
            tagged
        },
    );
    engine.register_fn("get", |t: &mut Table, r: INT, c: INT| -> FnResult<FLOAT> {
        let r = index(r, t.n_rows(), "row")?;
        let c = index(c, t.n_cols(), "column")?;
        t.get(r, c).ok_or_else(|| "cell out of bounds".into())
    });
    engine.register_fn("row", |t: &mut Table, r: INT| -> FnResult<Array> {
        let r = index(r, t.n_rows(), "row")?;
        Ok(float_array(t.row(r).unwrap_or_default().iter().copied()))
    });
    engine.register_fn("column", |t: &mut Table, c: INT| -> FnResult<Array> {
        let c = index(c, t.n_cols(), "column")?;
        Ok(float_array(t.column(c).unwrap_or_default()))
    });
    engine.register_fn("transpose", |t: &mut Table| t.transpose());
    engine.register_fn("scale", |t: &mut Table, factor: FLOAT| scale_table(t, factor));
    engine.register_fn("scale", |t: &mut Table, factor: INT| scale_table(t, factor as f64));
    engine.register_fn(
        "add_column",
        |t: &mut Table, label: &str, values: Array| -> FnResult<Table> {
            let column = numbers(&values, "column")?;
            if column.len() != t.n_rows() {
                return Err(format!(
                    "new column has {} values but the table has {} rows",
                    column.len(),
                    t.n_rows()
                )
                .into());
            }
            let rows: Vec<Vec<f64>> = (0..t.n_rows())
                .map(|r| {
                    let mut row = t.row(r).unwrap_or_default().to_vec();
                    row.push(column[r]);
                    row
                })
                .collect();
            let mut column_labels = t.column_labels.clone();
            column_labels.push(label.to_string());
            let mut extended = Table::new(rows, t.row_labels.clone(), column_labels)?;
            extended.row_entity = t.row_entity.clone();
            extended.column_entity = t.column_entity.clone();
            Ok(extended)
        },
    );
}

fn scale_table(t: &Table, factor: f64) -> Table {
    let mut scaled = t.clone();
    for v in &mut scaled.values {
        *v *= factor;
    }
    scaled
}

fn register_figures(engine: &mut Engine) {
    engine.register_type_with_name::<Figure>("Figure");

    engine.register_fn("figure", |title: &str| Figure::new(title));
    engine.register_get("title", |f: &mut Figure| f.title.clone());
    engine.register_get("is_rendered", |f: &mut Figure| f.is_rendered());

    engine.register_fn(
        "add_series",
        |f: &mut Figure, label: &str, x: Array, y: Array| -> FnResult<()> {
            add_series(f, label, &x, &y, None)
        },
    );
    engine.register_fn(
        "add_series",
        |f: &mut Figure, label: &str, x: Array, y: Array, class: &str| -> FnResult<()> {
            add_series(f, label, &x, &y, Some(class))
        },
    );
    engine.register_fn("render", |f: &mut Figure| {
        let svg = render_svg(f);
        f.render_cache = Some(RenderCache {
            backend: "svg".to_string(),
            raster: svg.into_bytes(),
        });
    });
}

fn add_series(
    figure: &mut Figure,
    label: &str,
    x: &Array,
    y: &Array,
    class: Option<&str>,
) -> FnResult<()> {
    let x = numbers(x, "x")?;
    let y = numbers(y, "y")?;
    if x.len() != y.len() {
        return Err(format!("series '{label}' has {} x values and {} y values", x.len(), y.len()).into());
    }
    figure.series.push(Series {
        label: label.to_string(),
        x,
        y,
        style_class: class.map(str::to_string),
    });
    Ok(())
}

/// Minimal SVG drawing of a figure's series as polylines.
pub fn render_svg(figure: &Figure) -> String {
    let points = figure.series.iter().flat_map(|s| s.x.iter().zip(&s.y));
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for (x, y) in points.filter(|(x, y)| x.is_finite() && y.is_finite()) {
        min_x = min_x.min(*x);
        max_x = max_x.max(*x);
        min_y = min_y.min(*y);
        max_y = max_y.max(*y);
    }
    let span_x = if max_x > min_x { max_x - min_x } else { 1.0 };
    let span_y = if max_y > min_y { max_y - min_y } else { 1.0 };

    let mut svg = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">"#);
    let _ = write!(svg, "<title>{}</title>", figure.title);
    for series in &figure.series {
        let coords: Vec<String> = series
            .x
            .iter()
            .zip(&series.y)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(x, y)| {
                let px = (x - min_x) / span_x * 100.0;
                let py = 100.0 - (y - min_y) / span_y * 100.0;
                format!("{px:.2},{py:.2}")
            })
            .collect();
        let class = series.style_class.as_deref().unwrap_or("default");
        let _ = write!(
            svg,
            r#"<polyline class="{class}" fill="none" points="{}"/>"#,
            coords.join(" ")
        );
    }
    svg.push_str("</svg>");
    svg
}

fn register_markup(engine: &mut Engine) {
    engine.register_type_with_name::<Markup>("Markup");

    engine.register_fn("html", |source: &str| Markup {
        format: MarkupFormat::Html,
        source: source.to_string(),
    });
    engine.register_fn("svg", |source: &str| Markup {
        format: MarkupFormat::Svg,
        source: source.to_string(),
    });
    engine.register_get("source", |m: &mut Markup| m.source.clone());
}

fn register_styles(engine: &mut Engine) {
    engine.register_type_with_name::<StyleSheet>("StyleSheet");

    engine.register_fn("style_sheet", StyleSheet::default);
    engine.register_fn("get", |s: &mut StyleSheet, class: &str, attr: &str| {
        s.get(class, attr)
            .map(|v| Dynamic::from(v.to_string()))
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn("set", |s: &mut StyleSheet, class: &str, attr: &str, value: &str| {
        s.set(class, attr, value);
    });
}

/// Expose a portable value to a script.
pub fn to_dynamic(value: &PortableValue) -> Dynamic {
    match value {
        PortableValue::Array(a) => Dynamic::from(a.clone()),
        PortableValue::Table(t) => Dynamic::from(t.clone()),
        PortableValue::Figure(f) => Dynamic::from(f.clone()),
        PortableValue::Markup(m) => Dynamic::from(m.clone()),
        PortableValue::Styles(s) => Dynamic::from(s.clone()),
        PortableValue::Primitive(p) => primitive_to_dynamic(p),
    }
}

pub fn primitive_to_dynamic(value: &Primitive) -> Dynamic {
    match value {
        Primitive::Bool(b) => Dynamic::from_bool(*b),
        Primitive::Int(i) => Dynamic::from_int(*i),
        Primitive::Float(f) => Dynamic::from_float(*f),
        Primitive::Text(s) => Dynamic::from(s.clone()),
    }
}

/// Convert a script value back to a portable value.
///
/// Returns `None` for anything the channel cannot transport (maps, closures,
/// unit, ragged or non-numeric arrays, ...).
pub fn from_dynamic(value: &Dynamic) -> Option<PortableValue> {
    let value = value.flatten_clone();

    if value.is::<NumericArray>() {
        return value.try_cast::<NumericArray>().map(PortableValue::Array);
    }
    if value.is::<Table>() {
        return value.try_cast::<Table>().map(PortableValue::Table);
    }
    if value.is::<Figure>() {
        return value.try_cast::<Figure>().map(PortableValue::Figure);
    }
    if value.is::<Markup>() {
        return value.try_cast::<Markup>().map(PortableValue::Markup);
    }
    if value.is::<StyleSheet>() {
        return value.try_cast::<StyleSheet>().map(PortableValue::Styles);
    }

    if let Ok(b) = value.as_bool() {
        return Some(PortableValue::Primitive(Primitive::Bool(b)));
    }
    if let Ok(i) = value.as_int() {
        return Some(PortableValue::Primitive(Primitive::Int(i)));
    }
    if let Ok(f) = value.as_float() {
        return Some(PortableValue::Primitive(Primitive::Float(f)));
    }
    if value.is_string() {
        return value
            .into_string()
            .ok()
            .map(|s| PortableValue::Primitive(Primitive::Text(s)));
    }
    if value.is_array() {
        let items = value.into_array().ok()?;
        return numeric_array_from(&items).map(PortableValue::Array);
    }

    None
}

/// Plain script arrays: a flat list of numbers becomes 1-D, a list of equally
/// long numeric lists becomes 2-D.
fn numeric_array_from(items: &Array) -> Option<NumericArray> {
    if items.iter().all(|v| number(v).is_some()) {
        return Some(NumericArray::from_vec(
            items.iter().filter_map(number).collect(),
        ));
    }

    let rows: Option<Vec<Vec<f64>>> = items
        .iter()
        .map(|row| {
            let row = row.clone().into_array().ok()?;
            row.iter().map(number).collect()
        })
        .collect();
    NumericArray::from_rows(rows?).ok()
}

/// Configuration values as a script map.
pub fn config_map(config: &BTreeMap<String, Primitive>) -> Map {
    config
        .iter()
        .map(|(k, v)| (k.as_str().into(), primitive_to_dynamic(v)))
        .collect()
}
