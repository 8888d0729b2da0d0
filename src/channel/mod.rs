// src/channel/mod.rs

//! Serialization channel between the control thread and workers.
//!
//! - [`value`] defines the closed [`PortableValue`] type.
//! - [`codec`] turns a [`Variables`] mapping into a checksummed blob and back.

pub mod codec;
pub mod value;

pub use codec::{decode, encode, Variables};
pub use value::{
    Figure, Markup, MarkupFormat, NumericArray, PortableValue, Primitive, RenderCache, Series,
    StyleSheet, Table, ValueKind,
};
