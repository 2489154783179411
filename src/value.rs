//! Column values, and the [`TupleSource`] interface that [`crate::block::Block::insert`]
//! pulls values from.
//!
//! This plays the role `nanodb`'s `expressions::Literal` + `storage::Tuple`
//! pair plays in the parent codebase: a small value enum, and a trait any
//! tuple-shaped thing can implement so the block engine doesn't care whether
//! it's reading from an in-memory literal or from another block.

use std::fmt;

/// A single column value. `Null` is represented out-of-band via the tuple's
/// null bitmap, so it has no variant here; [`TupleSource::is_null`] is
/// consulted before [`TupleSource::get`] is ever called for a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A 1-byte signed integer.
    TinyInt(i8),
    /// A 2-byte signed integer.
    SmallInt(i16),
    /// A 4-byte signed integer.
    Integer(i32),
    /// An 8-byte signed integer.
    BigInt(i64),
    /// A 4-byte floating-point number.
    Float(f32),
    /// An 8-byte floating-point number.
    Double(f64),
    /// A fixed- or variable-length character sequence.
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

/// A read-only view over a tuple's columns, source-agnostic so that
/// [`crate::block::Block::insert`] can pull from an in-memory [`TupleLiteral`]
/// just as easily as from a cursor into another resident block.
pub trait TupleSource {
    /// The number of columns in this tuple. Must match the destination
    /// schema's column count.
    fn column_count(&self) -> usize;

    /// Whether column `index` is `NULL`.
    fn is_null(&self, index: usize) -> bool;

    /// The value of column `index`. Only called when `is_null(index)` is
    /// false.
    fn get(&self, index: usize) -> Value;
}

/// A tuple whose values live entirely in memory, independent of any block.
/// Used to build test data and to hand literal rows to
/// [`crate::block::Block::insert`].
#[derive(Debug, Clone, PartialEq)]
pub struct TupleLiteral {
    values: Vec<Option<Value>>,
}

impl TupleLiteral {
    /// An empty tuple literal with no columns.
    pub fn new() -> TupleLiteral {
        TupleLiteral { values: Vec::new() }
    }

    /// Appends a non-`NULL` value to the end of the tuple.
    pub fn push(&mut self, value: Value) {
        self.values.push(Some(value));
    }

    /// Appends a `NULL` to the end of the tuple.
    pub fn push_null(&mut self) {
        self.values.push(None);
    }

    /// Builds a tuple literal from an owned list of optional values, where
    /// `None` represents `NULL`.
    pub fn from_values(values: Vec<Option<Value>>) -> TupleLiteral {
        TupleLiteral { values }
    }

    /// Copies every column out of another [`TupleSource`] into a new,
    /// independent literal.
    pub fn from_source<T: TupleSource + ?Sized>(tuple: &T) -> TupleLiteral {
        let mut values = Vec::with_capacity(tuple.column_count());
        for i in 0..tuple.column_count() {
            if tuple.is_null(i) {
                values.push(None);
            } else {
                values.push(Some(tuple.get(i)));
            }
        }
        TupleLiteral { values }
    }
}

impl Default for TupleLiteral {
    fn default() -> Self {
        TupleLiteral::new()
    }
}

impl TupleSource for TupleLiteral {
    fn column_count(&self) -> usize {
        self.values.len()
    }

    fn is_null(&self, index: usize) -> bool {
        self.values[index].is_none()
    }

    fn get(&self, index: usize) -> Value {
        self.values[index].clone().expect("get() called on a NULL column")
    }
}

impl fmt::Display for TupleLiteral {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Some(v) => write!(f, "{}", v)?,
                None => write!(f, "NULL")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_source_round_trips_nulls_and_values() {
        let mut original = TupleLiteral::new();
        original.push(Value::Integer(7));
        original.push_null();
        original.push(Value::Str("hi".into()));

        let copy = TupleLiteral::from_source(&original);
        assert_eq!(copy, original);
    }
}
