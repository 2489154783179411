//! Schema descriptors: the immutable, shared description of a tuple's shape.
//!
//! A [`Schema`] tells a [`crate::block::Block`] how wide each tuple is, which
//! columns are stored inline, and which are stored by reference to the
//! block's non-inlined region. Blocks borrow a schema (via `Arc`) rather than
//! owning one; a schema outlives every block built against it.

use std::fmt;

/// The fixed-width encoding of a string ref: an 8-byte address field followed
/// by a 4-byte length field. See [`crate::block`] module docs for how the
/// address field is interpreted during relocation.
pub const STRING_REF_SIZE: u16 = 12;

/// The type of a single column in a tuple.
///
/// This is a deliberately small subset of a full SQL type system: just
/// enough to exercise fixed-width inline storage, fixed-width non-numeric
/// inline storage (`Char`), and out-of-line variable-width storage
/// (`VarChar`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// A 1-byte signed integer.
    TinyInt,
    /// A 2-byte signed integer.
    SmallInt,
    /// A 4-byte signed integer.
    Integer,
    /// An 8-byte signed integer.
    BigInt,
    /// A 4-byte floating-point number.
    Float,
    /// An 8-byte floating-point number.
    Double,
    /// A fixed-length character sequence, stored inline.
    Char {
        /// The number of bytes reserved for the string.
        length: u16,
    },
    /// A variable-length character sequence, stored out-of-line in the
    /// block's non-inlined region and referenced inline by a string ref.
    VarChar {
        /// The maximum number of bytes the value may occupy.
        max_length: u32,
    },
}

impl ColumnType {
    /// Returns true if values of this type are stored inline in the tuple
    /// body (as opposed to via a string ref into the non-inlined region).
    pub fn is_inline(&self) -> bool {
        !matches!(self, ColumnType::VarChar { .. })
    }

    /// The number of bytes this column occupies in the tuple's inline body.
    /// For `VarChar` this is the size of the string ref, not of the value.
    pub fn inline_width(&self) -> u16 {
        match *self {
            ColumnType::TinyInt => 1,
            ColumnType::SmallInt => 2,
            ColumnType::Integer => 4,
            ColumnType::BigInt => 8,
            ColumnType::Float => 4,
            ColumnType::Double => 8,
            ColumnType::Char { length } => length,
            ColumnType::VarChar { .. } => STRING_REF_SIZE,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ColumnType::Char { length } => write!(f, "CHAR({})", length),
            ColumnType::VarChar { max_length } => write!(f, "VARCHAR({})", max_length),
            _ => write!(f, "{}", format!("{:?}", self).to_uppercase()),
        }
    }
}

/// Basic information about a single column: its name and its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// The column's name, for diagnostics only; the block engine addresses
    /// columns purely by index.
    pub name: String,
    /// The column's type.
    pub column_type: ColumnType,
}

impl ColumnInfo {
    /// Construct a new column descriptor.
    pub fn new<S: Into<String>>(name: S, column_type: ColumnType) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            column_type,
        }
    }
}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.column_type)
    }
}

/// Computes the number of bytes used to store the null-bitmap for a tuple
/// with `num_cols` columns: one bit per column, rounded up to a byte.
pub fn null_flags_size(num_cols: usize) -> u16 {
    if num_cols > 0 {
        1 + (num_cols as u16 - 1) / 8
    } else {
        0
    }
}

/// Immutable description of a tuple's shape: column count, types, and which
/// columns are non-inlined. Schemas are cheap to clone and are meant to be
/// shared (via `Arc`) across every block built against them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
    /// Byte offset of each column's inline field, relative to the start of
    /// the tuple's inline body (i.e. *after* the status byte and null
    /// bitmap). Cached at construction time since it's read on every insert
    /// and every value lookup.
    offsets: Vec<u16>,
    body_length: u16,
}

impl Schema {
    /// Build a schema from an ordered list of columns.
    pub fn new(columns: Vec<ColumnInfo>) -> Schema {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut cur = 0u16;
        for col in &columns {
            offsets.push(cur);
            cur += col.column_type.inline_width();
        }
        Schema {
            columns,
            offsets,
            body_length: cur,
        }
    }

    /// The number of columns in the schema.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The column descriptor at `index`.
    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    /// Iterator over the schema's columns in order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter()
    }

    /// Byte offset of column `index`'s inline field, relative to the start
    /// of the inline body (past the status byte and null bitmap).
    pub fn column_offset(&self, index: usize) -> u16 {
        self.offsets[index]
    }

    /// The size, in bytes, of the null-bitmap prefix for this schema.
    pub fn null_flags_size(&self) -> u16 {
        null_flags_size(self.columns.len())
    }

    /// The total length of a tuple's fixed body, *excluding* the leading
    /// status byte: null bitmap plus every column's inline field. This is
    /// `L` in the spec's "L+1 bytes per tuple" accounting.
    pub fn tuple_body_length(&self) -> u16 {
        self.null_flags_size() + self.body_length
    }

    /// The total length of a stored tuple, including the leading status
    /// byte. This is the fixed stride between tuples in a block's inline
    /// region.
    pub fn tuple_length(&self) -> u16 {
        1 + self.tuple_body_length()
    }

    /// Iterator over `(column_index, inline_offset)` for every column whose
    /// storage is a string ref into the non-inlined region. The offset is
    /// relative to the start of the inline body (past status byte + null
    /// bitmap), matching [`Schema::column_offset`].
    pub fn non_inline_columns(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.column_type.is_inline())
            .map(move |(i, _)| (i, self.offsets[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("name", ColumnType::VarChar { max_length: 255 }),
            ColumnInfo::new("score", ColumnType::Double),
        ])
    }

    #[test]
    fn tuple_length_accounts_for_status_byte_nulls_and_fields() {
        let schema = sample_schema();
        // null bitmap: 1 byte for 3 columns
        // body: 4 (int) + 12 (string ref) + 8 (double) = 24
        // total: 1 (status) + 1 (nulls) + 24 = 26
        assert_eq!(schema.tuple_length(), 26);
    }

    #[test]
    fn column_offsets_are_packed_in_declaration_order() {
        let schema = sample_schema();
        assert_eq!(schema.column_offset(0), 0);
        assert_eq!(schema.column_offset(1), 4);
        assert_eq!(schema.column_offset(2), 4 + 12);
    }

    #[test]
    fn non_inline_columns_reports_only_varchar() {
        let schema = sample_schema();
        let non_inline: Vec<_> = schema.non_inline_columns().collect();
        assert_eq!(non_inline, vec![(1, 4)]);
    }

    #[test]
    fn null_flags_size_rounds_up_to_a_byte() {
        assert_eq!(null_flags_size(0), 0);
        assert_eq!(null_flags_size(1), 1);
        assert_eq!(null_flags_size(8), 1);
        assert_eq!(null_flags_size(9), 2);
        assert_eq!(null_flags_size(16), 2);
        assert_eq!(null_flags_size(17), 3);
    }
}
