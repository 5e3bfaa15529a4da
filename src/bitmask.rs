//! Bitmask codec for child selections
//!
//! A parent's selection is the set of its children's `ChildId`s packed into a
//! single unsigned arbitrary-precision integer: bit `i` is set when the child
//! with `ChildId == i` is selected.
//!
//! Grandparent tables do not agree on a physical width. Depending on how many
//! siblings a node has, its column may hold a 32-bit integer, a 64-bit integer
//! or a decimal string, so every read goes through [`normalize`] and every
//! write goes through [`StoredBitmask`].

use num_bigint::BigUint;
use rusqlite::types::{ToSql, ToSqlOutput, Value};

/// Bit position of a node inside its parent's bitmask
pub type ChildId = u32;

/// Highest bit count that still fits in a signed 64-bit column
pub const NATIVE_BITS: u64 = 63;

/// Pack a set of child ids into a bitmask. An empty set encodes to zero.
pub fn encode<I>(child_ids: I) -> BigUint
where
    I: IntoIterator<Item = ChildId>,
{
    let mut mask = BigUint::default();
    for id in child_ids {
        mask.set_bit(u64::from(id), true);
    }
    mask
}

/// Whether the child with `child_id` is selected in `bitmask`
pub fn test(bitmask: &BigUint, child_id: ChildId) -> bool {
    bitmask.bit(u64::from(child_id))
}

/// True when no child is selected
pub fn is_zero(bitmask: &BigUint) -> bool {
    bitmask.bits() == 0
}

/// Candidates whose `ChildId` bit is set, in candidate order
pub fn decode<'a, T, F>(
    bitmask: &'a BigUint,
    candidates: &'a [T],
    child_id: F,
) -> impl Iterator<Item = &'a T> + 'a
where
    F: Fn(&T) -> ChildId + 'a,
{
    candidates
        .iter()
        .filter(move |candidate| test(bitmask, child_id(candidate)))
}

/// Whether a mask with `bit_count` significant bits needs text storage
pub fn needs_text_storage(bit_count: u64) -> bool {
    bit_count > NATIVE_BITS
}

// =============================================================================
// Storage representations
// =============================================================================

/// A bitmask exactly as it came out of a selection table
#[derive(Debug, Clone, PartialEq)]
pub enum RawBitmask {
    /// SQL NULL, or no value at all
    Null,
    /// 32-bit column
    Narrow(i32),
    /// 64-bit column
    Wide(i64),
    /// Decimal text, used when the siblings outgrow native integers
    Decimal(String),
    /// Any other storage class (REAL, BLOB)
    Unsupported,
}

impl RawBitmask {
    pub fn is_null(&self) -> bool {
        matches!(self, RawBitmask::Null)
    }
}

impl From<Value> for RawBitmask {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RawBitmask::Null,
            Value::Integer(v) => RawBitmask::Wide(v),
            Value::Text(s) => RawBitmask::Decimal(s),
            Value::Real(_) | Value::Blob(_) => RawBitmask::Unsupported,
        }
    }
}

/// Turn any stored representation into a bitmask.
///
/// Total: null, unsupported and unparsable values all become zero. Negative
/// integers are read as the unsigned bit pattern of their declared width, so
/// a 32-bit column with bit 31 set still tests correctly.
pub fn normalize(raw: &RawBitmask) -> BigUint {
    match raw {
        RawBitmask::Null | RawBitmask::Unsupported => BigUint::default(),
        RawBitmask::Narrow(v) => BigUint::from(*v as u32),
        RawBitmask::Wide(v) => BigUint::from(*v as u64),
        RawBitmask::Decimal(s) => s.trim().parse::<BigUint>().unwrap_or_default(),
    }
}

/// A bitmask narrowed for binding into a selection table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBitmask {
    Integer(i64),
    Decimal(String),
}

impl From<&BigUint> for StoredBitmask {
    fn from(mask: &BigUint) -> Self {
        match i64::try_from(mask) {
            Ok(v) => StoredBitmask::Integer(v),
            Err(_) => StoredBitmask::Decimal(mask.to_string()),
        }
    }
}

impl ToSql for StoredBitmask {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            StoredBitmask::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            StoredBitmask::Decimal(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}
