use std::cmp::Ordering;
use std::fmt;

use crate::schema::ColumnType;

/// A column value. `Str` covers both CHAR and VARCHAR columns; the owning
/// column type decides the wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored into a column of `col_type`.
    pub fn fits_column(&self, col_type: ColumnType) -> bool {
        match (self, col_type) {
            (Value::Null, _) => true,
            (Value::TinyInt(_), ColumnType::TinyInt) => true,
            (Value::SmallInt(_), ColumnType::SmallInt) => true,
            (Value::Int(_), ColumnType::Integer) => true,
            (Value::BigInt(_), ColumnType::BigInt) => true,
            (Value::Float(_), ColumnType::Float) => true,
            (Value::Double(_), ColumnType::Double) => true,
            (Value::Str(s), ColumnType::Char(n)) => s.len() <= n as usize,
            (Value::Str(s), ColumnType::Varchar(n)) => s.len() <= n as usize,
            _ => false,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::TinyInt(_) => 1,
            Value::SmallInt(_) => 2,
            Value::Int(_) => 3,
            Value::BigInt(_) => 4,
            Value::Float(_) => 5,
            Value::Double(_) => 6,
            Value::Str(_) => 7,
        }
    }

    /// Total order used by index keys: NULL sorts first, NaN last among
    /// floats. Values of different variants never meet inside one column;
    /// should they anyway, variant rank keeps the order total.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::TinyInt(a), Value::TinyInt(b)) => a.cmp(b),
            (Value::SmallInt(a), Value::SmallInt(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => total_float_cmp(*a as f64, *b as f64),
            (Value::Double(a), Value::Double(b)) => total_float_cmp(*a, *b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) => a.variant_rank().cmp(&b.variant_rank()),
        }
    }
}

fn total_float_cmp(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ord) => ord,
        None => match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => Ordering::Equal,
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "'{}'", s),
        }
    }
}
