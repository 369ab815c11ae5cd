//! Table schemas: column types, key constraints, and their header-page
//! encoding.

pub mod stats;

use std::io::Read;

use crate::error::{StorageError, StorageResult};
use crate::io::{ByteWriter, Decodeable, Encodeable};

/// SQL column types supported by the tuple codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Char(u16),
    Varchar(u16),
}

impl ColumnType {
    pub fn type_code(&self) -> u8 {
        match self {
            ColumnType::TinyInt => 1,
            ColumnType::SmallInt => 2,
            ColumnType::Integer => 3,
            ColumnType::BigInt => 4,
            ColumnType::Float => 5,
            ColumnType::Double => 6,
            ColumnType::Char(_) => 7,
            ColumnType::Varchar(_) => 8,
        }
    }

    /// On-disk size of a non-null value, or `None` when it depends on the
    /// value (VARCHAR).
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ColumnType::TinyInt => Some(1),
            ColumnType::SmallInt => Some(2),
            ColumnType::Integer | ColumnType::Float => Some(4),
            ColumnType::BigInt | ColumnType::Double => Some(8),
            ColumnType::Char(n) => Some(*n as usize),
            ColumnType::Varchar(_) => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ColumnType::Char(_) | ColumnType::Varchar(_))
    }
}

impl Encodeable for ColumnType {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&self.type_code());
        match self {
            ColumnType::Char(n) | ColumnType::Varchar(n) => w.write(n),
            _ => {}
        }
        w.into_bytes()
    }
}

impl Decodeable for ColumnType {
    fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self> {
        let code = u8::decode_from(reader)?;
        Ok(match code {
            1 => ColumnType::TinyInt,
            2 => ColumnType::SmallInt,
            3 => ColumnType::Integer,
            4 => ColumnType::BigInt,
            5 => ColumnType::Float,
            6 => ColumnType::Double,
            7 => ColumnType::Char(u16::decode_from(reader)?),
            8 => ColumnType::Varchar(u16::decode_from(reader)?),
            other => {
                return Err(StorageError::schema(format!(
                    "unsupported column type code {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub col_type: ColumnType,
}

impl ColumnInfo {
    pub fn new<S: Into<String>>(name: S, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

const CONSTRAINT_PRIMARY: u8 = 1;
const CONSTRAINT_CANDIDATE: u8 = 2;
const CONSTRAINT_FOREIGN: u8 = 3;
/// High bit of the constraint type code: a constraint name follows.
const CONSTRAINT_NAMED: u8 = 0x80;

/// Key constraints persisted alongside the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyConstraint {
    PrimaryKey {
        name: Option<String>,
        columns: Vec<u8>,
        /// Name of the index file that enforces the key.
        index_name: String,
    },
    CandidateKey {
        name: Option<String>,
        columns: Vec<u8>,
        index_name: String,
    },
    ForeignKey {
        name: Option<String>,
        columns: Vec<u8>,
        ref_table: String,
        ref_columns: Vec<u8>,
    },
}

impl KeyConstraint {
    pub fn columns(&self) -> &[u8] {
        match self {
            KeyConstraint::PrimaryKey { columns, .. }
            | KeyConstraint::CandidateKey { columns, .. }
            | KeyConstraint::ForeignKey { columns, .. } => columns,
        }
    }
}

impl Encodeable for KeyConstraint {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();

        let (code, name) = match self {
            KeyConstraint::PrimaryKey { name, .. } => (CONSTRAINT_PRIMARY, name),
            KeyConstraint::CandidateKey { name, .. } => (CONSTRAINT_CANDIDATE, name),
            KeyConstraint::ForeignKey { name, .. } => (CONSTRAINT_FOREIGN, name),
        };
        let flagged = if name.is_some() {
            code | CONSTRAINT_NAMED
        } else {
            code
        };
        w.write(&flagged);
        if let Some(n) = name {
            w.write(n);
        }

        match self {
            KeyConstraint::PrimaryKey {
                columns,
                index_name,
                ..
            }
            | KeyConstraint::CandidateKey {
                columns,
                index_name,
                ..
            } => {
                w.write(&(columns.len() as u8));
                w.write_bytes(columns);
                w.write(index_name);
            }
            KeyConstraint::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                ..
            } => {
                w.write(&(columns.len() as u8));
                w.write_bytes(columns);
                w.write(ref_table);
                w.write_bytes(ref_columns);
            }
        }
        w.into_bytes()
    }
}

impl Decodeable for KeyConstraint {
    fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self> {
        let flagged = u8::decode_from(reader)?;
        let name = if flagged & CONSTRAINT_NAMED != 0 {
            Some(String::decode_from(reader)?)
        } else {
            None
        };

        match flagged & !CONSTRAINT_NAMED {
            CONSTRAINT_PRIMARY | CONSTRAINT_CANDIDATE => {
                let count = u8::decode_from(reader)? as usize;
                let columns = crate::io::read_exact(reader, count)?;
                let index_name = String::decode_from(reader)?;
                Ok(if flagged & !CONSTRAINT_NAMED == CONSTRAINT_PRIMARY {
                    KeyConstraint::PrimaryKey {
                        name,
                        columns,
                        index_name,
                    }
                } else {
                    KeyConstraint::CandidateKey {
                        name,
                        columns,
                        index_name,
                    }
                })
            }
            CONSTRAINT_FOREIGN => {
                let count = u8::decode_from(reader)? as usize;
                let columns = crate::io::read_exact(reader, count)?;
                let ref_table = String::decode_from(reader)?;
                let ref_columns = crate::io::read_exact(reader, count)?;
                Ok(KeyConstraint::ForeignKey {
                    name,
                    columns,
                    ref_table,
                    ref_columns,
                })
            }
            other => Err(StorageError::schema(format!(
                "unknown constraint type code {}",
                other
            ))),
        }
    }
}

/// A table's column list plus key constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
    constraints: Vec<KeyConstraint>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnInfo>) -> StorageResult<Self> {
        if columns.is_empty() {
            return Err(StorageError::schema("a table needs at least one column"));
        }
        if columns.len() > u8::MAX as usize {
            return Err(StorageError::schema(format!(
                "too many columns: {}",
                columns.len()
            )));
        }
        for (i, a) in columns.iter().enumerate() {
            for b in &columns[i + 1..] {
                if a.name == b.name {
                    return Err(StorageError::schema(format!(
                        "duplicate column {}",
                        a.name
                    )));
                }
            }
        }
        Ok(Self {
            columns,
            constraints: Vec::new(),
        })
    }

    pub fn with_constraints(
        columns: Vec<ColumnInfo>,
        constraints: Vec<KeyConstraint>,
    ) -> StorageResult<Self> {
        let mut schema = Self::new(columns)?;
        for c in &constraints {
            for &col in c.columns() {
                if col as usize >= schema.columns.len() {
                    return Err(StorageError::schema(format!(
                        "constraint references column {} of {}",
                        col,
                        schema.columns.len()
                    )));
                }
            }
        }
        schema.constraints = constraints;
        Ok(schema)
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn constraints(&self) -> &[KeyConstraint] {
        &self.constraints
    }

    pub fn column_index(&self, name: &str) -> StorageResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StorageError::schema(format!("no column named {}", name)))
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    /// Columns of the primary key, if one was declared.
    pub fn primary_key_columns(&self) -> Option<&[u8]> {
        self.constraints.iter().find_map(|c| match c {
            KeyConstraint::PrimaryKey { columns, .. } => Some(columns.as_slice()),
            _ => None,
        })
    }
}

impl Encodeable for Schema {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&(self.columns.len() as u8));
        for col in &self.columns {
            w.write(&col.col_type);
            w.write(&col.name);
        }
        w.write(&(self.constraints.len() as u8));
        for c in &self.constraints {
            w.write(c);
        }
        w.into_bytes()
    }
}

impl Decodeable for Schema {
    fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self> {
        let num_columns = u8::decode_from(reader)? as usize;
        let mut columns = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            let col_type = ColumnType::decode_from(reader)?;
            let name = String::decode_from(reader)?;
            columns.push(ColumnInfo { name, col_type });
        }
        let num_constraints = u8::decode_from(reader)? as usize;
        let mut constraints = Vec::with_capacity(num_constraints);
        for _ in 0..num_constraints {
            constraints.push(KeyConstraint::decode_from(reader)?);
        }
        Schema::with_constraints(columns, constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_schema() -> Schema {
        Schema::with_constraints(
            vec![
                ColumnInfo::new("id", ColumnType::Integer),
                ColumnInfo::new("name", ColumnType::Varchar(32)),
                ColumnInfo::new("grade", ColumnType::Char(2)),
                ColumnInfo::new("gpa", ColumnType::Double),
            ],
            vec![
                KeyConstraint::PrimaryKey {
                    name: None,
                    columns: vec![0],
                    index_name: "t_pk.idx".to_string(),
                },
                KeyConstraint::ForeignKey {
                    name: Some("fk_grade".to_string()),
                    columns: vec![2],
                    ref_table: "grades".to_string(),
                    ref_columns: vec![0],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn schema_round_trips() {
        let schema = sample_schema();
        let bytes = schema.encode();
        let mut r = Cursor::new(bytes);
        assert_eq!(Schema::decode_from(&mut r).unwrap(), schema);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let result = Schema::new(vec![
            ColumnInfo::new("a", ColumnType::Integer),
            ColumnInfo::new("a", ColumnType::BigInt),
        ]);
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
    }

    #[test]
    fn column_lookup_by_name() {
        let schema = sample_schema();
        assert_eq!(schema.column_index("gpa").unwrap(), 3);
        assert!(schema.column_index("salary").is_err());
        assert_eq!(schema.primary_key_columns(), Some(&[0u8][..]));
    }
}
