//! Sequence generator models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Schema-qualified sequence name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceName {
    pub schema: String,
    pub name: String,
}

impl SequenceName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `"schema"."name"` form, suitable for a `::regclass` cast
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl std::fmt::Display for SequenceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A table column that consumes a sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct ColumnRef {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
}

impl ColumnRef {
    pub fn new(
        table_schema: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) -> Self {
        Self {
            table_schema: table_schema.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }

    /// Quoted `"schema"."table"` form
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.table_schema),
            quote_ident(&self.table_name)
        )
    }

    /// Quoted column identifier
    pub fn quoted_column(&self) -> String {
        quote_ident(&self.column_name)
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table_name, self.column_name)
    }
}

/// Row of `pg_sequences`
///
/// `last_value` is NULL for a sequence that has never been called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SequenceLastValue {
    #[sqlx(rename = "schemaname")]
    pub schema: String,

    #[sqlx(rename = "sequencename")]
    pub name: String,

    pub last_value: Option<i64>,
}

impl SequenceLastValue {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, last_value: Option<i64>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            last_value,
        }
    }

    pub fn sequence(&self) -> SequenceName {
        SequenceName::new(self.schema.clone(), self.name.clone())
    }
}

/// Comparison of one sequence across blue and green
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSnapshot {
    /// The sequence on the source (blue) side
    pub sequence: SequenceName,

    /// Column fed by the sequence
    pub column: ColumnRef,

    /// Last value issued by the blue sequence
    pub blue_last_value: Option<i64>,

    /// Highest value present in the blue column
    pub largest_blue: Option<i64>,

    /// Highest value present in the green column
    pub largest_green: Option<i64>,
}

impl SequenceSnapshot {
    /// Describe the invariant violation, if any
    ///
    /// Green must never hold a value the blue sequence has not issued yet.
    pub fn violation(&self) -> Option<String> {
        let green = self.largest_green?;
        let blue_last = self.blue_last_value.unwrap_or(0);
        if green > blue_last {
            Some(format!(
                "Green {} has larger value than blue sequence {}: {} > {}",
                self.column, self.sequence, green, blue_last
            ))
        } else {
            None
        }
    }
}
