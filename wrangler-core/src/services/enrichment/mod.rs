//! Enrichment engine: derives enriched rows from source rows.
//!
//! Each `(column, function)` entry of an [`EnrichmentSpec`] adds two output
//! columns to every derived row:
//!
//! - `<column>_enriched_<function>`: normalized TEXT value or NULL
//! - `<column>_enriched_<function>_valid`: INTEGER 1 on success, 0 otherwise
//!
//! Field failures never abort a row. They are counted and, up to a limit,
//! reported as diagnostics.

mod functions;

pub use functions::{EnrichmentFunction, FieldOutcome};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EnrichmentConfig;
use crate::errors::{SchemaError, SchemaResult};
use crate::table::{sanitize_identifier, ColumnDefinition, FieldValue, Row, StoredRow};

/// Diagnostics kept per enrichment run; failures beyond this are only counted
pub const MAX_DIAGNOSTICS: usize = 50;

/// One `(source column, function)` pair
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    pub column: String,
    pub function: EnrichmentFunction,
}

impl EnrichmentEntry {
    pub fn new(column: impl Into<String>, function: EnrichmentFunction) -> Self {
        Self {
            column: column.into(),
            function,
        }
    }

    pub fn output_column(&self) -> String {
        format!(
            "{}_enriched_{}",
            sanitize_identifier(&self.column),
            self.function.id()
        )
    }

    pub fn validity_column(&self) -> String {
        format!("{}_valid", self.output_column())
    }
}

/// Ordered list of enrichment entries
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentSpec {
    entries: Vec<EnrichmentEntry>,
}

impl EnrichmentSpec {
    pub fn new(entries: Vec<EnrichmentEntry>) -> SchemaResult<Self> {
        if entries.is_empty() {
            return Err(SchemaError::InvalidEnrichmentSpec(
                "at least one enrichment is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.column.trim().is_empty() {
                return Err(SchemaError::InvalidEnrichmentSpec(
                    "enrichment column name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(entry.output_column()) {
                return Err(SchemaError::InvalidEnrichmentSpec(format!(
                    "'{}' with '{}' is listed more than once",
                    entry.column, entry.function
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Build a spec from `(column, function id)` pairs as entered by a user
    pub fn parse<C, F>(pairs: impl IntoIterator<Item = (C, F)>) -> SchemaResult<Self>
    where
        C: Into<String>,
        F: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .map(|(column, function)| {
                let id = function.as_ref();
                EnrichmentFunction::from_id(id)
                    .map(|f| EnrichmentEntry::new(column, f))
                    .ok_or_else(|| SchemaError::UnknownEnrichmentFunction(id.to_string()))
            })
            .collect::<SchemaResult<Vec<_>>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[EnrichmentEntry] {
        &self.entries
    }

    /// Output column definitions in spec order
    pub fn output_columns(&self) -> Vec<ColumnDefinition> {
        self.entries
            .iter()
            .flat_map(|entry| {
                [
                    ColumnDefinition::text(entry.output_column()),
                    ColumnDefinition::integer(entry.validity_column()),
                ]
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

/// A derived row with the identity of the source row it was computed from
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedRow {
    pub source_row_uuid: String,
    pub values: Row,
}

/// A malformed input reported for observability
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDiagnostic {
    pub row_index: usize,
    pub column: String,
    pub function: EnrichmentFunction,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub rows: usize,
    pub fields_total: usize,
    pub fields_succeeded: usize,
    /// Non-empty inputs that could not be parsed
    pub fields_malformed: usize,
    /// NULL or blank inputs
    pub fields_empty: usize,
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl EnrichmentStats {
    /// Share of enriched fields whose input was malformed
    pub fn malformed_ratio(&self) -> f64 {
        if self.fields_total == 0 {
            0.0
        } else {
            self.fields_malformed as f64 / self.fields_total as f64
        }
    }

    fn record(&mut self, row_index: usize, entry: &EnrichmentEntry, outcome: &FieldOutcome) {
        self.fields_total += 1;
        if outcome.succeeded {
            self.fields_succeeded += 1;
            return;
        }
        match &outcome.diagnostic {
            Some(message) => {
                self.fields_malformed += 1;
                if self.diagnostics.len() < MAX_DIAGNOSTICS {
                    self.diagnostics.push(FieldDiagnostic {
                        row_index,
                        column: entry.column.clone(),
                        function: entry.function,
                        message: message.clone(),
                    });
                }
            }
            None => self.fields_empty += 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EnrichmentOutput {
    pub rows: Vec<EnrichedRow>,
    pub stats: EnrichmentStats,
}

/// Applies enrichment specifications to source rows
#[derive(Clone, Debug, Default)]
pub struct EnrichmentEngine {
    config: EnrichmentConfig,
}

impl EnrichmentEngine {
    pub fn new(config: EnrichmentConfig) -> Self {
        Self { config }
    }

    /// Spec columns that are absent from the given source columns
    pub fn validate(spec: &EnrichmentSpec, source_columns: &[ColumnDefinition]) -> Vec<String> {
        let mut missing = Vec::new();
        for entry in spec.entries() {
            let present = source_columns.iter().any(|c| c.name == entry.column);
            if !present && !missing.contains(&entry.column) {
                missing.push(entry.column.clone());
            }
        }
        missing
    }

    /// Enrich every source row, preserving order. Source columns are copied in
    /// `source_columns` order, followed by the output groups in spec order.
    pub fn enrich(
        &self,
        source_rows: &[StoredRow],
        source_columns: &[ColumnDefinition],
        spec: &EnrichmentSpec,
    ) -> EnrichmentOutput {
        let mut stats = EnrichmentStats {
            rows: source_rows.len(),
            ..Default::default()
        };
        let mut rows = Vec::with_capacity(source_rows.len());

        for (row_index, source) in source_rows.iter().enumerate() {
            let mut values = Row::with_capacity(source_columns.len() + spec.entries().len() * 2);
            for column in source_columns {
                let value = source
                    .values
                    .get(&column.name)
                    .cloned()
                    .unwrap_or(FieldValue::Null);
                values.insert(column.name.clone(), value);
            }

            for entry in spec.entries() {
                let input = source
                    .values
                    .get(&entry.column)
                    .unwrap_or(&FieldValue::Null);
                let outcome = entry.function.apply(input, &self.config);
                stats.record(row_index, entry, &outcome);

                values.insert(entry.output_column(), FieldValue::from(outcome.value));
                values.insert(
                    entry.validity_column(),
                    FieldValue::Integer(i64::from(outcome.succeeded)),
                );
            }

            rows.push(EnrichedRow {
                source_row_uuid: source.row_uuid.clone(),
                values,
            });
        }

        debug!(
            "Enriched {} rows: {} fields, {} succeeded, {} malformed, {} empty",
            stats.rows,
            stats.fields_total,
            stats.fields_succeeded,
            stats.fields_malformed,
            stats.fields_empty
        );

        EnrichmentOutput { rows, stats }
    }
}
