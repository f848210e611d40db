//! Field schemas of the permanent result tables.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sql::DataType;

/// The four result table shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// `achilles_results`
    Plain,
    /// `achilles_results_dist`
    Distributional,
    /// `achilles_results_derived`
    Derived,
    /// `achilles_heel_results`
    Heel,
}

impl ResultShape {
    pub const ALL: [ResultShape; 4] = [
        ResultShape::Plain,
        ResultShape::Distributional,
        ResultShape::Derived,
        ResultShape::Heel,
    ];

    /// Permanent table name in the results schema.
    pub fn table_name(&self) -> &'static str {
        match self {
            ResultShape::Plain => "achilles_results",
            ResultShape::Distributional => "achilles_results_dist",
            ResultShape::Derived => "achilles_results_derived",
            ResultShape::Heel => "achilles_heel_results",
        }
    }

    /// Resolve a table name back to its shape.
    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|shape| shape.table_name().eq_ignore_ascii_case(name))
    }

    /// Column subject to small-cell redaction, if the shape carries one.
    pub fn count_field(&self) -> Option<&'static str> {
        match self {
            ResultShape::Plain | ResultShape::Distributional => Some("count_value"),
            ResultShape::Derived | ResultShape::Heel => None,
        }
    }

    /// Built-in column list.
    pub fn default_fields(&self) -> Vec<Field> {
        let strata = |n: usize| (1..=n).map(|i| Field::new(format!("stratum_{}", i), DataType::Varchar(255)));
        let mut fields = Vec::new();
        match self {
            ResultShape::Plain => {
                fields.push(Field::new("analysis_id", DataType::Int32));
                fields.extend(strata(5));
                fields.push(Field::new("count_value", DataType::Int64));
            }
            ResultShape::Distributional => {
                fields.push(Field::new("analysis_id", DataType::Int32));
                fields.extend(strata(5));
                fields.push(Field::new("count_value", DataType::Int64));
                for stat in [
                    "min_value",
                    "max_value",
                    "avg_value",
                    "stdev_value",
                    "median_value",
                    "p10_value",
                    "p25_value",
                    "p75_value",
                    "p90_value",
                ] {
                    fields.push(Field::new(stat, DataType::Float64));
                }
            }
            ResultShape::Derived => {
                fields.push(Field::new("analysis_id", DataType::Int32));
                fields.extend(strata(2));
                fields.push(Field::new("statistic_value", DataType::Float64));
                fields.push(Field::new("measure_id", DataType::Varchar(255)));
            }
            ResultShape::Heel => {
                fields.push(Field::new("analysis_id", DataType::Int32));
                fields.push(Field::new("achilles_heel_warning", DataType::Varchar(255)));
                fields.push(Field::new("rule_id", DataType::Int32));
                fields.push(Field::new("record_count", DataType::Int64));
            }
        }
        fields
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// One `(FIELD_NAME, FIELD_TYPE)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered field lists for every shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchemas {
    plain: Vec<Field>,
    distributional: Vec<Field>,
    derived: Vec<Field>,
    heel: Vec<Field>,
}

impl Default for FieldSchemas {
    fn default() -> Self {
        Self {
            plain: ResultShape::Plain.default_fields(),
            distributional: ResultShape::Distributional.default_fields(),
            derived: ResultShape::Derived.default_fields(),
            heel: ResultShape::Heel.default_fields(),
        }
    }
}

impl FieldSchemas {
    pub fn fields(&self, shape: ResultShape) -> &[Field] {
        match shape {
            ResultShape::Plain => &self.plain,
            ResultShape::Distributional => &self.distributional,
            ResultShape::Derived => &self.derived,
            ResultShape::Heel => &self.heel,
        }
    }

    /// Replace the field list of one shape.
    pub fn set_fields(&mut self, shape: ResultShape, fields: Vec<Field>) {
        match shape {
            ResultShape::Plain => self.plain = fields,
            ResultShape::Distributional => self.distributional = fields,
            ResultShape::Derived => self.derived = fields,
            ResultShape::Heel => self.heel = fields,
        }
    }
}
