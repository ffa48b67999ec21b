//! Schema description handed to the model as run instructions.
//!
//! Descriptive only: nothing here is enforced against the database.

use std::fmt::Write as _;
use std::path::Path;

use qd_domain::config::ToolArgumentForm;
use qd_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Short name used in instructions, e.g. "delivery management".
    #[serde(default = "d_description")]
    pub description: String,
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    /// Allowed values for status-like columns.
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

fn d_description() -> String {
    "application".into()
}

// ── builders for the built-in schema ────────────────────────────────

fn col(name: &str, sql_type: &str) -> ColumnSchema {
    ColumnSchema {
        name: name.into(),
        sql_type: sql_type.into(),
        primary: false,
        required: false,
        unique: false,
        enum_values: Vec::new(),
        references: None,
    }
}

impl ColumnSchema {
    fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
    fn required(mut self) -> Self {
        self.required = true;
        self
    }
    fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
    fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
    fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

const TSTZ: &str = "TIMESTAMP WITH TIME ZONE";

impl DatabaseSchema {
    /// The delivery management schema: customers, drivers, deliveries.
    pub fn deliveries() -> Self {
        Self {
            description: "delivery management".into(),
            tables: vec![
                TableSchema {
                    name: "customers".into(),
                    columns: vec![
                        col("customer_id", "UUID").primary(),
                        col("name", "VARCHAR(100)").required(),
                        col("email", "VARCHAR(255)").required().unique(),
                        col("phone", "VARCHAR(20)"),
                        col("address", "TEXT").required(),
                        col("created_at", TSTZ),
                    ],
                },
                TableSchema {
                    name: "drivers".into(),
                    columns: vec![
                        col("driver_id", "UUID").primary(),
                        col("name", "VARCHAR(100)").required(),
                        col("email", "VARCHAR(255)").required().unique(),
                        col("phone", "VARCHAR(20)").required(),
                        col("vehicle_type", "VARCHAR(50)"),
                        col("license_number", "VARCHAR(50)").required(),
                        col("status", "VARCHAR(20)").one_of(&["available", "busy", "offline"]),
                        col("created_at", TSTZ),
                    ],
                },
                TableSchema {
                    name: "deliveries".into(),
                    columns: vec![
                        col("delivery_id", "UUID").primary(),
                        col("customer_id", "UUID")
                            .required()
                            .references("customers", "customer_id"),
                        col("driver_id", "UUID").references("drivers", "driver_id"),
                        col("pickup_address", "TEXT").required(),
                        col("delivery_address", "TEXT").required(),
                        col("status", "VARCHAR(20)").one_of(&[
                            "pending",
                            "assigned",
                            "picked_up",
                            "in_transit",
                            "delivered",
                            "cancelled",
                        ]),
                        col("created_at", TSTZ),
                        col("pickup_time", TSTZ),
                        col("delivered_time", TSTZ),
                        col("package_description", "TEXT"),
                        col("delivery_notes", "TEXT"),
                    ],
                },
            ],
        }
    }

    /// Load a schema from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let schema: Self = if is_json {
            serde_json::from_str(&text)?
        } else {
            toml::from_str(&text)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        };
        if schema.tables.is_empty() {
            return Err(Error::Config(format!("{}: schema has no tables", path.display())));
        }
        Ok(schema)
    }

    /// Load from `path` when given, else the built-in schema.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::deliveries()),
        }
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Plain-text rendering, one column per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "TABLE {}", table.name);
            for c in &table.columns {
                let _ = write!(out, "  {} {}", c.name, c.sql_type);
                if c.primary {
                    out.push_str(" PRIMARY KEY");
                }
                if c.required {
                    out.push_str(" NOT NULL");
                }
                if c.unique {
                    out.push_str(" UNIQUE");
                }
                if let Some(fk) = &c.references {
                    let _ = write!(out, " REFERENCES {}({})", fk.table, fk.column);
                }
                if !c.enum_values.is_empty() {
                    let _ = write!(out, " -- one of: {}", c.enum_values.join(", "));
                }
                out.push('\n');
            }
        }
        out
    }

    /// Run instructions: the schema plus query-writing rules for the
    /// configured tool argument form.
    pub fn instructions(&self, form: ToolArgumentForm, extra: Option<&str>) -> String {
        let mut out = format!(
            "You have access to a {} database with the following schema:\n\n{}\n",
            self.description,
            self.describe()
        );

        out.push_str("When using the query_database function:\n");
        match form {
            ToolArgumentForm::Named => {
                out.push_str(
                    "1. Always use parameterized queries with :param syntax and pass values in `parameters`\n",
                );
            }
            ToolArgumentForm::Positional => {
                out.push_str(
                    "1. Always use parameterized queries with $1, $2, ... placeholders and pass values in `values`\n",
                );
            }
        }
        out.push_str(
            "2. Include proper JOIN conditions when querying across tables\n\
             3. Handle NULL values appropriately\n\
             4. Use appropriate WHERE clauses and ORDER BY when needed\n\
             5. Never concatenate user input directly into queries\n\
             6. Only read data; statements that modify data are rejected\n\n",
        );

        let status_filter = match form {
            ToolArgumentForm::Named => "d.status = :status",
            ToolArgumentForm::Positional => "d.status = $1",
        };
        let _ = write!(
            out,
            "Example:\n  SELECT d.*, c.name AS customer_name FROM deliveries d \
             JOIN customers c ON d.customer_id = c.customer_id WHERE {status_filter}\n\n\
             Output final answers in plain text."
        );

        if let Some(extra) = extra.filter(|e| !e.trim().is_empty()) {
            out.push_str("\n\n");
            out.push_str(extra.trim());
        }
        out
    }
}
