//! The `query_database` tool: its declaration for the model and its
//! dispatch through the Query Guard to the executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use qd_database::{QueryExecutor, QueryGuard};
use qd_domain::config::ToolArgumentForm;
use qd_domain::error::{Error, Result};
use qd_domain::query::{QueryRequest, QueryResult, Scalar};
use qd_domain::tool::{ToolCall, ToolDefinition};

pub const QUERY_TOOL: &str = "query_database";

/// Scalar-only JSON Schema for one parameter value.
fn scalar_schema() -> Value {
    json!({
        "anyOf": [
            { "type": "string" },
            { "type": "number" },
            { "type": "boolean" },
            { "type": "null" }
        ]
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tools offered to the model on every run.
pub struct ToolSet {
    form: ToolArgumentForm,
    guard: QueryGuard,
    executor: Arc<dyn QueryExecutor>,
    max_rows: usize,
}

impl ToolSet {
    pub fn new(
        form: ToolArgumentForm,
        guard: QueryGuard,
        executor: Arc<dyn QueryExecutor>,
        max_rows: usize,
    ) -> Self {
        Self {
            form,
            guard,
            executor,
            max_rows,
        }
    }

    pub fn form(&self) -> ToolArgumentForm {
        self.form
    }

    pub fn names(&self) -> Vec<String> {
        vec![QUERY_TOOL.to_string()]
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let (description, parameters) = match self.form {
            ToolArgumentForm::Named => (
                "Executes a parameterized SQL query against the database. \
                 Use :param placeholders and pass their values in `parameters`.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "SQL statement with :param placeholders (e.g. WHERE customer_id = :customerId)"
                        },
                        "parameters": {
                            "type": "object",
                            "description": "Values for the :param placeholders, keyed by name",
                            "patternProperties": { "^[a-zA-Z0-9_]+$": scalar_schema() }
                        }
                    },
                    "required": ["query", "parameters"],
                    "additionalProperties": false
                }),
            ),
            ToolArgumentForm::Positional => (
                "Executes a SQL query with $1, $2, ... placeholders plus parameter values.",
                json!({
                    "type": "object",
                    "properties": {
                        "sql": {
                            "type": "string",
                            "description": "SQL statement with placeholders ($1, $2, etc.)"
                        },
                        "values": {
                            "type": "array",
                            "items": scalar_schema(),
                            "description": "Values for $1, $2, etc., in order"
                        }
                    },
                    "required": ["sql", "values"],
                    "additionalProperties": false
                }),
            ),
        };

        vec![ToolDefinition {
            name: QUERY_TOOL.into(),
            description: description.into(),
            parameters,
        }]
    }

    /// Turn a call's arguments into a statement request.
    pub fn prepare(&self, call: &ToolCall) -> Result<QueryRequest> {
        if call.tool_name != QUERY_TOOL {
            return Err(Error::Validation(format!("unknown tool: {}", call.tool_name)));
        }
        parse_arguments(self.form, &call.arguments)
    }

    /// Guard, execute, and cap the result for the model.
    pub async fn run(&self, request: &QueryRequest) -> Result<QueryResult> {
        self.guard.validate(&request.statement)?;
        let result = self.executor.execute(request).await?;
        Ok(result.cap_rows(self.max_rows))
    }
}

#[derive(Deserialize)]
struct NamedArgs {
    query: String,
    #[serde(default)]
    parameters: Option<BTreeMap<String, Scalar>>,
}

#[derive(Deserialize)]
struct PositionalArgs {
    sql: String,
    #[serde(default)]
    values: Option<Vec<Scalar>>,
}

fn parse_arguments(form: ToolArgumentForm, arguments: &Value) -> Result<QueryRequest> {
    let bad = |e: serde_json::Error| Error::Parse(format!("{QUERY_TOOL} arguments: {e}"));
    let request = match form {
        ToolArgumentForm::Named => {
            let args: NamedArgs = serde_json::from_value(arguments.clone()).map_err(bad)?;
            QueryRequest::named(args.query, args.parameters.unwrap_or_default())
        }
        ToolArgumentForm::Positional => {
            let args: PositionalArgs = serde_json::from_value(arguments.clone()).map_err(bad)?;
            QueryRequest::positional(args.sql, args.values.unwrap_or_default())
        }
    };
    if request.statement.trim().is_empty() {
        return Err(Error::Validation("empty SQL statement".into()));
    }
    Ok(request)
}

/// Text submitted back to the run for one call.
pub fn render_output(outcome: &Result<QueryResult>) -> String {
    match outcome {
        Ok(result) => serde_json::to_string(result)
            .unwrap_or_else(|e| json!({ "error": "ParseError", "details": e.to_string() }).to_string()),
        Err(e) => json!({ "error": e.kind(), "details": e.to_string() }).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qd_domain::config::GuardMode;
    use qd_domain::query::{ColumnMeta, QueryParams};

    struct CountingExecutor {
        calls: parking_lot::Mutex<Vec<QueryRequest>>,
    }

    #[async_trait::async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
            self.calls.lock().push(request.clone());
            let rows = (0..5)
                .map(|i| {
                    let mut row = serde_json::Map::new();
                    row.insert("n".into(), json!(i));
                    row
                })
                .collect();
            Ok(QueryResult {
                columns: vec![ColumnMeta {
                    name: "n".into(),
                    type_name: "int4".into(),
                }],
                rows,
                row_count: 5,
                truncated: false,
            })
        }
    }

    fn tool_set(form: ToolArgumentForm, mode: GuardMode) -> (ToolSet, Arc<CountingExecutor>) {
        let exec = Arc::new(CountingExecutor {
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        (ToolSet::new(form, QueryGuard::new(mode), exec.clone(), 3), exec)
    }

    fn call(arguments: Value) -> ToolCall {
        ToolCall {
            call_id: "call_1".into(),
            tool_name: QUERY_TOOL.into(),
            arguments,
        }
    }

    #[test]
    fn definitions_follow_form() {
        let (named, _) = tool_set(ToolArgumentForm::Named, GuardMode::Keyword);
        let def = &named.definitions()[0];
        assert_eq!(def.name, "query_database");
        assert_eq!(def.parameters["required"], json!(["query", "parameters"]));

        let (positional, _) = tool_set(ToolArgumentForm::Positional, GuardMode::Keyword);
        let def = &positional.definitions()[0];
        assert_eq!(def.parameters["required"], json!(["sql", "values"]));
    }

    #[test]
    fn named_arguments_parse() {
        let (tools, _) = tool_set(ToolArgumentForm::Named, GuardMode::Keyword);
        let req = tools
            .prepare(&call(json!({
                "query": "SELECT * FROM deliveries WHERE status = :status",
                "parameters": { "status": "pending" }
            })))
            .unwrap();
        match req.params {
            QueryParams::Named(map) => assert_eq!(map["status"], Scalar::Text("pending".into())),
            other => panic!("expected named params, got {other:?}"),
        }
    }

    #[test]
    fn positional_arguments_parse_with_null_values() {
        let (tools, _) = tool_set(ToolArgumentForm::Positional, GuardMode::Keyword);
        let req = tools
            .prepare(&call(json!({ "sql": "SELECT 1", "values": null })))
            .unwrap();
        assert_eq!(req.params, QueryParams::Positional(vec![]));
    }

    #[test]
    fn non_scalar_parameter_is_parse_error() {
        let (tools, _) = tool_set(ToolArgumentForm::Named, GuardMode::Keyword);
        let err = tools
            .prepare(&call(json!({ "query": "SELECT :a", "parameters": { "a": [1, 2] } })))
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let (tools, _) = tool_set(ToolArgumentForm::Named, GuardMode::Keyword);
        let mut c = call(json!({}));
        c.tool_name = "exec".into();
        assert!(matches!(tools.prepare(&c), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn guard_rejects_before_executor_runs() {
        let (tools, exec) = tool_set(ToolArgumentForm::Named, GuardMode::Keyword);
        let req = QueryRequest::named("DELETE FROM deliveries", BTreeMap::new());
        let err = tools.run(&req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn results_are_capped() {
        let (tools, exec) = tool_set(ToolArgumentForm::Named, GuardMode::Off);
        let req = QueryRequest::named("SELECT n FROM generate_series(0, 4) n", BTreeMap::new());
        let result = tools.run(&req).await.unwrap();
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.row_count, 5);
        assert!(result.truncated);
        assert_eq!(exec.calls.lock().len(), 1);
    }

    #[test]
    fn error_output_carries_kind_and_details() {
        let out = render_output(&Err(Error::database("SELECT x", "column \"x\" does not exist")));
        let json: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["error"], "DatabaseError");
        assert!(json["details"].as_str().unwrap().contains("does not exist"));
    }
}
