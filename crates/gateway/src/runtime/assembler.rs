//! Reassembles streamed function-call fragments into complete calls.
//!
//! Fragments arrive in order, keyed by the call's index within the run.
//! Nothing is parseable until the stream reaches a terminal event; then
//! [`ToolCallAssembler::finish`] hands back one [`RawToolCall`] per index,
//! the same representation a polled `requires_action` run yields.

use std::collections::BTreeMap;

use qd_domain::error::{Error, Result};
use qd_domain::stream::ToolCallDelta;
use qd_domain::tool::RawToolCall;

#[derive(Debug, Default)]
struct PartialCall {
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// One per run. Never shared across requests.
#[derive(Debug)]
pub struct ToolCallAssembler {
    registered: Vec<String>,
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    /// `registered` is the set of tool names declared on the run.
    pub fn new(registered: Vec<String>) -> Self {
        Self {
            registered,
            calls: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Apply one fragment.
    ///
    /// A fragment naming a different function, or carrying a different
    /// call id, than the call already at its index starts a new call and
    /// discards the old buffer. A fragment without a name continues the
    /// call at its index.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();

        let name = delta.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let call_id = delta.call_id.as_deref().filter(|id| !id.is_empty());

        let renamed = matches!((name, entry.name.as_deref()), (Some(new), Some(old)) if new != old);
        let new_id = matches!((call_id, entry.call_id.as_deref()), (Some(new), Some(old)) if new != old);
        if renamed || new_id {
            tracing::debug!(
                index = delta.index,
                discarded_bytes = entry.arguments.len(),
                "new tool call started at index, discarding previous buffer"
            );
            *entry = PartialCall::default();
        }

        if let Some(name) = name {
            entry.name = Some(name.to_string());
        }
        if let Some(id) = call_id {
            entry.call_id = Some(id.to_string());
        }
        if let Some(args) = &delta.arguments {
            entry.arguments.push_str(args);
        }
    }

    /// Close the table and return every call in index order.
    ///
    /// A call that never received a name takes the sole registered tool
    /// when exactly one is registered; otherwise this fails naming the
    /// call.
    pub fn finish(self) -> Result<Vec<RawToolCall>> {
        let sole_tool = match self.registered.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };

        self.calls
            .into_iter()
            .map(|(index, call)| {
                let call_id = call.call_id.unwrap_or_else(|| format!("call_{index}"));
                let tool_name = match call.name.or_else(|| sole_tool.clone()) {
                    Some(name) => name,
                    None => {
                        return Err(Error::Parse(format!(
                            "tool call {call_id} (index {index}) never named its function \
                             and {} tools are registered",
                            self.registered.len()
                        )))
                    }
                };
                Ok(RawToolCall {
                    call_id,
                    tool_name,
                    arguments: call.arguments,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, name: Option<&str>, args: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            call_id: None,
            name: name.map(String::from),
            arguments: Some(args.to_string()),
        }
    }

    fn single_tool() -> ToolCallAssembler {
        ToolCallAssembler::new(vec!["query_database".into()])
    }

    #[test]
    fn continuation_without_name_joins_previous_call() {
        let mut asm = single_tool();
        asm.push(&delta(0, Some("query_database"), "{\"sql\":"));
        asm.push(&delta(0, None, "\"SELECT 1\"}"));

        let calls = asm.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "query_database");
        assert_eq!(calls[0].arguments, "{\"sql\":\"SELECT 1\"}");

        let parsed = calls[0].parse().unwrap();
        assert_eq!(parsed.arguments["sql"], "SELECT 1");
    }

    #[test]
    fn new_name_at_same_index_discards_old_buffer() {
        let mut asm = ToolCallAssembler::new(vec!["query_database".into(), "describe".into()]);
        asm.push(&delta(0, Some("describe"), "{\"table\":\"deliv"));
        asm.push(&delta(0, Some("query_database"), "{\"sql\":\"SELECT 2\"}"));

        let calls = asm.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "query_database");
        assert_eq!(calls[0].arguments, "{\"sql\":\"SELECT 2\"}");
    }

    #[test]
    fn new_call_id_at_same_index_starts_fresh() {
        let mut asm = single_tool();
        asm.push(&ToolCallDelta {
            index: 0,
            call_id: Some("call_a".into()),
            name: Some("query_database".into()),
            arguments: Some("{\"sql\":\"SEL".into()),
        });
        asm.push(&ToolCallDelta {
            index: 0,
            call_id: Some("call_b".into()),
            name: Some("query_database".into()),
            arguments: Some("{}".into()),
        });

        let calls = asm.finish().unwrap();
        assert_eq!(calls[0].call_id, "call_b");
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn separate_indexes_do_not_mix() {
        let mut asm = single_tool();
        asm.push(&delta(0, Some("query_database"), "{\"sql\":\"SELECT 1\"}"));
        asm.push(&delta(1, Some("query_database"), "{\"sql\":"));
        asm.push(&delta(1, None, "\"SELECT 2\"}"));

        let calls = asm.finish().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, "{\"sql\":\"SELECT 1\"}");
        assert_eq!(calls[1].arguments, "{\"sql\":\"SELECT 2\"}");
        assert_eq!(calls[1].call_id, "call_1");
    }

    #[test]
    fn unnamed_call_defaults_to_sole_tool() {
        let mut asm = single_tool();
        asm.push(&delta(0, None, "{\"sql\":\"SELECT 1\"}"));
        let calls = asm.finish().unwrap();
        assert_eq!(calls[0].tool_name, "query_database");
    }

    #[test]
    fn unnamed_call_fails_with_several_tools() {
        let mut asm = ToolCallAssembler::new(vec!["query_database".into(), "describe".into()]);
        asm.push(&delta(0, None, "{}"));
        let err = asm.finish().unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("call_0"));
    }

    #[test]
    fn malformed_arguments_surface_on_parse() {
        let mut asm = single_tool();
        asm.push(&delta(0, Some("query_database"), "{\"sql\": SELECT"));
        let calls = asm.finish().unwrap();
        assert!(matches!(calls[0].parse(), Err(Error::Parse(_))));
    }
}
