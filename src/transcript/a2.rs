//! Part-based architecture: a single JSON document with
//! `messages: [{info, parts[]}]`.
//!
//! A `tool` part named `task` whose state carries a nested session id is
//! the one place this converter produces both a block on the calling
//! thread AND a brand new sub-thread, recursively parsed from the part's
//! embedded summary — subagent threads never nest further than this one
//! level.

use serde_json::Value;

use super::{
    synth_id, ConversationBlock, ParsedTranscript, SubagentThread, SystemSubtype, ToolStatus,
    TranscriptEnvelope,
};

pub fn parse(envelope: &TranscriptEnvelope) -> ParsedTranscript {
    let doc: Value = match serde_json::from_str(&envelope.main) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed a2 envelope");
            return ParsedTranscript::default();
        }
    };
    let Some(messages) = doc.get("messages").and_then(Value::as_array) else {
        tracing::warn!("a2 envelope missing messages array");
        return ParsedTranscript::default();
    };

    let mut blocks = Vec::new();
    let mut subagents: Vec<SubagentThread> = Vec::new();
    for (msg_idx, message) in messages.iter().enumerate() {
        convert_message(message, msg_idx, &mut blocks, &mut subagents);
    }
    ParsedTranscript { blocks, subagents }
}

fn convert_message(
    message: &Value,
    msg_idx: usize,
    out: &mut Vec<ConversationBlock>,
    subagents: &mut Vec<SubagentThread>,
) {
    let info = message.get("info").cloned().unwrap_or(Value::Null);
    let role = info.get("role").and_then(Value::as_str).unwrap_or("");
    let timestamp = info
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id_prefix = info
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| synth_id("a2-msg", msg_idx));
    let Some(parts) = message.get("parts").and_then(Value::as_array) else {
        return;
    };

    match role {
        "user" => {
            let content: String = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .map(|p| p.get("text").and_then(Value::as_str).unwrap_or(""))
                .collect::<Vec<_>>()
                .join("");
            if !content.is_empty() {
                out.push(ConversationBlock::UserMessage {
                    id: id_prefix,
                    timestamp,
                    content,
                });
            }
        }
        "assistant" => {
            let model = info.get("model").and_then(Value::as_str).map(str::to_string);
            out.extend(convert_parts(parts, &id_prefix, &timestamp, model.as_deref(), subagents));
        }
        _ => {}
    }
}

/// Converts one flat list of parts, either a top-level assistant message's
/// parts or a subagent's recursively-embedded summary parts. Shared
/// because both use the same part vocabulary.
fn convert_parts(
    parts: &[Value],
    id_prefix: &str,
    timestamp: &str,
    model: Option<&str>,
    subagents: &mut Vec<SubagentThread>,
) -> Vec<ConversationBlock> {
    let mut out = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let kind = part.get("type").and_then(Value::as_str).unwrap_or("");
        let block_id = part
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synth_id(&format!("{id_prefix}-part"), i));

        match kind {
            "text" => out.push(ConversationBlock::AssistantText {
                id: block_id,
                timestamp: timestamp.to_string(),
                content: part.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                model: model.map(str::to_string),
            }),
            "reasoning" => out.push(ConversationBlock::Thinking {
                id: block_id,
                timestamp: timestamp.to_string(),
                content: part.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                summary: None,
            }),
            "tool" => convert_tool_part(part, &block_id, timestamp, i, out.len(), subagents, &mut out),
            "step-start" | "step-finish" => out.push(ConversationBlock::System {
                id: block_id,
                timestamp: timestamp.to_string(),
                subtype: SystemSubtype::Status,
                message: kind.to_string(),
                metadata: None,
            }),
            "retry" => out.push(ConversationBlock::System {
                id: block_id,
                timestamp: timestamp.to_string(),
                subtype: SystemSubtype::Error,
                message: part.get("reason").and_then(Value::as_str).unwrap_or("retry").to_string(),
                metadata: None,
            }),
            "agent" | "subtask" => {
                let subagent_id = part
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| block_id.clone());
                out.push(ConversationBlock::Subagent {
                    id: block_id,
                    timestamp: timestamp.to_string(),
                    subagent_id,
                    name: part.get("name").and_then(Value::as_str).map(str::to_string),
                    input: part.get("input").cloned().unwrap_or(Value::Null),
                    status: ToolStatus::Pending,
                    output: None,
                    duration_ms: None,
                    tool_use_id: None,
                })
            }
            "file" | "snapshot" | "patch" | "compaction" => {}
            _ => {}
        }
    }
    out
}

fn convert_tool_part(
    part: &Value,
    block_id: &str,
    timestamp: &str,
    part_idx: usize,
    _out_len: usize,
    subagents: &mut Vec<SubagentThread>,
    out: &mut Vec<ConversationBlock>,
) {
    let tool_name = part.get("tool").and_then(Value::as_str).unwrap_or_default().to_string();
    let state = part.get("state").cloned().unwrap_or(Value::Null);
    let status = match state.get("status").and_then(Value::as_str).unwrap_or("pending") {
        "pending" => ToolStatus::Pending,
        "running" => ToolStatus::Running,
        "completed" => ToolStatus::Success,
        "error" => ToolStatus::Error,
        _ => ToolStatus::Pending,
    };
    let tool_use_id = part
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| block_id.to_string());

    if tool_name == "task" {
        if let Some(sub_id) = state.pointer("/metadata/sessionId").and_then(Value::as_str) {
            let summary = state
                .pointer("/metadata/summary")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let sub_blocks = convert_parts(&summary, &format!("{sub_id}-part"), timestamp, None, subagents);
            subagents.push(SubagentThread {
                id: sub_id.to_string(),
                blocks: sub_blocks,
            });
            out.push(ConversationBlock::Subagent {
                id: block_id.to_string(),
                timestamp: timestamp.to_string(),
                subagent_id: sub_id.to_string(),
                name: part.get("name").and_then(Value::as_str).map(str::to_string),
                input: part.get("input").cloned().unwrap_or(Value::Null),
                status,
                output: None,
                duration_ms: state.get("duration_ms").and_then(Value::as_u64),
                tool_use_id: Some(tool_use_id),
            });
            return;
        }
    }

    out.push(ConversationBlock::ToolUse {
        id: tool_use_id.clone(),
        timestamp: timestamp.to_string(),
        tool_name,
        tool_use_id: tool_use_id.clone(),
        input: part.get("input").cloned().unwrap_or(Value::Null),
        status,
        display_name: part.get("display_name").and_then(Value::as_str).map(str::to_string),
        description: part.get("description").and_then(Value::as_str).map(str::to_string),
    });
    if status.is_terminal() {
        out.push(ConversationBlock::ToolResult {
            id: synth_id(&format!("{tool_use_id}-result"), part_idx),
            timestamp: timestamp.to_string(),
            tool_use_id,
            output: state.get("output").cloned().unwrap_or(Value::Null),
            is_error: status == ToolStatus::Error,
            duration_ms: state.get("duration_ms").and_then(Value::as_u64),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(doc: Value) -> TranscriptEnvelope {
        TranscriptEnvelope {
            main: doc.to_string(),
            subagents: vec![],
        }
    }

    #[test]
    fn user_message_concatenates_text_parts() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"user","id":"m1","timestamp":"t"},"parts":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}
        ]});
        let parsed = parse(&envelope(doc));
        assert_eq!(parsed.blocks.len(), 1);
        match &parsed.blocks[0] {
            ConversationBlock::UserMessage { content, .. } => assert_eq!(content, "hello world"),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn assistant_text_carries_model() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t","model":"gpt"},"parts":[{"type":"text","text":"hi"}]}
        ]});
        let parsed = parse(&envelope(doc));
        match &parsed.blocks[0] {
            ConversationBlock::AssistantText { model, .. } => assert_eq!(model.as_deref(), Some("gpt")),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn terminal_tool_part_emits_use_and_result() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t"},"parts":[
                {"type":"tool","id":"TU1","tool":"bash","input":{"cmd":"ls"},"state":{"status":"completed","output":"ok"}}
            ]}
        ]});
        let parsed = parse(&envelope(doc));
        assert_eq!(parsed.blocks.len(), 2);
        assert!(matches!(parsed.blocks[0], ConversationBlock::ToolUse { .. }));
        match &parsed.blocks[1] {
            ConversationBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "TU1");
                assert!(!is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn pending_tool_part_has_no_result_yet() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t"},"parts":[
                {"type":"tool","id":"TU1","tool":"bash","input":{},"state":{"status":"pending"}}
            ]}
        ]});
        let parsed = parse(&envelope(doc));
        assert_eq!(parsed.blocks.len(), 1);
    }

    #[test]
    fn task_tool_produces_subagent_block_and_nested_thread() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t"},"parts":[
                {"type":"tool","id":"TU1","tool":"task","state":{
                    "status":"completed",
                    "metadata":{"sessionId":"SUB1","summary":[
                        {"type":"text","text":"did the thing"},
                        {"type":"tool","id":"TU2","tool":"bash","state":{"status":"completed","output":"done"}}
                    ]}
                }}
            ]}
        ]});
        let parsed = parse(&envelope(doc));
        assert_eq!(parsed.blocks.len(), 1);
        match &parsed.blocks[0] {
            ConversationBlock::Subagent { subagent_id, status, .. } => {
                assert_eq!(subagent_id, "SUB1");
                assert_eq!(*status, ToolStatus::Success);
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(parsed.subagents.len(), 1);
        assert_eq!(parsed.subagents[0].id, "SUB1");
        assert_eq!(parsed.subagents[0].blocks.len(), 3);
    }

    #[test]
    fn ignored_part_kinds_produce_no_blocks() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t"},"parts":[
                {"type":"file","path":"a.txt"},
                {"type":"snapshot"},
                {"type":"patch"},
                {"type":"compaction"}
            ]}
        ]});
        let parsed = parse(&envelope(doc));
        assert!(parsed.blocks.is_empty());
    }

    #[test]
    fn malformed_document_yields_empty_parse() {
        let parsed = parse(&TranscriptEnvelope {
            main: "not json".into(),
            subagents: vec![],
        });
        assert!(parsed.blocks.is_empty());
        assert!(parsed.subagents.is_empty());
    }

    #[test]
    fn missing_messages_array_yields_empty_parse() {
        let parsed = parse(&envelope(serde_json::json!({"foo":"bar"})));
        assert!(parsed.blocks.is_empty());
    }

    #[test]
    fn retry_part_is_system_error() {
        let doc = serde_json::json!({"messages":[
            {"info":{"role":"assistant","id":"m1","timestamp":"t"},"parts":[{"type":"retry","reason":"rate limited"}]}
        ]});
        let parsed = parse(&envelope(doc));
        match &parsed.blocks[0] {
            ConversationBlock::System { subtype, message, .. } => {
                assert_eq!(*subtype, SystemSubtype::Error);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected block {other:?}"),
        }
    }
}
