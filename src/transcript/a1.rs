//! SDK-style architecture: per-thread line-delimited JSON records.
//!
//! Each line of `envelope.main` (and, independently, each subagent's
//! `transcript` blob) is one record. A line that fails to parse as JSON
//! is skipped, matching the runner stream parser's tolerance for
//! malformed output — a corrupted line never aborts the rest of the
//! thread.

use serde_json::Value;

use super::{
    synth_id, ConversationBlock, ParsedTranscript, SubagentThread, SystemSubtype, ToolStatus,
    TranscriptEnvelope,
};

pub fn parse(envelope: &TranscriptEnvelope) -> ParsedTranscript {
    let blocks = parse_thread(&envelope.main, "main");
    let subagents = envelope
        .subagents
        .iter()
        .map(|sub| SubagentThread {
            id: sub.id.clone(),
            blocks: parse_thread(&sub.transcript, &sub.id),
        })
        .collect();
    ParsedTranscript { blocks, subagents }
}

fn parse_thread(raw: &str, thread_tag: &str) -> Vec<ConversationBlock> {
    let mut blocks = Vec::new();
    for (line_idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(thread = thread_tag, line = line_idx, error = %e, "skipping malformed a1 record");
                continue;
            }
        };
        convert_record(&record, thread_tag, line_idx, &mut blocks);
    }
    blocks
}

fn record_id(record: &Value, thread_tag: &str, line_idx: usize) -> String {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| synth_id(&format!("{thread_tag}-a1"), line_idx))
}

fn record_timestamp(record: &Value) -> String {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

fn text_of(part: &Value) -> String {
    part.get("text").and_then(Value::as_str).unwrap_or("").to_string()
}

fn convert_record(record: &Value, thread_tag: &str, line_idx: usize, out: &mut Vec<ConversationBlock>) {
    let Some(kind) = record.get("type").and_then(Value::as_str) else {
        return;
    };
    let id = record_id(record, thread_tag, line_idx);
    let timestamp = record_timestamp(record);

    match kind {
        "user" => convert_user_record(record, id, timestamp, thread_tag, line_idx, out),
        "assistant" => convert_assistant_record(record, id, timestamp, thread_tag, line_idx, out),
        "system" => out.push(convert_system_record(record, id, timestamp)),
        "result" => out.push(convert_result_record(record, id, timestamp)),
        _ => {}
    }
}

fn convert_user_record(
    record: &Value,
    id: String,
    timestamp: String,
    thread_tag: &str,
    line_idx: usize,
    out: &mut Vec<ConversationBlock>,
) {
    let content = record.pointer("/message/content");
    match content {
        Some(Value::String(s)) => out.push(ConversationBlock::UserMessage {
            id,
            timestamp,
            content: s.clone(),
        }),
        Some(Value::Array(parts)) => {
            let tool_results: Vec<&Value> = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("tool_result"))
                .collect();
            if tool_results.is_empty() {
                return;
            }
            if let Some(subagent) = record.get("subagent") {
                let status_tag = subagent.get("status").and_then(Value::as_str).unwrap_or("");
                let output: String = parts
                    .iter()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                    .map(text_of)
                    .collect::<Vec<_>>()
                    .join("");
                out.push(ConversationBlock::Subagent {
                    id,
                    timestamp,
                    subagent_id: subagent
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: subagent.get("name").and_then(Value::as_str).map(str::to_string),
                    input: subagent.get("input").cloned().unwrap_or(Value::Null),
                    status: ToolStatus::from_completion(status_tag),
                    output: Some(output),
                    duration_ms: subagent.get("duration_ms").and_then(Value::as_u64),
                    tool_use_id: tool_results[0]
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            } else {
                for (i, part) in tool_results.into_iter().enumerate() {
                    out.push(ConversationBlock::ToolResult {
                        id: synth_id(&format!("{thread_tag}-a1-tr-{line_idx}"), i),
                        timestamp: timestamp.clone(),
                        tool_use_id: part
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        output: part.get("content").cloned().unwrap_or(Value::Null),
                        is_error: part.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                        duration_ms: part.get("duration_ms").and_then(Value::as_u64),
                    });
                }
            }
        }
        _ => {}
    }
}

fn convert_assistant_record(
    record: &Value,
    id: String,
    timestamp: String,
    thread_tag: &str,
    line_idx: usize,
    out: &mut Vec<ConversationBlock>,
) {
    let model = record.pointer("/message/model").and_then(Value::as_str).map(str::to_string);
    let Some(Value::Array(parts)) = record.pointer("/message/content") else {
        return;
    };
    for (i, part) in parts.iter().enumerate() {
        let part_kind = part.get("type").and_then(Value::as_str).unwrap_or("");
        let block_id = synth_id(&format!("{thread_tag}-a1-{line_idx}"), i);
        match part_kind {
            "text" => out.push(ConversationBlock::AssistantText {
                id: if i == 0 { id.clone() } else { block_id },
                timestamp: timestamp.clone(),
                content: text_of(part),
                model: model.clone(),
            }),
            "tool_use" => out.push(ConversationBlock::ToolUse {
                id: part
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(block_id),
                timestamp: timestamp.clone(),
                tool_name: part.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                tool_use_id: part
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: part.get("input").cloned().unwrap_or(Value::Null),
                // Historical records are terminal: a tool_use that already
                // made it into a persisted transcript is done executing.
                status: ToolStatus::Success,
                display_name: None,
                description: None,
            }),
            "thinking" => out.push(ConversationBlock::Thinking {
                id: block_id,
                timestamp: timestamp.clone(),
                content: part.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string(),
                summary: None,
            }),
            _ => {}
        }
    }
}

fn convert_system_record(record: &Value, id: String, timestamp: String) -> ConversationBlock {
    let subtype_tag = record.get("subtype").and_then(Value::as_str).unwrap_or("");
    let subtype = match subtype_tag {
        "init" => SystemSubtype::SessionStart,
        "status" => SystemSubtype::Status,
        "hook_response" => SystemSubtype::HookResponse,
        "compact_boundary" => SystemSubtype::Status,
        _ => SystemSubtype::Status,
    };
    ConversationBlock::System {
        id,
        timestamp,
        subtype,
        message: record.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
        metadata: record.get("metadata").cloned(),
    }
}

fn convert_result_record(record: &Value, id: String, timestamp: String) -> ConversationBlock {
    let success = record.get("subtype").and_then(Value::as_str) == Some("success");
    ConversationBlock::System {
        id,
        timestamp,
        subtype: if success {
            SystemSubtype::SessionEnd
        } else {
            SystemSubtype::Error
        },
        message: record.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
        metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::RawSubagentTranscript;

    fn line(v: Value) -> String {
        v.to_string()
    }

    #[test]
    fn plain_user_message() {
        let main = line(serde_json::json!({"type":"user","id":"u1","timestamp":"t","message":{"content":"hi"}}));
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 1);
        match &parsed.blocks[0] {
            ConversationBlock::UserMessage { content, .. } => assert_eq!(content, "hi"),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn assistant_text_and_tool_use_and_thinking() {
        let main = line(serde_json::json!({
            "type":"assistant","id":"a1","timestamp":"t",
            "message":{"model":"m1","content":[
                {"type":"text","text":"hello"},
                {"type":"tool_use","id":"TU1","name":"bash","input":{"cmd":"ls"}},
                {"type":"thinking","thinking":"pondering"}
            ]}
        }));
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 3);
        assert!(matches!(parsed.blocks[0], ConversationBlock::AssistantText { .. }));
        match &parsed.blocks[1] {
            ConversationBlock::ToolUse { tool_use_id, status, .. } => {
                assert_eq!(tool_use_id, "TU1");
                assert_eq!(*status, ToolStatus::Success);
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert!(matches!(parsed.blocks[2], ConversationBlock::Thinking { .. }));
    }

    #[test]
    fn tool_result_without_subagent_metadata() {
        let main = line(serde_json::json!({
            "type":"user","id":"u2","timestamp":"t",
            "message":{"content":[{"type":"tool_result","tool_use_id":"TU1","content":"ok","is_error":false}]}
        }));
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 1);
        match &parsed.blocks[0] {
            ConversationBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "TU1");
                assert!(!is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn tool_result_with_subagent_metadata_becomes_subagent_block() {
        let main = line(serde_json::json!({
            "type":"user","id":"u3","timestamp":"t",
            "subagent": {"id":"SUB1","status":"completed"},
            "message":{"content":[
                {"type":"tool_result","tool_use_id":"TU2","content":"done"},
                {"type":"text","text":"summary text"}
            ]}
        }));
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 1);
        match &parsed.blocks[0] {
            ConversationBlock::Subagent { subagent_id, status, output, .. } => {
                assert_eq!(subagent_id, "SUB1");
                assert_eq!(*status, ToolStatus::Success);
                assert_eq!(output.as_deref(), Some("summary text"));
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn system_and_result_records() {
        let main = format!(
            "{}\n{}",
            line(serde_json::json!({"type":"system","id":"s1","timestamp":"t","subtype":"init","message":"ready"})),
            line(serde_json::json!({"type":"result","id":"r1","timestamp":"t","subtype":"success","message":"done"})),
        );
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 2);
        match &parsed.blocks[0] {
            ConversationBlock::System { subtype, .. } => assert_eq!(*subtype, SystemSubtype::SessionStart),
            other => panic!("unexpected block {other:?}"),
        }
        match &parsed.blocks[1] {
            ConversationBlock::System { subtype, .. } => assert_eq!(*subtype, SystemSubtype::SessionEnd),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn malformed_line_is_skipped_but_others_still_parse() {
        let main = format!(
            "not json at all\n{}",
            line(serde_json::json!({"type":"user","id":"u1","timestamp":"t","message":{"content":"hi"}}))
        );
        let parsed = parse(&TranscriptEnvelope { main, subagents: vec![] });
        assert_eq!(parsed.blocks.len(), 1);
    }

    #[test]
    fn subagent_thread_is_parsed_independently() {
        let main = line(serde_json::json!({"type":"user","id":"u1","timestamp":"t","message":{"content":"hi"}}));
        let sub_transcript = line(serde_json::json!({"type":"user","id":"su1","timestamp":"t","message":{"content":"sub hi"}}));
        let parsed = parse(&TranscriptEnvelope {
            main,
            subagents: vec![RawSubagentTranscript { id: "SUB1".into(), transcript: sub_transcript }],
        });
        assert_eq!(parsed.subagents.len(), 1);
        assert_eq!(parsed.subagents[0].id, "SUB1");
        assert_eq!(parsed.subagents[0].blocks.len(), 1);
    }
}
