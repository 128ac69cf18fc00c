//! Prompt-level tool calling for engines whose chat template has no tool slot.
//!
//! The catalogue is rendered into the system prompt and the model is asked to
//! answer with fenced JSON blocks of the form `{"tool": ..., "arguments": ...}`.
//! Earlier tool rounds are replayed as ordinary assistant/user text so the
//! transcript stays readable to such a model.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm_engine::provider::{
    CompletionRequest, Message, MessageRole, ToolCall, ToolDefinition,
};

/// Heading that opens the tool section of a rewritten system prompt.
pub const TOOL_SECTION_HEADING: &str = "## Tool calling";

/// Outcome of scanning a model reply for a single tool invocation.
#[derive(Debug, Clone)]
pub enum ParsedToolCall {
    ToolRequest { tool: String, arguments: Value },
    /// Nothing in the reply looks like a tool block.
    FinalAnswer(String),
    /// A block was found but could not be read as an invocation.
    MalformedToolCall { raw: String, error: String },
}

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("fenced block pattern")
});

static BARE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\s*"tool"\s*:"#).expect("bare object pattern"));

#[derive(Deserialize)]
struct Invocation {
    tool: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

fn empty_object() -> Value {
    json!({})
}

/// Append the tool catalogue and the calling convention to `base_prompt`.
pub fn build_tool_system_prompt(base_prompt: &str, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(base_prompt);
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str(TOOL_SECTION_HEADING);
    prompt.push_str(
        "\n\nSome questions need data you can only get by calling a function. \
         To call one, reply with nothing but a fenced block like this:\n\n\
         ```json\n{\"tool\": \"function_name\", \"arguments\": {\"name\": \"value\"}}\n```\n\n\
         Several calls may be made at once, one block each. The results come back \
         in the next message. Answer in plain prose, without any block, once you \
         have what you need. Never claim to have called a function you did not call.\n\n",
    );

    for tool in tools {
        prompt.push_str(&describe_tool(tool));
        prompt.push('\n');
    }
    prompt
}

fn describe_tool(tool: &ToolDefinition) -> String {
    let mut out = format!("**{}**: {}\n", tool.name, tool.description);

    let required: Vec<&str> = tool.parameters["required"]
        .as_array()
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = tool.parameters["properties"].as_object() else {
        return out;
    };
    for (name, schema) in properties {
        let kind = schema["type"].as_str().unwrap_or("any");
        let need = if required.contains(&name.as_str()) { "required" } else { "optional" };
        match schema["description"].as_str() {
            Some(text) => out.push_str(&format!("  - {} ({}, {}): {}\n", name, kind, need, text)),
            None => out.push_str(&format!("  - {} ({}, {})\n", name, kind, need)),
        }
    }
    out
}

/// Rewrite a tool-bearing request for an engine without a tool template.
///
/// Tools move into the system prompt; assistant tool calls become JSON blocks
/// and tool results become user turns.
pub fn simulate_tools(request: &CompletionRequest) -> CompletionRequest {
    let tools = request.tools.clone().unwrap_or_default();
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    let mut system_seen = false;
    for message in &request.messages {
        match message.role {
            MessageRole::System if !system_seen => {
                system_seen = true;
                messages.push(Message::system(build_tool_system_prompt(
                    &message.content,
                    &tools,
                )));
            }
            MessageRole::Assistant if message.tool_calls.is_some() => {
                let calls = message.tool_calls.as_deref().unwrap_or_default();
                messages.push(Message::assistant(render_tool_calls(&message.content, calls)));
            }
            MessageRole::Tool => {
                let name = tool_name_for(&request.messages, message.tool_call_id.as_deref());
                messages.push(Message::user(format_tool_result(
                    name.unwrap_or("tool"),
                    &message.content,
                    message.content.starts_with("Error:"),
                )));
            }
            _ => messages.push(message.clone()),
        }
    }
    if !system_seen {
        messages.insert(0, Message::system(build_tool_system_prompt("", &tools)));
    }

    CompletionRequest {
        messages,
        tools: None,
        tool_choice: None,
        ..request.clone()
    }
}

fn render_tool_calls(content: &str, calls: &[ToolCall]) -> String {
    let blocks = calls.iter().map(|call| {
        format!(
            "```json\n{}\n```",
            json!({"tool": call.name(), "arguments": call.arguments()})
        )
    });
    std::iter::once(content.to_string())
        .filter(|text| !text.is_empty())
        .chain(blocks)
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_name_for<'a>(messages: &'a [Message], call_id: Option<&str>) -> Option<&'a str> {
    let call_id = call_id?;
    messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .find(|c| c.id == call_id)
        .map(|c| c.name())
}

/// Every tool block in `output`, in order, with the byte span it occupies.
///
/// Fenced blocks win; bare `{"tool": ...}` objects are only looked for when the
/// reply has no fences at all.
fn scan(output: &str) -> Vec<(Range<usize>, ParsedToolCall)> {
    let fenced: Vec<_> = FENCED
        .captures_iter(output)
        .filter_map(|caps| {
            let (block, body) = (caps.get(0)?, caps.get(1)?);
            Some((block.range(), read_invocation(body.as_str())))
        })
        .collect();
    if !fenced.is_empty() {
        return fenced;
    }

    let mut found = Vec::new();
    let mut from = 0;
    while let Some(m) = BARE_START.find_at(output, from) {
        let Some(len) = object_len(&output[m.start()..]) else {
            break;
        };
        let span = m.start()..m.start() + len;
        found.push((span.clone(), read_invocation(&output[span.clone()])));
        from = span.end;
    }
    found
}

fn read_invocation(raw: &str) -> ParsedToolCall {
    match serde_json::from_str::<Invocation>(raw) {
        Ok(call) => ParsedToolCall::ToolRequest {
            tool: call.tool,
            arguments: call.arguments,
        },
        Err(e) => ParsedToolCall::MalformedToolCall {
            raw: raw.to_string(),
            error: e.to_string(),
        },
    }
}

/// Length in bytes of the JSON object that starts at `s[0]`, if it closes.
fn object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    let mut chars = s.char_indices();

    while let Some((i, c)) = chars.next() {
        match (quoted, c) {
            (true, '\\') => {
                chars.next();
            }
            (_, '"') => quoted = !quoted,
            (false, '{') => depth += 1,
            (false, '}') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First tool invocation in `output`, or the whole reply as a final answer.
pub fn parse_tool_call(output: &str) -> ParsedToolCall {
    scan(output)
        .into_iter()
        .next()
        .map(|(_, parsed)| parsed)
        .unwrap_or_else(|| ParsedToolCall::FinalAnswer(output.to_string()))
}

/// Split model output into its prose and every well-formed tool call.
///
/// Malformed blocks stay in the prose so the caller sees what the model said.
pub fn parse_tool_calls(output: &str) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    let mut prose = String::with_capacity(output.len());
    let mut cursor = 0;

    for (span, parsed) in scan(output) {
        match parsed {
            ParsedToolCall::ToolRequest { tool, arguments } => {
                prose.push_str(&output[cursor..span.start]);
                cursor = span.end;
                calls.push(ToolCall::new(tool, &arguments));
            }
            ParsedToolCall::MalformedToolCall { raw, error } => {
                log::warn!("Ignoring unreadable tool block {}: {}", raw, error);
            }
            ParsedToolCall::FinalAnswer(_) => {}
        }
    }

    if calls.is_empty() {
        return (output.to_string(), calls);
    }
    prose.push_str(&output[cursor..]);
    (prose.trim().to_string(), calls)
}

/// Text fed back to the model in place of a `tool` role message.
pub fn format_tool_result(tool_name: &str, result: &str, is_error: bool) -> String {
    let label = if is_error { "failed" } else { "returned" };
    format!("[{} {}]\n{}", tool_name, label, result)
}
