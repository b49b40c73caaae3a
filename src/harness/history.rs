//! Conversation-transcript discipline.
//!
//! Providers following the tool-calling protocol reject histories where a
//! declared tool-call id has no matching result, and silently misbehave
//! when stale provider fields ride along. Three invariants are enforced
//! before every send:
//!
//! 1. every assistant tool call is answered by exactly one tool message
//!    before the next assistant message (synthetic `Error:` results are
//!    injected for orphans);
//! 2. assistant messages carry only canonical fields;
//! 3. over-long histories keep the system and original user messages and
//!    the most recent coherent (assistant + tool results) blocks.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::message::{ChatMessage, Role};

/// Message-count threshold beyond which the transcript is truncated.
pub const DEFAULT_HISTORY_LIMIT: usize = 40;

/// Drop non-canonical fields and absent content from an assistant
/// message so the next request carries exactly what the protocol needs.
pub fn sanitize_assistant_message(msg: &ChatMessage) -> ChatMessage {
    ChatMessage {
        role: msg.role,
        content: msg.content.clone().filter(|c| !c.is_empty()),
        tool_calls: msg.tool_calls.clone(),
        tool_call_id: msg.tool_call_id.clone(),
        extra: Default::default(),
    }
}

/// Inject a synthetic error result for every declared tool-call id that
/// lacks one before the next assistant message.
pub fn repair_tool_call_integrity(messages: &mut Vec<ChatMessage>) {
    // Collect (insertion point, missing ids) per assistant message
    let mut insertions: Vec<(usize, Vec<String>)> = Vec::new();

    let mut i = 0;
    while i < messages.len() {
        if messages[i].role != Role::Assistant || messages[i].tool_calls.is_empty() {
            i += 1;
            continue;
        }

        let declared: Vec<String> = messages[i].tool_calls.iter().map(|c| c.id.clone()).collect();

        // Scan forward over the result block that answers this message
        let mut answered: BTreeSet<String> = BTreeSet::new();
        let mut j = i + 1;
        while j < messages.len() && messages[j].role == Role::Tool {
            if let Some(id) = &messages[j].tool_call_id {
                answered.insert(id.clone());
            }
            j += 1;
        }

        let missing: Vec<String> = declared
            .into_iter()
            .filter(|id| !answered.contains(id))
            .collect();
        if !missing.is_empty() {
            warn!(count = missing.len(), "repairing orphaned tool calls");
            insertions.push((j, missing));
        }

        i = j;
    }

    // Apply back-to-front so indices stay valid
    for (at, ids) in insertions.into_iter().rev() {
        for id in ids.into_iter().rev() {
            messages.insert(
                at,
                ChatMessage::tool_result(&id, "Error: tool execution interrupted; no result produced"),
            );
        }
    }
}

/// Truncate an over-long transcript.
///
/// Keeps the leading system and first user message, then whole
/// (assistant-with-tool-calls, tool-results) blocks from the tail until
/// the limit is met. Orphan tool messages at a block boundary are
/// discarded rather than split. At least the final block always survives,
/// even when it alone exceeds the limit.
pub fn truncate_messages(messages: Vec<ChatMessage>, limit: usize) -> Vec<ChatMessage> {
    if messages.len() <= limit {
        return messages;
    }

    // Preserved prefix: leading system message, then the first user message
    let mut prefix: Vec<ChatMessage> = Vec::new();
    let mut rest_start = 0;
    if let Some(first) = messages.first()
        && first.role == Role::System
    {
        prefix.push(first.clone());
        rest_start = 1;
    }
    if let Some(user) = messages.get(rest_start)
        && user.role == Role::User
    {
        prefix.push(user.clone());
        rest_start += 1;
    }

    let body = &messages[rest_start..];

    // Split the body into coherent blocks, each starting at an assistant
    // message and carrying its tool results
    let mut blocks: Vec<Vec<ChatMessage>> = Vec::new();
    for msg in body {
        if msg.role == Role::Assistant || blocks.is_empty() {
            blocks.push(vec![msg.clone()]);
        } else {
            // unwrap-free: blocks is non-empty here
            if let Some(last) = blocks.last_mut() {
                last.push(msg.clone());
            }
        }
    }

    // Leading orphan tool messages (block not starting with assistant)
    // are dropped entirely
    blocks.retain(|b| b.first().map(|m| m.role == Role::Assistant).unwrap_or(false));

    // Take whole blocks from the tail within budget, but never zero
    let budget = limit.saturating_sub(prefix.len());
    let mut kept: Vec<Vec<ChatMessage>> = Vec::new();
    let mut used = 0;
    for block in blocks.into_iter().rev() {
        if !kept.is_empty() && used + block.len() > budget {
            break;
        }
        used += block.len();
        kept.push(block);
    }
    kept.reverse();

    let dropped = messages.len() - prefix.len() - used;
    if dropped > 0 {
        debug!(dropped, "truncated conversation history");
    }

    let mut out = prefix;
    out.extend(kept.into_iter().flatten());
    out
}
