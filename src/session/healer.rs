//! Repair of turns left incomplete by a crash or a user stop.

use std::collections::HashSet;

use crate::types::{ContentBlock, Message, ToolOutput};

use super::ToolResultCache;

/// Error text given to tool calls that never produced a result.
pub const INTERRUPT_TOOL_ERROR: &str = "human stopped or interrupted tool execution";

/// Note for the model that the previous turn was cut short.
pub const INTERRUPT_TEXT: &str = "(user stopped or interrupted and wrote the following)";

/// Blocks to prepend to the next user turn after an interrupted driver call.
///
/// With `in_progress` false this is a no-op. Otherwise every `ToolUse` in the
/// last message that has no `ToolResult` anywhere in the transcript gets a
/// synthetic error result (also recorded in `cache`), followed by one
/// annotation text block.
pub fn heal_interruption(
    transcript: &[Message],
    in_progress: bool,
    cache: &mut ToolResultCache,
) -> Vec<ContentBlock> {
    if !in_progress {
        return Vec::new();
    }

    let answered = answered_ids(transcript);
    let mut healed = Vec::new();
    if let Some(last) = transcript.last() {
        for (id, name, _) in last.tool_uses() {
            if answered.contains(id) {
                continue;
            }
            tracing::debug!(tool_use_id = id, tool = name, "healing orphaned tool call");
            cache.insert(id.to_string(), ToolOutput::error(INTERRUPT_TOOL_ERROR));
            healed.push(ContentBlock::error_result(id, INTERRUPT_TOOL_ERROR));
        }
    }
    healed.push(ContentBlock::text(INTERRUPT_TEXT));
    healed
}

/// Ids of `ToolUse` blocks with no matching `ToolResult` in the transcript.
pub fn unpaired_tool_uses(transcript: &[Message]) -> Vec<String> {
    let answered = answered_ids(transcript);
    transcript
        .iter()
        .flat_map(|message| message.tool_uses())
        .filter(|(id, _, _)| !answered.contains(id))
        .map(|(id, _, _)| id.to_string())
        .collect()
}

fn answered_ids(transcript: &[Message]) -> HashSet<&str> {
    transcript
        .iter()
        .flat_map(|message| message.blocks())
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            ContentBlock::Text { .. } | ContentBlock::ToolUse { .. } => None,
        })
        .collect()
}
