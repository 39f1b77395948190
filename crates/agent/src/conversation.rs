//! Stored history to provider transcript, and reply delivery shaping.

use parley_core::domain::conversation::{Message, MessageRole};

use crate::llm::TranscriptEntry;

pub const MAX_REPLY_CHUNKS: usize = 3;

/// Maps stored messages to transcript entries. Human teammates speak as the assistant side so
/// the model sees their answers as part of the business's voice.
///
/// The inbound USER message is stored before the reply cycle starts; when the stored history
/// already ends with `user_message` that entry is dropped, because the session adds it again as
/// the turn being answered.
pub fn history_transcript(messages: &[Message], user_message: &str) -> Vec<TranscriptEntry> {
    let mut relevant = messages;
    if let Some((last, rest)) = messages.split_last() {
        if last.role == MessageRole::User && last.content.trim() == user_message.trim() {
            relevant = rest;
        }
    }

    relevant
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| match message.role {
            MessageRole::User => TranscriptEntry::User(message.content.clone()),
            MessageRole::Agent | MessageRole::Human => {
                TranscriptEntry::assistant_text(message.content.clone())
            }
        })
        .collect()
}

/// Splits a reply on blank lines into at most [`MAX_REPLY_CHUNKS`] parts. Paragraphs past the
/// limit are folded into the last chunk.
pub fn split_reply(reply: &str) -> Vec<String> {
    let paragraphs: Vec<&str> = reply
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .collect();

    if paragraphs.len() <= MAX_REPLY_CHUNKS {
        if paragraphs.is_empty() {
            return vec![reply.trim().to_string()];
        }
        return paragraphs.into_iter().map(str::to_string).collect();
    }

    let (head, tail) = paragraphs.split_at(MAX_REPLY_CHUNKS - 1);
    let mut chunks: Vec<String> = head.iter().map(|paragraph| paragraph.to_string()).collect();
    chunks.push(tail.join("\n\n"));
    chunks
}
