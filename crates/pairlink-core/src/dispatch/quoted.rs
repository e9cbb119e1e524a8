//! Ordered lookup of the message a reply refers to.
//!
//! Each content variant can carry its own reply context. The table below
//! is searched front to back and the first context holding a quoted
//! payload wins.

use crate::protocol::message::{ContextInfo, MessageContent};
use crate::protocol::QuotedMessage;

type ContextExtractor = fn(&MessageContent) -> Option<&ContextInfo>;

/// Reply contexts in search order.
pub const QUOTED_CONTEXTS: &[(&str, ContextExtractor)] = &[
    ("extendedTextMessage", extended_text),
    ("imageMessage", image),
    ("videoMessage", video),
    ("documentMessage", document),
    ("audioMessage", audio),
    ("buttonsResponseMessage", buttons_response),
    ("listResponseMessage", list_response),
    ("templateButtonReplyMessage", template_button_reply),
    ("stickerMessage", sticker),
];

fn extended_text(content: &MessageContent) -> Option<&ContextInfo> {
    content.extended_text_message.as_ref()?.context_info.as_ref()
}

fn image(content: &MessageContent) -> Option<&ContextInfo> {
    content.image_message.as_ref()?.context_info.as_ref()
}

fn video(content: &MessageContent) -> Option<&ContextInfo> {
    content.video_message.as_ref()?.context_info.as_ref()
}

fn document(content: &MessageContent) -> Option<&ContextInfo> {
    content.document_message.as_ref()?.context_info.as_ref()
}

fn audio(content: &MessageContent) -> Option<&ContextInfo> {
    content.audio_message.as_ref()?.context_info.as_ref()
}

fn buttons_response(content: &MessageContent) -> Option<&ContextInfo> {
    content.buttons_response_message.as_ref()?.context_info.as_ref()
}

fn list_response(content: &MessageContent) -> Option<&ContextInfo> {
    content.list_response_message.as_ref()?.context_info.as_ref()
}

fn template_button_reply(content: &MessageContent) -> Option<&ContextInfo> {
    content
        .template_button_reply_message
        .as_ref()?
        .context_info
        .as_ref()
}

fn sticker(content: &MessageContent) -> Option<&ContextInfo> {
    content.sticker_message.as_ref()?.context_info.as_ref()
}

/// Find the quoted payload, unwrapping one ephemeral layer first.
pub fn extract_quoted(content: &MessageContent) -> Option<QuotedMessage> {
    let content = content.unwrap_ephemeral();
    QUOTED_CONTEXTS.iter().find_map(|(name, extract)| {
        let context = extract(content)?;
        let quoted = context.quoted_message.as_deref()?;
        Some(QuotedMessage {
            context: *name,
            stanza_id: context.stanza_id.clone(),
            participant: context.participant.clone(),
            message: quoted.clone(),
        })
    })
}
