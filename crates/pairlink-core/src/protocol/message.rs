//! Inbound message model.
//!
//! Mirrors the nested content tree of the messaging protocol closely
//! enough for routing: text sources, media captions, reply contexts and
//! the ephemeral / view-once wrappers.

use serde::{Deserialize, Serialize};

/// One inbound message, consumed once by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub content: MessageContent,
}

impl InboundMessage {
    pub fn kind(&self) -> ContentKind {
        self.content.unwrap_ephemeral().kind()
    }
}

/// Coarse classification of a message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Caption,
    QuotedReference,
    Media,
    Other,
}

/// Reply/forward context attached to a content variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    #[serde(default)]
    pub stanza_id: Option<String>,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub quoted_message: Option<Box<MessageContent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

/// Pointer to downloadable media, opaque to everything but the protocol library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub direct_path: Option<String>,
    #[serde(default)]
    pub media_key: Option<String>,
    #[serde(default)]
    pub file_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Audio,
    Sticker,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub view_once: bool,
    #[serde(flatten)]
    pub media: MediaRef,
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

/// Button, list and template replies all share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveReply {
    #[serde(default)]
    pub selected_id: Option<String>,
    #[serde(default)]
    pub selected_display_text: Option<String>,
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

/// A wrapper around another content tree (ephemeral, view-once).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FutureProofMessage {
    #[serde(default)]
    pub message: Box<MessageContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons_response_message: Option<InteractiveReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_response_message: Option<InteractiveReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_button_reply_message: Option<InteractiveReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<FutureProofMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_message: Option<FutureProofMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2: Option<FutureProofMessage>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }

    /// Strip one level of ephemeral wrapping, if present.
    pub fn unwrap_ephemeral(&self) -> &MessageContent {
        match &self.ephemeral_message {
            Some(wrapper) => &wrapper.message,
            None => self,
        }
    }

    /// Strip view-once wrappers (both protocol generations), if present.
    pub fn unwrap_view_once(&self) -> &MessageContent {
        self.view_once_message
            .as_ref()
            .or(self.view_once_message_v2.as_ref())
            .map(|wrapper| wrapper.message.as_ref())
            .unwrap_or(self)
    }

    /// First non-empty text among: direct text, extended text, media caption.
    pub fn extract_text(&self) -> Option<&str> {
        let content = self.unwrap_ephemeral();
        let direct = content.conversation.as_deref();
        let extended = content
            .extended_text_message
            .as_ref()
            .and_then(|m| m.text.as_deref());
        let caption = [
            &content.image_message,
            &content.video_message,
            &content.document_message,
        ]
        .into_iter()
        .flatten()
        .find_map(|m| m.caption.as_deref().filter(|c| !c.trim().is_empty()));

        [direct, extended, caption]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
    }

    /// The first media payload in this content tree along with its kind.
    pub fn media(&self) -> Option<(MediaKind, &MediaMessage)> {
        let content = self.unwrap_ephemeral().unwrap_view_once();
        [
            (MediaKind::Image, &content.image_message),
            (MediaKind::Video, &content.video_message),
            (MediaKind::Audio, &content.audio_message),
            (MediaKind::Document, &content.document_message),
            (MediaKind::Sticker, &content.sticker_message),
        ]
        .into_iter()
        .find_map(|(kind, m)| m.as_ref().map(|m| (kind, m)))
    }

    pub fn kind(&self) -> ContentKind {
        let quotes = self
            .extended_text_message
            .as_ref()
            .and_then(|m| m.context_info.as_ref())
            .is_some_and(|c| c.quoted_message.is_some());
        if quotes {
            ContentKind::QuotedReference
        } else if self.conversation.is_some() || self.extended_text_message.is_some() {
            ContentKind::Text
        } else if let Some((_, media)) = self.media() {
            if media.caption.as_deref().is_some_and(|c| !c.is_empty()) {
                ContentKind::Caption
            } else {
                ContentKind::Media
            }
        } else {
            ContentKind::Other
        }
    }
}

/// A message referenced through a reply context.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotedMessage {
    /// Which content variant carried the reference.
    pub context: &'static str,
    pub stanza_id: Option<String>,
    pub participant: Option<String>,
    pub message: MessageContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod extract_text {
        use super::*;

        #[test]
        fn prefers_direct_text() {
            let content = MessageContent::text("hello");
            assert_eq!(content.extract_text(), Some("hello"));
        }

        #[test]
        fn falls_back_to_extended_text() {
            let content: MessageContent = serde_json::from_value(json!({
                "conversation": "   ",
                "extendedTextMessage": { "text": ".vv" }
            }))
            .unwrap();
            assert_eq!(content.extract_text(), Some(".vv"));
        }

        #[test]
        fn falls_back_to_caption() {
            let content: MessageContent = serde_json::from_value(json!({
                "imageMessage": { "caption": "look", "url": "https://mmg/1" }
            }))
            .unwrap();
            assert_eq!(content.extract_text(), Some("look"));
        }

        #[test]
        fn sees_through_ephemeral_wrapper() {
            let content: MessageContent = serde_json::from_value(json!({
                "ephemeralMessage": { "message": { "conversation": "inside" } }
            }))
            .unwrap();
            assert_eq!(content.extract_text(), Some("inside"));
        }

        #[test]
        fn none_for_media_without_caption() {
            let content: MessageContent = serde_json::from_value(json!({
                "stickerMessage": { "url": "https://mmg/2" }
            }))
            .unwrap();
            assert_eq!(content.extract_text(), None);
        }
    }

    mod media {
        use super::*;

        #[test]
        fn finds_view_once_image() {
            let content: MessageContent = serde_json::from_value(json!({
                "viewOnceMessageV2": { "message": {
                    "imageMessage": { "viewOnce": true, "mimetype": "image/jpeg", "directPath": "/v/t62" }
                }}
            }))
            .unwrap();
            let (kind, media) = content.media().unwrap();
            assert_eq!(kind, MediaKind::Image);
            assert!(media.view_once);
            assert_eq!(media.media.direct_path.as_deref(), Some("/v/t62"));
        }

        #[test]
        fn none_for_plain_text() {
            assert!(MessageContent::text("hi").media().is_none());
        }
    }

    mod kind {
        use super::*;

        #[test]
        fn classifies_content() {
            assert_eq!(MessageContent::text("hi").kind(), ContentKind::Text);

            let captioned: MessageContent = serde_json::from_value(json!({
                "videoMessage": { "caption": "clip" }
            }))
            .unwrap();
            assert_eq!(captioned.kind(), ContentKind::Caption);

            let reply: MessageContent = serde_json::from_value(json!({
                "extendedTextMessage": {
                    "text": ".vv",
                    "contextInfo": { "quotedMessage": { "conversation": "orig" } }
                }
            }))
            .unwrap();
            assert_eq!(reply.kind(), ContentKind::QuotedReference);

            assert_eq!(MessageContent::default().kind(), ContentKind::Other);
        }
    }

    #[test]
    fn inbound_message_deserializes_with_defaults() {
        let message: InboundMessage = serde_json::from_value(json!({
            "id": "ABC",
            "chatId": "123@s.whatsapp.net",
            "senderId": "123@s.whatsapp.net"
        }))
        .unwrap();
        assert!(!message.from_me);
        assert_eq!(message.kind(), ContentKind::Other);
    }
}
