//! Newline-delimited JSON spoken with the sidecar.
//!
//! Every line is one object with a `type` field.
//!
//! Commands (stdin):
//! - `{"type":"open","userId":..,"credentials":..,"auth":{"type":"qr"}}`
//! - `{"type":"send","id":1,"chatId":..,"content":{"kind":"text","text":..}}`
//! - `{"type":"download","id":2,"media":{"directPath":..}}`
//! - `{"type":"logout","id":3}`
//!
//! Events and replies (stdout):
//! - `{"type":"qr","qr":..}` / `{"type":"pairingCode","code":..}`
//! - `{"type":"open","account":..}`
//! - `{"type":"close","reason":{"code":"loggedOut"},"terminal":true}`
//! - `{"type":"creds","credentials":{..}}`
//! - `{"type":"message","message":{..}}`
//! - `{"type":"reply","id":1,"ok":true,"data":<base64>?,"error":..?}`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    AuthRequest, CloseReason, CredentialMaterial, InboundMessage, MediaKind, MediaRef,
    OutboundContent, ProtocolError, ProtocolEvent,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeCommand {
    #[serde(rename_all = "camelCase")]
    Open {
        user_id: String,
        credentials: CredentialMaterial,
        auth: AuthRequest,
    },
    #[serde(rename_all = "camelCase")]
    Send {
        id: u64,
        chat_id: String,
        content: WireContent,
    },
    Download { id: u64, media: MediaRef },
    Logout { id: u64 },
}

impl BridgeCommand {
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| ProtocolError::Other(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WireContent {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Media {
        media_type: MediaKind,
        /// Base64 payload.
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mimetype: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl From<OutboundContent> for WireContent {
    fn from(content: OutboundContent) -> Self {
        match content {
            OutboundContent::Text(text) => WireContent::Text { text },
            OutboundContent::Media {
                kind,
                bytes,
                mimetype,
                caption,
            } => WireContent::Media {
                media_type: kind,
                data: STANDARD.encode(bytes),
                mimetype,
                caption,
            },
        }
    }
}

/// Answer to a command that carried an `id`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Reply {
    pub fn into_result(self) -> Result<Option<String>, ProtocolError> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(ProtocolError::Other(
                self.error.unwrap_or_else(|| "sidecar reported failure".to_string()),
            ))
        }
    }

    /// Decode a base64 `data` payload.
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.into_result()? {
            Some(data) => STANDARD
                .decode(data)
                .map(Some)
                .map_err(|e| ProtocolError::Other(format!("Invalid media payload: {e}"))),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    Qr {
        qr: String,
    },
    PairingCode {
        code: String,
    },
    Open {
        #[serde(default)]
        account: Option<String>,
    },
    Close {
        reason: CloseReason,
        #[serde(default)]
        terminal: bool,
    },
    Creds {
        credentials: CredentialMaterial,
    },
    Message {
        message: InboundMessage,
    },
    Reply(Reply),
}

impl BridgeMessage {
    /// The protocol event this line carries. Replies carry none.
    pub fn into_event(self) -> Option<ProtocolEvent> {
        match self {
            BridgeMessage::Qr { qr } => Some(ProtocolEvent::QrIssued(qr)),
            BridgeMessage::PairingCode { code } => Some(ProtocolEvent::PairingCodeIssued(code)),
            BridgeMessage::Open { .. } => Some(ProtocolEvent::Opened),
            BridgeMessage::Close { reason, terminal } => {
                Some(ProtocolEvent::Closed { reason, terminal })
            }
            BridgeMessage::Creds { credentials } => {
                Some(ProtocolEvent::CredentialsRotated(credentials))
            }
            BridgeMessage::Message { message } => Some(ProtocolEvent::InboundMessage(message)),
            BridgeMessage::Reply(_) => None,
        }
    }
}

/// Parse one stdout line. Blank and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<BridgeMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(message) => Some(message),
        Err(e) => {
            log::debug!("Ignoring unparseable sidecar line ({}): {}", e, trimmed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod commands {
        use super::*;

        #[test]
        fn open_line_is_tagged_and_terminated() {
            let line = BridgeCommand::Open {
                user_id: "alice".to_string(),
                credentials: CredentialMaterial::new(json!({})),
                auth: AuthRequest::PairingCode {
                    phone_number: "6281234567890".to_string(),
                },
            }
            .to_line()
            .unwrap();

            assert!(line.ends_with('\n'));
            let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(value["type"], "open");
            assert_eq!(value["userId"], "alice");
            assert_eq!(value["auth"]["type"], "pairingCode");
            assert_eq!(value["auth"]["phoneNumber"], "6281234567890");
        }

        #[test]
        fn media_is_base64_encoded() {
            let content = WireContent::from(OutboundContent::Media {
                kind: MediaKind::Video,
                bytes: b"clip".to_vec(),
                mimetype: Some("video/mp4".to_string()),
                caption: None,
            });
            let value = serde_json::to_value(BridgeCommand::Send {
                id: 7,
                chat_id: "me@s.whatsapp.net".to_string(),
                content,
            })
            .unwrap();

            assert_eq!(value["chatId"], "me@s.whatsapp.net");
            assert_eq!(value["content"]["kind"], "media");
            assert_eq!(value["content"]["mediaType"], "video");
            assert_eq!(value["content"]["data"], "Y2xpcA==");
            assert!(value["content"].get("caption").is_none());
        }
    }

    mod messages {
        use super::*;

        #[test]
        fn parses_lifecycle_lines() {
            let qr = parse_line(r#"{"type":"qr","qr":"2@abc"}"#).and_then(BridgeMessage::into_event);
            assert!(matches!(qr, Some(ProtocolEvent::QrIssued(q)) if q == "2@abc"));

            let code = parse_line(r#"{"type":"pairingCode","code":"ABCD1234"}"#)
                .and_then(BridgeMessage::into_event);
            assert!(matches!(code, Some(ProtocolEvent::PairingCodeIssued(c)) if c == "ABCD1234"));

            let creds = parse_line(r#"{"type":"creds","credentials":{"registered":true,"data":{}}}"#)
                .and_then(BridgeMessage::into_event);
            assert!(matches!(creds, Some(ProtocolEvent::CredentialsRotated(c)) if c.registered));
        }

        #[test]
        fn close_carries_reason_and_flag() {
            let message =
                parse_line(r#"{"type":"close","reason":{"code":"loggedOut"},"terminal":true}"#)
                    .unwrap();
            assert_eq!(
                message,
                BridgeMessage::Close {
                    reason: CloseReason::LoggedOut,
                    terminal: true
                }
            );
        }

        #[test]
        fn open_carries_account() {
            let message = parse_line(r#"{"type":"open","account":"me@s.whatsapp.net"}"#).unwrap();
            assert_eq!(
                message,
                BridgeMessage::Open {
                    account: Some("me@s.whatsapp.net".to_string())
                }
            );
        }

        #[test]
        fn reply_decodes_media() {
            let message = parse_line(r#"{"type":"reply","id":3,"ok":true,"data":"AQID"}"#).unwrap();
            let BridgeMessage::Reply(reply) = message else {
                panic!("expected reply");
            };
            assert_eq!(reply.id, 3);
            assert_eq!(reply.into_bytes().unwrap(), Some(vec![1, 2, 3]));
        }

        #[test]
        fn failed_reply_is_an_error() {
            let reply = Reply {
                id: 1,
                ok: false,
                data: None,
                error: Some("not on whatsapp".to_string()),
            };
            assert!(matches!(
                reply.into_result(),
                Err(ProtocolError::Other(msg)) if msg == "not on whatsapp"
            ));
        }

        #[test]
        fn junk_lines_are_skipped() {
            assert!(parse_line("").is_none());
            assert!(parse_line("   ").is_none());
            assert!(parse_line("not json").is_none());
            assert!(parse_line(r#"{"type":"unknown"}"#).is_none());
        }

        #[test]
        fn inbound_message_line() {
            let line = json!({
                "type": "message",
                "message": {
                    "id": "M1",
                    "chatId": "bob@s.whatsapp.net",
                    "senderId": "bob@s.whatsapp.net",
                    "content": { "conversation": "hi" }
                }
            })
            .to_string();
            match parse_line(&line).and_then(BridgeMessage::into_event) {
                Some(ProtocolEvent::InboundMessage(message)) => {
                    assert_eq!(message.content.extract_text(), Some("hi"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
