use async_trait::async_trait;

use super::{CaptureHandler, CaptureRequest, FeatureError};
use crate::protocol::OutboundContent;

/// Re-sends captured content to the account owner's own chat.
///
/// Falls back to the originating chat when the connection does not know
/// the owner's chat id yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardToSelf;

impl ForwardToSelf {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureHandler for ForwardToSelf {
    async fn capture(&self, request: CaptureRequest) -> Result<(), FeatureError> {
        let target = request
            .connection
            .account_chat_id()
            .unwrap_or_else(|| request.chat_id.clone());
        let origin = request
            .quoted
            .participant
            .as_deref()
            .unwrap_or(&request.sender_id);
        let header = format!(
            "Captured from {} ({})",
            origin,
            request.captured_by.label()
        );

        let content = match request.quoted.message.media() {
            Some((kind, media)) => {
                let bytes = request
                    .connection
                    .download_media(&media.media)
                    .await?
                    .ok_or(FeatureError::MediaExpired)?;
                let caption = match media.caption.as_deref().filter(|c| !c.is_empty()) {
                    Some(original) => format!("{header}\n\n{original}"),
                    None => header,
                };
                OutboundContent::Media {
                    kind,
                    bytes,
                    mimetype: media.mimetype.clone(),
                    caption: Some(caption),
                }
            }
            None => {
                let text = request
                    .quoted
                    .message
                    .extract_text()
                    .ok_or(FeatureError::NothingToCapture)?;
                OutboundContent::Text(format!("{header}\n\n{text}"))
            }
        };

        log::info!(
            "Capturing quoted {} for {} into {}",
            request.quoted.context,
            request.user_id,
            target
        );
        request.connection.send(&target, content).await?;
        Ok(())
    }
}
