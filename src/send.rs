//! Outgoing text, files and media.
//!
//! Files are uploaded through the configured [`Uploader`] and then referenced
//! by media id. Argument checks run before any file is read or uploaded.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{OutboundMessage, UploadedMedia, Uploader};

const DEFAULT_IMAGE_NAME: &str = "default.png";
const DEFAULT_VIDEO_NAME: &str = "default.mp4";

/// Where the bytes of an outgoing file come from. Exactly one of `path`,
/// `bytes` and `media_id` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingFile {
    pub path: Option<PathBuf>,
    pub bytes: Option<Vec<u8>>,
    /// Id of media uploaded earlier.
    pub media_id: Option<String>,
    pub file_size: Option<u64>,
    /// Overrides the name taken from `path`.
    pub file_name: Option<String>,
}

impl OutgoingFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            ..Default::default()
        }
    }

    pub fn from_media_id(media_id: impl Into<String>) -> Self {
        Self {
            media_id: Some(media_id.into()),
            ..Default::default()
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    fn source_count(&self) -> usize {
        [self.path.is_some(), self.bytes.is_some(), self.media_id.is_some()]
            .iter()
            .filter(|set| **set)
            .count()
    }

    fn resolved_name(&self) -> Option<String> {
        self.file_name.clone().or_else(|| {
            self.path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
    }
}

/// Outcome of [`Client::send_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub msg_id: String,
    pub media_id: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    File,
    Image,
    Emoticon,
    Video,
}

/// A file that passed argument checks, with its final name.
struct PreparedFile {
    file: OutgoingFile,
    name: String,
    uploader: Option<Arc<dyn Uploader>>,
}

impl Client {
    pub async fn send_text(&self, text: &str, to: &str) -> ClientResult<String> {
        debug!(target: "Client/Send", "Sending text to {}", to);
        let session = self.require_login().await?;
        let message = OutboundMessage::Text {
            to: to.to_string(),
            text: text.to_string(),
        };
        self.transport.send(&session, &message).await
    }

    /// Send a document. Returns the message id together with the media id and
    /// size so the upload can be reused.
    pub async fn send_file(&self, to: &str, file: OutgoingFile) -> ClientResult<SentFile> {
        let prepared = self.prepare(file, MediaKind::File)?;
        let session = self.require_login().await?;
        let name = prepared.name.clone();
        let media = self.resolve_media(prepared, to).await?;
        let message = OutboundMessage::File {
            to: to.to_string(),
            media_id: media.media_id.clone(),
            file_name: name,
            file_size: media.size,
        };
        let msg_id = self.transport.send(&session, &message).await?;
        Ok(SentFile {
            msg_id,
            media_id: media.media_id,
            file_size: media.size,
        })
    }

    pub async fn send_image(&self, to: &str, file: OutgoingFile) -> ClientResult<String> {
        self.send_media(to, file, MediaKind::Image).await
    }

    /// Send an animated sticker.
    pub async fn send_emoticon(&self, to: &str, file: OutgoingFile) -> ClientResult<String> {
        self.send_media(to, file, MediaKind::Emoticon).await
    }

    pub async fn send_video(&self, to: &str, file: OutgoingFile) -> ClientResult<String> {
        self.send_media(to, file, MediaKind::Video).await
    }

    /// Revoke a message sent earlier.
    pub async fn revoke(&self, msg_id: &str, to: &str, local_id: Option<&str>) -> ClientResult<()> {
        let session = self.require_login().await?;
        self.transport.revoke(&session, msg_id, to, local_id).await
    }

    async fn send_media(&self, to: &str, file: OutgoingFile, kind: MediaKind) -> ClientResult<String> {
        let prepared = self.prepare(file, kind)?;
        let session = self.require_login().await?;
        debug!(target: "Client/Send", "Sending {:?} {} to {}", kind, prepared.name, to);
        let media = self.resolve_media(prepared, to).await?;
        let to = to.to_string();
        let media_id = media.media_id;
        let message = match kind {
            MediaKind::Image => OutboundMessage::Image { to, media_id },
            MediaKind::Emoticon => OutboundMessage::Emoticon { to, media_id },
            _ => OutboundMessage::Video { to, media_id },
        };
        self.transport.send(&session, &message).await
    }

    /// Check arguments without touching the file system or the network.
    fn prepare(&self, file: OutgoingFile, kind: MediaKind) -> ClientResult<PreparedFile> {
        if file.source_count() != 1 {
            return Err(malformed(format!(
                "cannot tell which file to send: path {:?}, bytes {}, media id {:?}",
                file.path,
                file.bytes.is_some(),
                file.media_id
            )));
        }
        if kind == MediaKind::File && file.media_id.is_some() != file.file_size.is_some() {
            return Err(malformed("must specify both media_id and file_size or neither".into()));
        }

        let name = match (file.resolved_name(), kind) {
            (Some(name), _) => name,
            (None, MediaKind::Image) | (None, MediaKind::Emoticon) => DEFAULT_IMAGE_NAME.to_string(),
            (None, MediaKind::Video) => DEFAULT_VIDEO_NAME.to_string(),
            (None, MediaKind::File) => return Err(malformed("a file name is required".into())),
        };

        let uploader = self.uploader.clone();
        if file.media_id.is_none() && uploader.is_none() {
            return Err(malformed("no uploader configured to upload the file".into()));
        }
        Ok(PreparedFile { file, name, uploader })
    }

    /// Media id and size of a prepared file, uploading it when needed.
    async fn resolve_media(&self, prepared: PreparedFile, to: &str) -> ClientResult<UploadedMedia> {
        let PreparedFile { file, name, uploader } = prepared;
        if let Some(media_id) = file.media_id {
            return Ok(UploadedMedia {
                media_id,
                size: file.file_size.unwrap_or_default(),
            });
        }
        let uploader = uploader.ok_or_else(|| malformed("no uploader configured to upload the file".into()))?;
        let bytes = match (file.path, file.bytes) {
            (Some(path), _) => tokio::fs::read(&path).await?,
            (None, Some(bytes)) => bytes,
            (None, None) => return Err(malformed("nothing to upload".into())),
        };
        uploader.upload(&name, bytes, to).await
    }
}

fn malformed(message: String) -> ClientError {
    warn!(target: "Client/Send", "{}", message);
    ClientError::MalformedParameter(message)
}
