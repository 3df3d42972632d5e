//! Content variants and message-type dispatch.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::error::ClientResult;
use crate::types::RawEvent;

/// Numeric message-type codes used by the server.
pub mod msg_type {
    pub const TEXT: u32 = 1;
    pub const IMAGE: u32 = 3;
    pub const VOICE: u32 = 34;
    pub const FRIEND_REQUEST: u32 = 37;
    pub const CARD: u32 = 42;
    pub const VIDEO: u32 = 43;
    pub const EMOTICON: u32 = 47;
    pub const APP: u32 = 49;
    pub const MICRO_VIDEO: u32 = 62;
    pub const SYSTEM: u32 = 10000;
    pub const REVOKE: u32 = 10002;
    /// Codes carrying nothing a consumer can act on (status notices, VoIP, locations...).
    pub const USELESS: [u32; 5] = [40, 50, 52, 53, 9999];
}

/// Secondary codes of shared/app messages.
pub mod app_msg_type {
    pub const PLAIN: u32 = 0;
    pub const LINK: u32 = 5;
    pub const ATTACHMENT: u32 = 6;
    pub const EMOTICON: u32 = 8;
    pub const FILE_NOTICE: u32 = 17;
    pub const TRANSFER: u32 = 2000;
}

const TRANSFER_PLACEHOLDER: &str = "You may found detailed info in Content key.";
const LINK_PLACEHOLDER: &str = "[link payload without title or url]";
const ATTACHMENT_PLACEHOLDER: &str = "[attachment payload without total length]";
const REVOKE_PLACEHOLDER: &str = "[revoke payload without message id]";

lazy_static! {
    static ref TITLE_RE: Regex = Regex::new(r"(?s)<title>(.*?)</title>").expect("valid title regex");
    static ref URL_RE: Regex = Regex::new(r"(?s)<url>(.*?)</url>").expect("valid url regex");
    static ref SOURCE_RE: Regex =
        Regex::new(r"(?s)<sourcedisplayname>(.*?)</sourcedisplayname>").expect("valid source regex");
    static ref APP_NAME_RE: Regex = Regex::new(r"(?s)<appname>(.*?)</appname>").expect("valid appname regex");
    static ref TOTAL_LEN_RE: Regex = Regex::new(r"<totallen>\s*(\d+)\s*</totallen>").expect("valid totallen regex");
    static ref ATTACH_ID_RE: Regex = Regex::new(r"(?s)<attachid>(.*?)</attachid>").expect("valid attachid regex");
    static ref REVOKED_ID_RE: Regex = Regex::new(r"<msgid>\s*(\d+)\s*</msgid>").expect("valid msgid regex");
    static ref TRANSFER_RE: Regex =
        Regex::new(r"\[CDATA\[(.+?)\][\s\S]+?\[CDATA\[(.+?)\]").expect("valid transfer regex");
}

/// What a lazy media fetch should retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    Image { msg_id: String },
    Voice { msg_id: String },
    Video { msg_id: String },
    Attachment {
        sender: String,
        media_id: String,
        file_name: String,
    },
    UserHeadImage { username: String },
    ChatroomHeadImage { chatroom: String },
    MemberHeadImage { username: String, chatroom_id: String },
}

/// Something able to resolve a [`MediaRequest`] into bytes.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, request: &MediaRequest) -> ClientResult<Vec<u8>>;
}

/// Lazy fetch capability attached to media content.
#[derive(Clone)]
pub struct MediaHandle {
    request: MediaRequest,
    downloader: Arc<dyn MediaDownloader>,
}

impl MediaHandle {
    pub fn new(request: MediaRequest, downloader: Arc<dyn MediaDownloader>) -> Self {
        Self { request, downloader }
    }

    pub fn request(&self) -> &MediaRequest {
        &self.request
    }

    /// Download the media bytes.
    pub async fn fetch(&self) -> ClientResult<Vec<u8>> {
        self.downloader.download(&self.request).await
    }

    /// Download the media bytes into a file.
    pub async fn fetch_to(&self, path: impl AsRef<std::path::Path>) -> ClientResult<()> {
        let bytes = self.fetch().await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Discriminant of [`Content`], used for handler filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Voice,
    Attachment,
    Link,
    System,
    Revoke,
    Default,
    Useless,
}

/// Decoded payload of a message.
#[derive(Debug, Clone)]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        media: MediaHandle,
    },
    Video {
        media: MediaHandle,
    },
    Voice {
        media: MediaHandle,
    },
    Attachment {
        sender: String,
        media_id: String,
        file_name: String,
        size: u64,
        media: MediaHandle,
    },
    Link {
        title: String,
        source: String,
        url: String,
    },
    System {
        text: String,
    },
    Revoke {
        revoked_message_id: String,
    },
    Default {
        text: String,
    },
    Useless {
        text: String,
    },
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Text { .. } => ContentKind::Text,
            Content::Image { .. } => ContentKind::Image,
            Content::Video { .. } => ContentKind::Video,
            Content::Voice { .. } => ContentKind::Voice,
            Content::Attachment { .. } => ContentKind::Attachment,
            Content::Link { .. } => ContentKind::Link,
            Content::System { .. } => ContentKind::System,
            Content::Revoke { .. } => ContentKind::Revoke,
            Content::Default { .. } => ContentKind::Default,
            Content::Useless { .. } => ContentKind::Useless,
        }
    }

    /// Textual payload, for variants that carry one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text { text }
            | Content::System { text }
            | Content::Default { text }
            | Content::Useless { text } => Some(text),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaHandle> {
        match self {
            Content::Image { media }
            | Content::Video { media }
            | Content::Voice { media }
            | Content::Attachment { media, .. } => Some(media),
            _ => None,
        }
    }

    /// Build content from an event whose body has already been normalised.
    /// Never fails: unknown or malformed payloads become [`Content::Default`].
    pub fn from_event(event: &RawEvent, downloader: &Arc<dyn MediaDownloader>) -> Content {
        let media = |request: MediaRequest| MediaHandle::new(request, downloader.clone());
        let msg_id = || event.msg_id.clone();

        match event.msg_type {
            msg_type::TEXT | msg_type::CARD => Content::Text {
                text: event.content.clone(),
            },
            msg_type::IMAGE | msg_type::EMOTICON => Content::Image {
                media: media(MediaRequest::Image { msg_id: msg_id() }),
            },
            msg_type::VOICE => Content::Voice {
                media: media(MediaRequest::Voice { msg_id: msg_id() }),
            },
            msg_type::VIDEO | msg_type::MICRO_VIDEO => Content::Video {
                media: media(MediaRequest::Video { msg_id: msg_id() }),
            },
            msg_type::APP => Self::from_app_event(event, downloader),
            msg_type::SYSTEM => Content::System {
                text: event.content.clone(),
            },
            msg_type::REVOKE => match parse_revoked_id(&event.content) {
                Some(revoked_message_id) => Content::Revoke { revoked_message_id },
                None => Content::Default {
                    text: REVOKE_PLACEHOLDER.into(),
                },
            },
            code if msg_type::USELESS.contains(&code) => Content::Useless {
                text: "useless message".into(),
            },
            code => {
                warn!(target: "Client/Decoder", "Unknown message type {}: {}", code, event.content);
                Content::Default {
                    text: event.content.clone(),
                }
            }
        }
    }

    fn from_app_event(event: &RawEvent, downloader: &Arc<dyn MediaDownloader>) -> Content {
        match event.app_msg_type {
            app_msg_type::PLAIN => Content::Default {
                text: event.content.clone(),
            },
            app_msg_type::LINK => match parse_link(&event.content, &event.url) {
                Some((title, source, url)) => Content::Link { title, source, url },
                None => Content::Default {
                    text: LINK_PLACEHOLDER.into(),
                },
            },
            app_msg_type::ATTACHMENT => match parse_total_len(&event.content) {
                Some(size) => {
                    let media_id = if event.media_id.is_empty() {
                        capture(&ATTACH_ID_RE, &event.content).unwrap_or_default()
                    } else {
                        event.media_id.clone()
                    };
                    let request = MediaRequest::Attachment {
                        sender: event.from_user_name.clone(),
                        media_id: media_id.clone(),
                        file_name: event.file_name.clone(),
                    };
                    Content::Attachment {
                        sender: event.from_user_name.clone(),
                        media_id,
                        file_name: event.file_name.clone(),
                        size,
                        media: MediaHandle::new(request, downloader.clone()),
                    }
                }
                None => Content::Default {
                    text: ATTACHMENT_PLACEHOLDER.into(),
                },
            },
            app_msg_type::EMOTICON => Content::Image {
                media: MediaHandle::new(
                    MediaRequest::Image {
                        msg_id: event.msg_id.clone(),
                    },
                    downloader.clone(),
                ),
            },
            app_msg_type::FILE_NOTICE => Content::Default {
                text: event.file_name.clone(),
            },
            app_msg_type::TRANSFER => Content::Default {
                text: parse_transfer_summary(&event.content)
                    .unwrap_or_else(|| TRANSFER_PLACEHOLDER.into()),
            },
            code => {
                warn!(target: "Client/Decoder", "Unknown app message type {}: {}", code, event.content);
                Content::Default {
                    text: event.content.clone(),
                }
            }
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text { text } => write!(f, "{}", text),
            Content::Image { .. } => write!(f, "[image]"),
            Content::Video { .. } => write!(f, "[video]"),
            Content::Voice { .. } => write!(f, "[voice]"),
            Content::Attachment { file_name, size, .. } => {
                write!(f, "[attachment {} ({} bytes)]", file_name, size)
            }
            Content::Link { title, url, .. } => write!(f, "[link {} {}]", title, url),
            Content::System { text } => write!(f, "[system] {}", text),
            Content::Revoke { revoked_message_id } => write!(f, "[revoke {}]", revoked_message_id),
            Content::Default { text } => write!(f, "[default] {}", text),
            Content::Useless { .. } => write!(f, "[useless]"),
        }
    }
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| strip_cdata(m.as_str()).trim().to_string())
}

fn strip_cdata(value: &str) -> &str {
    value
        .trim()
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .unwrap_or(value)
}

/// Extract `(title, source, url)` from an app-message link payload.
pub(crate) fn parse_link(body: &str, fallback_url: &str) -> Option<(String, String, String)> {
    if !body.contains("<appmsg") {
        return None;
    }
    let title = capture(&TITLE_RE, body).filter(|t| !t.is_empty())?;
    let url = capture(&URL_RE, body)
        .filter(|u| !u.is_empty())
        .or_else(|| Some(fallback_url.to_string()).filter(|u| !u.is_empty()))?;
    let source = capture(&SOURCE_RE, body)
        .filter(|s| !s.is_empty())
        .or_else(|| capture(&APP_NAME_RE, body))
        .unwrap_or_default();
    Some((title, source, url))
}

/// Declared total length of an attachment payload.
pub(crate) fn parse_total_len(body: &str) -> Option<u64> {
    TOTAL_LEN_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Id of the message a revoke notice refers to.
pub(crate) fn parse_revoked_id(body: &str) -> Option<String> {
    REVOKED_ID_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn parse_transfer_summary(body: &str) -> Option<String> {
    let data = TRANSFER_RE.captures(body)?.get(2)?.as_str();
    data.split('\u{3002}').next().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    struct NoDownload;

    #[async_trait]
    impl MediaDownloader for NoDownload {
        async fn download(&self, request: &MediaRequest) -> ClientResult<Vec<u8>> {
            Err(ClientError::Network(format!("offline: {:?}", request)))
        }
    }

    fn downloader() -> Arc<dyn MediaDownloader> {
        Arc::new(NoDownload)
    }

    fn app_event(app_type: u32, body: &str) -> RawEvent {
        RawEvent::new("9", "@alice", "@me", msg_type::APP, body).with_app_msg_type(app_type)
    }

    #[test]
    fn test_basic_type_dispatch() {
        let dl = downloader();
        let cases = [
            (msg_type::TEXT, ContentKind::Text),
            (msg_type::IMAGE, ContentKind::Image),
            (msg_type::EMOTICON, ContentKind::Image),
            (msg_type::VOICE, ContentKind::Voice),
            (msg_type::VIDEO, ContentKind::Video),
            (msg_type::MICRO_VIDEO, ContentKind::Video),
            (msg_type::CARD, ContentKind::Text),
            (msg_type::SYSTEM, ContentKind::System),
            (51, ContentKind::Default),
            (9999, ContentKind::Useless),
        ];
        for (code, kind) in cases {
            let event = RawEvent::new("1", "@a", "@me", code, "body");
            assert_eq!(Content::from_event(&event, &dl).kind(), kind, "code {}", code);
        }
    }

    #[test]
    fn test_unknown_code_keeps_raw_body() {
        let event = RawEvent::new("1", "@a", "@me", 777, "strange payload");
        let content = Content::from_event(&event, &downloader());
        assert_eq!(content.kind(), ContentKind::Default);
        assert_eq!(content.text(), Some("strange payload"));
    }

    #[test]
    fn test_image_carries_lazy_handle() {
        let event = RawEvent::new("55", "@a", "@me", msg_type::IMAGE, "");
        let content = Content::from_event(&event, &downloader());
        assert_eq!(
            content.media().unwrap().request(),
            &MediaRequest::Image { msg_id: "55".into() }
        );
    }

    #[test]
    fn test_link_extraction() {
        let body = "<msg><appmsg appid=\"\"><title><![CDATA[Rust 2024]]></title><url>https://blog.example/r</url>\
                    <appinfo><appname>Blog</appname></appinfo></appmsg></msg>";
        match Content::from_event(&app_event(app_msg_type::LINK, body), &downloader()) {
            Content::Link { title, source, url } => {
                assert_eq!(title, "Rust 2024");
                assert_eq!(source, "Blog");
                assert_eq!(url, "https://blog.example/r");
            }
            other => panic!("expected link, got {:?}", other),
        }
    }

    #[test]
    fn test_link_without_title_falls_back() {
        let body = "<msg><appmsg><url>https://x</url></appmsg></msg>";
        let content = Content::from_event(&app_event(app_msg_type::LINK, body), &downloader());
        assert_eq!(content.text(), Some(LINK_PLACEHOLDER));
    }

    #[test]
    fn test_attachment_extraction() {
        let body = "<msg><appmsg><title>report.pdf</title><appattach><totallen>20480</totallen>\
                    <attachid>@cdn_abc</attachid></appattach></appmsg></msg>";
        let event = app_event(app_msg_type::ATTACHMENT, body).with_media("", "report.pdf");
        match Content::from_event(&event, &downloader()) {
            Content::Attachment { sender, media_id, file_name, size, .. } => {
                assert_eq!(sender, "@alice");
                assert_eq!(media_id, "@cdn_abc");
                assert_eq!(file_name, "report.pdf");
                assert_eq!(size, 20480);
            }
            other => panic!("expected attachment, got {:?}", other),
        }
    }

    #[test]
    fn test_attachment_without_length_falls_back() {
        let event = app_event(app_msg_type::ATTACHMENT, "<msg><appmsg></appmsg></msg>");
        let content = Content::from_event(&event, &downloader());
        assert_eq!(content.text(), Some(ATTACHMENT_PLACEHOLDER));
    }

    #[test]
    fn test_app_subtypes() {
        let dl = downloader();
        let notice = app_event(app_msg_type::FILE_NOTICE, "").with_media("", "shared.zip");
        assert_eq!(Content::from_event(&notice, &dl).text(), Some("shared.zip"));

        let transfer = app_event(
            app_msg_type::TRANSFER,
            "<des><![CDATA[x]]></des><pay><![CDATA[Received 5.00\u{3002}Tap to view]]></pay>",
        );
        assert_eq!(Content::from_event(&transfer, &dl).text(), Some("Received 5.00"));

        let bare_transfer = app_event(app_msg_type::TRANSFER, "nothing");
        assert_eq!(Content::from_event(&bare_transfer, &dl).text(), Some(TRANSFER_PLACEHOLDER));

        let unknown = app_event(4242, "raw app body");
        assert_eq!(Content::from_event(&unknown, &dl).text(), Some("raw app body"));
    }

    #[test]
    fn test_revoke_extraction() {
        let body = "<sysmsg type=\"revokemsg\"><revokemsg><session>1@chatroom</session>\
                    <oldmsgid>1601457293</oldmsgid><msgid>2351104337353368038</msgid></revokemsg></sysmsg>";
        let event = RawEvent::new("2", "@a", "@me", msg_type::REVOKE, body);
        match Content::from_event(&event, &downloader()) {
            Content::Revoke { revoked_message_id } => {
                assert_eq!(revoked_message_id, "2351104337353368038")
            }
            other => panic!("expected revoke, got {:?}", other),
        }
        let broken = RawEvent::new("3", "@a", "@me", msg_type::REVOKE, "<sysmsg/>");
        assert_eq!(
            Content::from_event(&broken, &downloader()).text(),
            Some(REVOKE_PLACEHOLDER)
        );
    }
}
