//! Inbound events from both platforms and their reduction to photo jobs.

use std::cmp::Reverse;
use std::fmt;

use thiserror::Error;
use url::Url;

use crate::telegram::types::Message as TelegramMessage;
use crate::vk::types::VkMessage;

/// Handle needed to obtain a photo's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoReference {
    Url(Url),
    TelegramFile(String),
}

impl fmt::Display for PhotoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoReference::Url(url) => write!(f, "{url}"),
            PhotoReference::TelegramFile(file_id) => write!(f, "tg-file:{file_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderIdentity {
    /// Numeric user id; the short address is looked up per photo.
    Vk { user_id: i64 },
    /// Username without `@`, or the first name when no username is set.
    Telegram { handle: String, is_username: bool },
}

impl SenderIdentity {
    pub fn platform(&self) -> &'static str {
        match self {
            SenderIdentity::Vk { .. } => "vk",
            SenderIdentity::Telegram { .. } => "telegram",
        }
    }
}

/// One photo to run through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoJob {
    pub reference: PhotoReference,
    pub sender: SenderIdentity,
}

/// Caption-ready sender string, HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution(String);

impl Attribution {
    pub fn vk(user_id: i64, domain: &str) -> Self {
        Self(format!(
            "<a href=\"vk.com/id{}\">@{} (VK)</a>",
            user_id,
            escape_html(domain)
        ))
    }

    pub fn telegram(handle: &str, is_username: bool) -> Self {
        let handle = escape_html(handle);
        if is_username {
            Self(format!("@{handle}"))
        } else {
            Self(handle)
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("message has no usable sender")]
    NoSender,
    #[error("photo attachment has no downloadable size")]
    NoPhotoUrl,
    #[error("invalid photo url {0}")]
    BadUrl(String),
}

/// Inbound event from one of the monitored sources.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    VkMessageNew(VkMessage),
    TelegramMessage(TelegramMessage),
}

/// Which VK conversation is relayed.
#[derive(Debug, Clone, Copy)]
pub struct SourceFilter {
    pub vk_peer_id: i64,
}

impl SourceEvent {
    /// Photo jobs carried by the event. Events outside the monitored
    /// conversation, and events without photos, produce no jobs.
    pub fn into_jobs(self, filter: SourceFilter) -> Result<Vec<PhotoJob>, MalformedEvent> {
        match self {
            SourceEvent::VkMessageNew(message) => vk_jobs(message, filter.vk_peer_id),
            SourceEvent::TelegramMessage(message) => telegram_jobs(message),
        }
    }
}

fn vk_jobs(message: VkMessage, peer_id: i64) -> Result<Vec<PhotoJob>, MalformedEvent> {
    if message.peer_id != peer_id {
        return Ok(Vec::new());
    }

    let photos: Vec<_> = message
        .attachments
        .iter()
        .filter(|a| a.kind == "photo")
        .collect();
    if photos.is_empty() {
        return Ok(Vec::new());
    }
    // Negative ids are communities, which have no user profile.
    if message.from_id <= 0 {
        return Err(MalformedEvent::NoSender);
    }

    let sender = SenderIdentity::Vk {
        user_id: message.from_id,
    };
    photos
        .into_iter()
        .map(|attachment| {
            let raw = attachment
                .photo
                .as_ref()
                .and_then(|p| p.largest_url())
                .ok_or(MalformedEvent::NoPhotoUrl)?;
            let url = Url::parse(raw).map_err(|_| MalformedEvent::BadUrl(raw.to_string()))?;
            Ok(PhotoJob {
                reference: PhotoReference::Url(url),
                sender: sender.clone(),
            })
        })
        .collect()
}

fn telegram_jobs(message: TelegramMessage) -> Result<Vec<PhotoJob>, MalformedEvent> {
    let Some(mut sizes) = message.photo.filter(|p| !p.is_empty()) else {
        return Ok(Vec::new());
    };

    let from = message.from.ok_or(MalformedEvent::NoSender)?;
    let sender = match from.username {
        Some(username) if !username.is_empty() => SenderIdentity::Telegram {
            handle: username,
            is_username: true,
        },
        _ if !from.first_name.is_empty() => SenderIdentity::Telegram {
            handle: from.first_name,
            is_username: false,
        },
        _ => return Err(MalformedEvent::NoSender),
    };

    // Highest resolution first; sizes without a byte count go last.
    sizes.sort_by_key(|s| Reverse(s.file_size.unwrap_or(0)));
    let best = sizes.swap_remove(0);

    Ok(vec![PhotoJob {
        reference: PhotoReference::TelegramFile(best.file_id),
        sender,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::types::{PhotoSize, User};
    use crate::vk::types::{VkAttachment, VkPhoto, VkPhotoSize};

    const PEER: i64 = 2000000001;

    fn filter() -> SourceFilter {
        SourceFilter { vk_peer_id: PEER }
    }

    fn vk_photo(url: &str) -> VkAttachment {
        VkAttachment {
            kind: "photo".into(),
            photo: Some(VkPhoto {
                sizes: vec![
                    VkPhotoSize {
                        kind: "m".into(),
                        url: format!("{url}?small"),
                        width: 130,
                        height: 87,
                    },
                    VkPhotoSize {
                        kind: "z".into(),
                        url: url.into(),
                        width: 1080,
                        height: 720,
                    },
                ],
            }),
        }
    }

    fn vk_message(peer_id: i64, from_id: i64, attachments: Vec<VkAttachment>) -> SourceEvent {
        SourceEvent::VkMessageNew(VkMessage {
            from_id,
            peer_id,
            attachments,
        })
    }

    fn tg_size(file_id: &str, file_size: Option<u64>) -> PhotoSize {
        PhotoSize {
            file_id: file_id.into(),
            file_size,
        }
    }

    fn tg_message(username: Option<&str>, photo: Option<Vec<PhotoSize>>) -> SourceEvent {
        SourceEvent::TelegramMessage(TelegramMessage {
            message_id: 1,
            from: Some(User {
                first_name: "Alice".into(),
                username: username.map(str::to_string),
            }),
            photo,
        })
    }

    #[test]
    fn vk_messages_from_other_conversations_are_ignored() {
        let event = vk_message(PEER + 1, 42, vec![vk_photo("https://vk.test/a.jpg")]);
        assert_eq!(event.into_jobs(filter()).unwrap(), vec![]);
    }

    #[test]
    fn vk_every_photo_attachment_becomes_a_job_with_largest_url() {
        let sticker = VkAttachment {
            kind: "sticker".into(),
            photo: None,
        };
        let event = vk_message(
            PEER,
            42,
            vec![
                vk_photo("https://vk.test/a.jpg"),
                sticker,
                vk_photo("https://vk.test/b.jpg"),
            ],
        );
        let jobs = event.into_jobs(filter()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs[0].reference,
            PhotoReference::Url(Url::parse("https://vk.test/a.jpg").unwrap())
        );
        assert_eq!(
            jobs[1].reference,
            PhotoReference::Url(Url::parse("https://vk.test/b.jpg").unwrap())
        );
        assert!(jobs.iter().all(|j| j.sender == SenderIdentity::Vk { user_id: 42 }));
    }

    #[test]
    fn vk_photo_without_sizes_is_malformed() {
        let empty = VkAttachment {
            kind: "photo".into(),
            photo: Some(VkPhoto { sizes: vec![] }),
        };
        let event = vk_message(PEER, 42, vec![empty]);
        assert_eq!(event.into_jobs(filter()), Err(MalformedEvent::NoPhotoUrl));
    }

    #[test]
    fn vk_community_sender_is_malformed() {
        let event = vk_message(PEER, -77, vec![vk_photo("https://vk.test/a.jpg")]);
        assert_eq!(event.into_jobs(filter()), Err(MalformedEvent::NoSender));
    }

    #[test]
    fn telegram_picks_largest_file_size() {
        let event = tg_message(
            Some("alice"),
            Some(vec![
                tg_size("small", Some(1_000)),
                tg_size("unknown", None),
                tg_size("large", Some(90_000)),
                tg_size("medium", Some(20_000)),
            ]),
        );
        let jobs = event.into_jobs(filter()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].reference,
            PhotoReference::TelegramFile("large".into())
        );
        assert_eq!(
            jobs[0].sender,
            SenderIdentity::Telegram {
                handle: "alice".into(),
                is_username: true
            }
        );
    }

    #[test]
    fn telegram_message_without_photo_yields_nothing() {
        assert_eq!(tg_message(Some("a"), None).into_jobs(filter()).unwrap(), vec![]);
        assert_eq!(
            tg_message(Some("a"), Some(vec![])).into_jobs(filter()).unwrap(),
            vec![]
        );
    }

    #[test]
    fn telegram_without_username_falls_back_to_first_name() {
        let jobs = tg_message(None, Some(vec![tg_size("f", Some(1))]))
            .into_jobs(filter())
            .unwrap();
        assert_eq!(
            jobs[0].sender,
            SenderIdentity::Telegram {
                handle: "Alice".into(),
                is_username: false
            }
        );
    }

    #[test]
    fn telegram_without_sender_is_malformed() {
        let SourceEvent::TelegramMessage(mut message) =
            tg_message(Some("a"), Some(vec![tg_size("f", Some(1))]))
        else {
            unreachable!()
        };
        message.from = None;
        assert_eq!(
            SourceEvent::TelegramMessage(message).into_jobs(filter()),
            Err(MalformedEvent::NoSender)
        );
    }

    #[test]
    fn attribution_formats() {
        assert_eq!(
            Attribution::vk(42, "durov").to_string(),
            "<a href=\"vk.com/id42\">@durov (VK)</a>"
        );
        assert_eq!(Attribution::telegram("alice", true).to_string(), "@alice");
        assert_eq!(Attribution::telegram("Al <b>", false).to_string(), "Al &lt;b&gt;");
    }
}
