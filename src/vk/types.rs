//! VK API payloads used by the relay: Bots Long Poll events, messages with
//! photo attachments and `users.get` profiles.

use serde::Deserialize;
use serde_json::Value;

/// Envelope of every VK method call.
#[derive(Debug, Deserialize)]
pub struct VkResponse<T> {
    pub response: Option<T>,
    pub error: Option<VkApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkApiError {
    pub error_code: i64,
    pub error_msg: String,
}

/// Result of `groups.getLongPollServer`.
#[derive(Debug, Clone, Deserialize)]
pub struct LongPollServer {
    pub key: String,
    pub server: String,
    #[serde(deserialize_with = "ts_string")]
    pub ts: String,
}

/// One `a_check` answer. Either `updates` + `ts`, or `failed`.
#[derive(Debug, Deserialize)]
pub struct LongPollBatch {
    #[serde(default, deserialize_with = "opt_ts_string")]
    pub ts: Option<String>,
    #[serde(default)]
    pub updates: Vec<GroupEvent>,
    pub failed: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub object: Value,
}

/// `message_new` event object.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageNew {
    pub message: VkMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkMessage {
    pub from_id: i64,
    pub peer_id: i64,
    #[serde(default)]
    pub attachments: Vec<VkAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub photo: Option<VkPhoto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkPhoto {
    #[serde(default)]
    pub sizes: Vec<VkPhotoSize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkPhotoSize {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

// Size letters from smallest to largest; crops (o..r) sit between m and y.
const SIZE_RANK: [&str; 10] = ["s", "m", "x", "o", "p", "q", "r", "y", "z", "w"];

impl VkPhotoSize {
    fn rank(&self) -> usize {
        SIZE_RANK
            .iter()
            .position(|k| *k == self.kind)
            .map(|p| p + 1)
            .unwrap_or(0)
    }
}

impl VkPhoto {
    /// URL of the largest rendition. Old photos report zero dimensions, so
    /// the size letter breaks ties.
    pub fn largest_url(&self) -> Option<&str> {
        self.sizes
            .iter()
            .filter(|s| !s.url.is_empty())
            .max_by_key(|s| (u64::from(s.width) * u64::from(s.height), s.rank()))
            .map(|s| s.url.as_str())
    }
}

/// `users.get` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VkUser {
    pub id: i64,
    pub domain: Option<String>,
}

fn ts_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid ts {other}"))),
    }
}

fn opt_ts_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ts_string(de).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(kind: &str, url: &str, width: u32, height: u32) -> VkPhotoSize {
        VkPhotoSize {
            kind: kind.into(),
            url: url.into(),
            width,
            height,
        }
    }

    #[test]
    fn largest_url_prefers_biggest_area() {
        let photo = VkPhoto {
            sizes: vec![
                size("s", "small", 75, 50),
                size("z", "large", 1080, 720),
                size("x", "medium", 604, 403),
            ],
        };
        assert_eq!(photo.largest_url(), Some("large"));
    }

    #[test]
    fn largest_url_uses_size_letter_without_dimensions() {
        let photo = VkPhoto {
            sizes: vec![
                size("x", "x-url", 0, 0),
                size("w", "w-url", 0, 0),
                size("m", "m-url", 0, 0),
            ],
        };
        assert_eq!(photo.largest_url(), Some("w-url"));
        assert_eq!(VkPhoto { sizes: vec![] }.largest_url(), None);
    }

    #[test]
    fn deserialize_message_new_with_photo() {
        let json = r#"{
            "message": {
                "date": 1700000000,
                "from_id": 42,
                "id": 0,
                "peer_id": 2000000001,
                "text": "",
                "attachments": [
                    { "type": "photo", "photo": { "id": 1, "owner_id": 42, "sizes": [
                        { "type": "m", "url": "https://sun.userapi.com/m.jpg", "width": 130, "height": 87 },
                        { "type": "y", "url": "https://sun.userapi.com/y.jpg", "width": 807, "height": 538 }
                    ] } },
                    { "type": "sticker", "sticker": { "sticker_id": 9 } }
                ]
            },
            "client_info": { "keyboard": true }
        }"#;
        let event: MessageNew = serde_json::from_str(json).unwrap();
        assert_eq!(event.message.from_id, 42);
        assert_eq!(event.message.attachments.len(), 2);
        let photo = event.message.attachments[0].photo.as_ref().unwrap();
        assert_eq!(photo.largest_url(), Some("https://sun.userapi.com/y.jpg"));
        assert!(event.message.attachments[1].photo.is_none());
    }

    #[test]
    fn long_poll_batch_accepts_numeric_or_string_ts() {
        let batch: LongPollBatch =
            serde_json::from_str(r#"{ "ts": "15", "updates": [] }"#).unwrap();
        assert_eq!(batch.ts.as_deref(), Some("15"));

        let failed: LongPollBatch = serde_json::from_str(r#"{ "failed": 1, "ts": 30 }"#).unwrap();
        assert_eq!(failed.failed, Some(1));
        assert_eq!(failed.ts.as_deref(), Some("30"));

        let expired: LongPollBatch = serde_json::from_str(r#"{ "failed": 2 }"#).unwrap();
        assert!(expired.ts.is_none());
    }
}
