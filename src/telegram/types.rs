//! Telegram Bot API types for the subset of methods the relay calls.

use serde::Deserialize;

/// Envelope of every Bot API response: `{ ok, result?, description? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Absent for messages sent on behalf of channels.
    pub from: Option<User>,
    /// Available sizes of an attached photo, if any.
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub first_name: String,
    /// Without the leading `@`.
    pub username: Option<String>,
}

/// One rendition of a photo.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_size: Option<u64>,
}

/// Result of `getFile`; `file_path` is relative to the file download root.
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_path: Option<String>,
}
