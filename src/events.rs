//! Inbound events from the messaging layer and the actions sent back to it.

use crate::dialogue::Choice;
use crate::session_store::UserKey;

/// Something a user did
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub user_id: UserKey,
    pub chat_id: i64,
    /// IETF tag reported by the client, used to pick reply language
    pub language_code: Option<String>,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// A file upload, already fetched into memory
    Document {
        bytes: Vec<u8>,
        file_name: Option<String>,
    },
    Text {
        text: String,
    },
    /// Inline keyboard press; `message_id` identifies the message carrying the keyboard
    Button {
        data: String,
        message_id: Option<i32>,
    },
    /// `/name arg1 arg2 ...`
    Command {
        name: String,
        args: Vec<String>,
    },
}

impl Event {
    pub fn new(user_id: UserKey, chat_id: i64, kind: EventKind) -> Self {
        Self {
            user_id,
            chat_id,
            language_code: None,
            kind,
        }
    }

    pub fn with_language(mut self, language_code: Option<String>) -> Self {
        self.language_code = language_code;
        self
    }

    pub fn document(user_id: UserKey, chat_id: i64, bytes: Vec<u8>) -> Self {
        Self::new(
            user_id,
            chat_id,
            EventKind::Document {
                bytes,
                file_name: None,
            },
        )
    }

    pub fn text(user_id: UserKey, chat_id: i64, text: impl Into<String>) -> Self {
        Self::new(user_id, chat_id, EventKind::Text { text: text.into() })
    }

    pub fn button(user_id: UserKey, chat_id: i64, data: impl Into<String>) -> Self {
        Self::new(
            user_id,
            chat_id,
            EventKind::Button {
                data: data.into(),
                message_id: None,
            },
        )
    }

    pub fn command(user_id: UserKey, chat_id: i64, name: impl Into<String>) -> Self {
        Self::new(
            user_id,
            chat_id,
            EventKind::Command {
                name: name.into(),
                args: Vec::new(),
            },
        )
    }
}

/// Split `/name@bot a b c` into its command name and arguments
pub fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((
        name.to_lowercase(),
        parts.map(str::to_string).collect(),
    ))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyboardButton {
    pub label: String,
    pub choice: Choice,
}

/// Inline keyboard, row by row
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<KeyboardButton>>,
}

impl Keyboard {
    pub fn buttons(&self) -> impl Iterator<Item = &KeyboardButton> {
        self.rows.iter().flatten()
    }
}

/// Something the messaging layer must render
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    SendText {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    SendDocument {
        chat_id: i64,
        bytes: Vec<u8>,
        filename: String,
    },
    EditMessage {
        chat_id: i64,
        message_id: i32,
        text: String,
    },
}
