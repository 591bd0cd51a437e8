use serde::Deserialize;

/// A plain message value handed to the command layer. The transport builds
/// this from the wire types below; nothing past this point inspects a
/// Telegram-shaped object.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub text: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub text: Option<String>,
    pub chat: Chat,
    pub from: Option<User>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

impl Message {
    /// Flattens a wire message into an [`IncomingMessage`], dropping updates
    /// without text or sender.
    pub fn into_incoming(self) -> Option<IncomingMessage> {
        let from = self.from?;
        Some(IncomingMessage {
            text: self.text?,
            chat_id: self.chat.id,
            message_id: self.message_id,
            sender_id: from.id,
            username: from.username,
        })
    }
}
