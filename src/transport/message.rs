use serde::{Deserialize, Serialize};

/// Frames a client sends to a popsub-style WebSocket server.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        timestamp: u64,
    },
}

/// A message the server fans out to subscribers of `topic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
}
