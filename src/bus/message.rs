use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::transport::RawMessage;
use crate::utils::error::BusError;

/// A delivered message with its body decoded.
///
/// The wire envelope is a single JSON object: an optional `ReplyTo` field and
/// the application fields, which are flattened into `B`.
///
/// ```rust
/// # use busline::bus::Message;
/// # use busline::transport::RawMessage;
/// #[derive(serde::Deserialize)]
/// struct Ping { seq: u32 }
///
/// let raw = RawMessage::new(br#"{"ReplyTo":"pongs","seq":7}"#.to_vec());
/// let msg = Message::<Ping>::decode(raw).unwrap();
/// assert_eq!(msg.body.seq, 7);
/// assert_eq!(msg.reply_to(), Some("pongs"));
/// ```
#[derive(Debug, Clone)]
pub struct Message<B> {
    raw: RawMessage,
    pub body: B,
    /// Topic the handler's result goes to. Empty means no reply.
    pub reply_to: String,
}

#[derive(Deserialize)]
struct Envelope<B> {
    #[serde(rename = "ReplyTo", default)]
    reply_to: Option<String>,
    #[serde(flatten)]
    body: B,
}

#[derive(Serialize)]
pub(crate) struct RequestEnvelope<'a, B> {
    #[serde(rename = "ReplyTo")]
    pub(crate) reply_to: &'a str,
    #[serde(flatten)]
    pub(crate) body: &'a B,
}

impl<B: DeserializeOwned> Message<B> {
    pub fn decode(raw: RawMessage) -> Result<Self, BusError> {
        let Envelope { reply_to, body } =
            serde_json::from_slice(&raw.body).map_err(BusError::Decode)?;

        Ok(Self {
            raw,
            body,
            reply_to: reply_to.unwrap_or_default(),
        })
    }
}

impl<B> Message<B> {
    /// The transport's view of this delivery.
    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    pub fn reply_to(&self) -> Option<&str> {
        Some(self.reply_to.as_str()).filter(|r| !r.is_empty())
    }

    pub fn into_body(self) -> B {
        self.body
    }
}
