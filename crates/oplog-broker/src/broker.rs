//! The broker seam shared by producer and consumers.

use crate::error::BrokerResult;
use crate::topology::Route;
use async_trait::async_trait;
use oplog_envelope::{CodecResult, Envelope, Headers};

/// Broker response to a single publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker accepted and durably queued the envelope.
    Ack,
    /// The broker refused the envelope.
    Nack { cause: String },
    /// The envelope reached the exchange but no queue was bound for it.
    Returned { reply_text: String },
}

impl Confirmation {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    /// Human-readable failure cause, `None` for an ack.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Ack => None,
            Self::Nack { cause } => Some(cause),
            Self::Returned { reply_text } => Some(reply_text),
        }
    }
}

/// A message handed to a consumer, outstanding until acked.
///
/// Headers are kept as raw pairs so a malformed header surfaces as a decode
/// failure in the consumer instead of a transport error.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub route: Route,
    pub delivery_tag: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Decode the raw headers into an [`Envelope`].
    pub fn envelope(&self) -> CodecResult<Envelope> {
        let headers =
            Headers::from_fields(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(Envelope {
            headers,
            body: self.body.clone(),
        })
    }

    /// Raw value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A message broker with publisher confirms and manual acknowledgement.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `envelope` to `route` and wait for the broker's answer.
    ///
    /// An `Err` means the broker never answered (transport failure).
    async fn publish(&self, route: Route, envelope: &Envelope) -> BrokerResult<Confirmation>;

    /// Take the next delivery from `route`, or `None` after the block timeout.
    async fn receive(&self, route: Route) -> BrokerResult<Option<Delivery>>;

    /// Acknowledge a delivery, removing it from the broker for good.
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Re-establish connections after a transport failure.
    async fn reconnect(&self) -> BrokerResult<()> {
        Ok(())
    }
}
