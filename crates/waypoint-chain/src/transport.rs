//! Transport seams the chain calls into.
//!
//! Transports themselves live outside this crate. A [`Destination`] receives
//! inbound messages and hands out a back-channel [`Conduit`] for responses,
//! acknowledgements and faults. The in-process [`LocalDestination`] captures
//! what would have been sent, which is all the built-in stages and tests need.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use waypoint_core::{BoxFuture, Fault, Message, MessageRole};

/// Message property carrying the response status code.
pub const RESPONSE_CODE: &str = "waypoint.response_code";

/// Status sent for a one-way acknowledgement.
pub const ACCEPTED: u16 = 202;

/// Outgoing byte channel.
pub trait Conduit: Send + Sync {
    /// Prepares the conduit for sending `message`.
    fn prepare<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>>;

    /// Flushes and closes what [`prepare`](Self::prepare) opened.
    fn close<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>>;
}

/// Inbound endpoint of a transport.
pub trait Destination: Send + Sync {
    /// Returns the conduit used to answer `message`, if the transport has one.
    fn back_channel(&self, message: &Message) -> Result<Option<Arc<dyn Conduit>>, Fault>;
}

/// Looks up the back-channel through the destination stored on the exchange.
pub fn back_channel_for(message: &Message) -> Result<Option<Arc<dyn Conduit>>, Fault> {
    match message.exchange().extension::<Arc<dyn Destination>>() {
        Some(destination) => destination.back_channel(message),
        None => Ok(None),
    }
}

/// A message as it left a [`LocalConduit`].
#[derive(Debug, Clone)]
pub struct Sent {
    /// Role of the sent message.
    pub role: MessageRole,
    /// Value of [`RESPONSE_CODE`], if set.
    pub status: Option<u16>,
    /// Protocol headers.
    pub headers: HeaderMap,
    /// Raw payload.
    pub payload: Option<Bytes>,
}

/// In-process conduit that records every closed message.
#[derive(Debug, Default)]
pub struct LocalConduit {
    sent: Mutex<Vec<Sent>>,
}

impl LocalConduit {
    /// Creates an empty conduit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

impl Conduit for LocalConduit {
    fn prepare<'a>(&'a self, _message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async { Ok(()) })
    }

    fn close<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let status = message
                .property(RESPONSE_CODE)
                .and_then(serde_json::Value::as_u64)
                .and_then(|code| u16::try_from(code).ok());
            self.sent.lock().push(Sent {
                role: message.role(),
                status,
                headers: message.headers().clone(),
                payload: message.payload().cloned(),
            });
            Ok(())
        })
    }
}

/// Destination whose back-channel is a shared [`LocalConduit`].
#[derive(Debug, Default)]
pub struct LocalDestination {
    conduit: Arc<LocalConduit>,
}

impl LocalDestination {
    /// Creates a destination with a fresh back-channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The back-channel conduit.
    #[must_use]
    pub fn conduit(&self) -> &Arc<LocalConduit> {
        &self.conduit
    }
}

impl Destination for LocalDestination {
    fn back_channel(&self, _message: &Message) -> Result<Option<Arc<dyn Conduit>>, Fault> {
        Ok(Some(Arc::clone(&self.conduit) as Arc<dyn Conduit>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_conduit_records_close() {
        let conduit = LocalConduit::new();
        let mut message = Message::inbound();
        message.set_property(RESPONSE_CODE, ACCEPTED);
        message.set_payload(Bytes::from_static(b"{}"));

        conduit.prepare(&mut message).await.unwrap();
        assert!(conduit.sent().is_empty());
        conduit.close(&mut message).await.unwrap();

        let sent = conduit.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, Some(ACCEPTED));
        assert_eq!(sent[0].payload.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_back_channel_from_exchange() {
        let message = Message::inbound();
        assert!(back_channel_for(&message).unwrap().is_none());

        let destination: Arc<dyn Destination> = Arc::new(LocalDestination::new());
        message.exchange().set_extension(destination);
        assert!(back_channel_for(&message).unwrap().is_some());
    }
}
