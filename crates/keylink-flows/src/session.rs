//! Two-party message channel the protocols run over.
//!
//! A [`Session`] is bound to one counterparty for its whole lifetime and
//! delivers messages reliably and in order. Timeouts belong to whoever drives
//! the session; a step awaiting a message that never comes never resumes.

use async_trait::async_trait;
use keylink_core::PublicKey;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{FlowError, FlowResult};
use crate::messages::FlowMessage;

#[async_trait]
pub trait Session: Send {
    /// Legal identity key of the peer at the other end.
    fn counterparty_key(&self) -> PublicKey;

    async fn send(&mut self, message: FlowMessage) -> FlowResult<()>;

    async fn receive(&mut self) -> FlowResult<FlowMessage>;

    async fn send_and_receive(&mut self, message: FlowMessage) -> FlowResult<FlowMessage> {
        self.send(message).await?;
        self.receive().await
    }
}

/// In-process session over a pair of unbounded channels. Messages cross as
/// postcard frames so both ends see exactly what a real transport would.
pub struct MemorySession {
    counterparty: PublicKey,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Connect two peers. The first session is `a`'s end (its counterparty is
/// `b`), the second is `b`'s end.
pub fn memory_session_pair(a: PublicKey, b: PublicKey) -> (MemorySession, MemorySession) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemorySession {
            counterparty: b,
            outbound: a_tx,
            inbound: a_rx,
        },
        MemorySession {
            counterparty: a,
            outbound: b_tx,
            inbound: b_rx,
        },
    )
}

#[async_trait]
impl Session for MemorySession {
    fn counterparty_key(&self) -> PublicKey {
        self.counterparty
    }

    async fn send(&mut self, message: FlowMessage) -> FlowResult<()> {
        trace!(kind = message.kind(), to = %self.counterparty.fingerprint(), "send");
        let frame = message.to_frame()?;
        self.outbound
            .send(frame)
            .map_err(|_| FlowError::Session("counterparty hung up".into()))
    }

    async fn receive(&mut self) -> FlowResult<FlowMessage> {
        let frame = self
            .inbound
            .recv()
            .await
            .ok_or_else(|| FlowError::Session("session closed".into()))?;
        let message = FlowMessage::from_frame(&frame)?;
        trace!(kind = message.kind(), from = %self.counterparty.fingerprint(), "receive");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (mut a, mut b) = memory_session_pair(PublicKey([1; 32]), PublicKey([2; 32]));
        assert_eq!(a.counterparty_key(), PublicKey([2; 32]));
        assert_eq!(b.counterparty_key(), PublicKey([1; 32]));

        a.send(FlowMessage::SyncCandidates(vec![PublicKey([5; 32])]))
            .await
            .unwrap();
        a.send(FlowMessage::Decline {
            reason: "second".into(),
        })
        .await
        .unwrap();

        assert_eq!(
            b.receive().await.unwrap(),
            FlowMessage::SyncCandidates(vec![PublicKey([5; 32])])
        );
        assert_eq!(b.receive().await.unwrap().kind(), "Decline");
    }

    #[tokio::test]
    async fn test_dropped_peer_is_session_error() {
        let (mut a, b) = memory_session_pair(PublicKey([1; 32]), PublicKey([2; 32]));
        drop(b);
        assert!(matches!(
            a.receive().await,
            Err(FlowError::Session(_))
        ));
        assert!(matches!(
            a.send(FlowMessage::SyncRequest(vec![])).await,
            Err(FlowError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (mut a, mut b) = memory_session_pair(PublicKey([1; 32]), PublicKey([2; 32]));
        let (reply, _) = tokio::join!(
            a.send_and_receive(FlowMessage::SyncCandidates(vec![])),
            async {
                let got = b.receive().await.unwrap();
                assert_eq!(got, FlowMessage::SyncCandidates(vec![]));
                b.send(FlowMessage::SyncRequest(vec![])).await.unwrap();
            }
        );
        assert_eq!(reply.unwrap(), FlowMessage::SyncRequest(vec![]));
    }
}
