//! Session introduction.
//!
//! The first frame on every new transport is `hello{nodeId, publicKey}`.
//! The receiver recomputes the id/key binding (the node id is the hash
//! prefix of the public key) and rejects the transport on mismatch, so a
//! session can only enter service under a verified identity.

use crate::{FrameTransport, NetError};
use std::time::Duration;
use weft_crypto::VerifyingKey;
use weft_proto::{NodeId, PeerMessage};

/// How long the acceptor waits for the introduction frame
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Send the introduction frame on a fresh transport.
///
/// # Errors
///
/// Returns [`NetError::Transport`] if the frame cannot be written.
pub async fn send_hello<T: FrameTransport>(
    transport: &mut T,
    node_id: &NodeId,
    public_key: &VerifyingKey,
) -> Result<(), NetError> {
    let hello = PeerMessage::Hello {
        node_id: node_id.clone(),
        public_key: public_key.to_hex(),
    };
    transport.send(&hello.encode()?).await
}

/// Wait for the introduction frame and verify the identity binding.
///
/// Returns the verified peer id and its public key.
///
/// # Errors
///
/// Returns [`NetError::Timeout`] if no frame arrives within
/// [`HELLO_TIMEOUT`], [`NetError::Handshake`] if the first frame is not a
/// `hello`, and [`NetError::IdentityMismatch`] if the claimed id does not
/// hash-match the key.
pub async fn await_hello<T: FrameTransport>(
    transport: &mut T,
) -> Result<(NodeId, VerifyingKey), NetError> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, transport.recv())
        .await
        .map_err(|_| NetError::Timeout("hello"))??
        .ok_or_else(|| NetError::Handshake("transport closed before hello".to_string()))?;

    match PeerMessage::decode(&frame)? {
        PeerMessage::Hello {
            node_id,
            public_key,
        } => {
            let key = VerifyingKey::from_hex(&public_key)
                .map_err(|e| NetError::Handshake(format!("bad public key: {e}")))?;
            if !node_id.matches_key(&key) {
                return Err(NetError::IdentityMismatch(node_id.to_string()));
            }
            Ok((node_id, key))
        }
        other => Err(NetError::Handshake(format!(
            "expected hello, got {}",
            other.message_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTransport;
    use rand_core::OsRng;
    use weft_crypto::SigningKey;

    #[tokio::test]
    async fn test_hello_exchange() {
        let key = SigningKey::generate(&mut OsRng);
        let node_id = NodeId::from_verifying_key(&key.verifying_key());
        let (mut a, mut b) = MemoryTransport::pair();

        send_hello(&mut a, &node_id, &key.verifying_key()).await.unwrap();
        let (peer_id, peer_key) = await_hello(&mut b).await.unwrap();

        assert_eq!(peer_id, node_id);
        assert_eq!(peer_key, key.verifying_key());
    }

    #[tokio::test]
    async fn test_hello_rejects_forged_id() {
        let key = SigningKey::generate(&mut OsRng);
        let forged = NodeId::from("0000000000000000");
        let (mut a, mut b) = MemoryTransport::pair();

        send_hello(&mut a, &forged, &key.verifying_key()).await.unwrap();
        assert!(matches!(
            await_hello(&mut b).await,
            Err(NetError::IdentityMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_hello_rejects_other_first_frame() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send("{\"type\":\"ping\",\"timestamp\":1}").await.unwrap();
        assert!(matches!(
            await_hello(&mut b).await,
            Err(NetError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_hello_rejects_closed_transport() {
        let (a, mut b) = MemoryTransport::pair();
        drop(a);
        assert!(matches!(
            await_hello(&mut b).await,
            Err(NetError::Handshake(_))
        ));
    }
}
