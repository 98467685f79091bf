//! Channel pair connecting a session to the host's telephony socket.
//!
//! The host owns the media stream socket. It pushes decoded caller audio into
//! [`TransportPeer::audio_in`] and writes every [`TransportFrame`] it reads
//! from [`TransportPeer::frames_out`] back to the call.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Default capacity for both transport channels.
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 1024;

/// Outbound frame for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    /// µ-law 8 kHz assistant audio
    Audio(Bytes),
    /// Drop any assistant audio buffered on the telephony side
    Clear,
}

/// Identity of the call attached to a transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallMetadata {
    pub stream_id: Option<String>,
    pub call_id: Option<String>,
}

impl CallMetadata {
    pub fn new(stream_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            call_id: Some(call_id.into()),
        }
    }
}

/// Session side of the transport, consumed by `VoiceSession::run`.
#[derive(Debug)]
pub struct CallTransport {
    pub metadata: CallMetadata,
    /// Caller audio; `None` once the call has ended
    pub inbound: mpsc::Receiver<Bytes>,
    pub outbound: mpsc::Sender<TransportFrame>,
}

/// Host side of the transport.
#[derive(Debug)]
pub struct TransportPeer {
    pub audio_in: mpsc::Sender<Bytes>,
    pub frames_out: mpsc::Receiver<TransportFrame>,
}

impl CallTransport {
    /// Create a connected transport and host peer.
    pub fn channel(metadata: CallMetadata, capacity: usize) -> (CallTransport, TransportPeer) {
        let (audio_in, inbound) = mpsc::channel(capacity);
        let (outbound, frames_out) = mpsc::channel(capacity);
        (
            CallTransport {
                metadata,
                inbound,
                outbound,
            },
            TransportPeer {
                audio_in,
                frames_out,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_connects_both_directions() {
        let (mut transport, mut peer) =
            CallTransport::channel(CallMetadata::new("MZ1", "CA1"), 4);

        peer.audio_in.send(Bytes::from_static(&[0xff; 4])).await.unwrap();
        assert_eq!(transport.inbound.recv().await.unwrap().len(), 4);

        transport.outbound.send(TransportFrame::Clear).await.unwrap();
        assert_eq!(peer.frames_out.recv().await, Some(TransportFrame::Clear));
        assert_eq!(transport.metadata.call_id.as_deref(), Some("CA1"));
    }

    #[tokio::test]
    async fn test_inbound_ends_when_peer_drops() {
        let (mut transport, peer) = CallTransport::channel(CallMetadata::default(), 4);
        drop(peer);
        assert!(transport.inbound.recv().await.is_none());
        assert!(transport.outbound.send(TransportFrame::Clear).await.is_err());
    }
}
