//! Wire format for the BitTorrent handshake message. This is a boundary
//! type only — the peer wire protocol past the handshake is out of scope.
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported protocol length {0}")]
    ProtocolLength(u8),

    #[error("unrecognized protocol string {0:?}")]
    ProtocolString(Vec<u8>),

    #[error("info hash mismatch")]
    InfoHashMismatch,
}

/// The initial 68-byte message peers exchange before any protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn parse(buf: &[u8; 68]) -> Result<Self, HandshakeError> {
        let protocol_len = buf[0];
        if protocol_len as usize != PROTOCOL.len() {
            return Err(HandshakeError::ProtocolLength(protocol_len));
        }
        if &buf[1..20] != PROTOCOL.as_slice() {
            return Err(HandshakeError::ProtocolString(buf[1..20].to_vec()));
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn read<S: AsyncReadExt + Unpin>(stream: &mut S) -> Result<Self, HandshakeError> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn write<S: AsyncWriteExt + Unpin>(&self, stream: &mut S) -> Result<(), HandshakeError> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> Result<(), HandshakeError> {
        if &self.info_hash != expected_info_hash {
            return Err(HandshakeError::InfoHashMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_format() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = hs.serialize();
        let parsed = Handshake::parse(&bytes).unwrap();
        assert_eq!(hs, parsed);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new([0; 20], [0; 20]).serialize();
        bytes[1] = b'X';
        assert!(Handshake::parse(&bytes).is_err());
    }

    #[test]
    fn validates_info_hash() {
        let hs = Handshake::new([9u8; 20], [0; 20]);
        assert!(hs.validate(&[9u8; 20]).is_ok());
        assert!(hs.validate(&[1u8; 20]).is_err());
    }
}
