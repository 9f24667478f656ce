//! Peer-facing boundary types. The wire protocol beyond the handshake is
//! implemented by a downstream collaborator; this module only describes
//! the shape peers are addressed and greeted with.
mod handshake;

pub use handshake::{Handshake, HandshakeError};

use std::net::SocketAddrV4;

/// An address reported by a tracker, not yet dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub SocketAddrV4);

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
