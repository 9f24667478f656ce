//! UDP tracker wire format (BEP 15): fixed-size, big-endian headers and
//! frames around the connect/announce/error actions.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

pub const CONNECTION_ID_MAGIC: u64 = 0x0000_0417_27101980;
pub const CONNECTION_LIFETIME_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect = 0,
    Announce = 1,
    Scrape = 2,
    Error = 3,
}

impl Action {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Action::Connect),
            1 => Some(Action::Announce),
            2 => Some(Action::Scrape),
            3 => Some(Action::Error),
            _ => None,
        }
    }
}

/// 16-byte header prefixing every outgoing request.
pub struct RequestHeader {
    pub connection_id: u64,
    pub action: Action,
    pub transaction_id: u32,
}

impl RequestHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.connection_id)?;
        w.write_i32::<BigEndian>(self.action as i32)?;
        w.write_u32::<BigEndian>(self.transaction_id)?;
        Ok(())
    }
}

/// 8-byte header prefixing every incoming response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub action: Action,
    pub transaction_id: u32,
}

impl ResponseHeader {
    pub const LEN: usize = 8;

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let action = r.read_i32::<BigEndian>()?;
        let transaction_id = r.read_u32::<BigEndian>()?;
        let action = Action::from_i32(action)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown action"))?;
        Ok(ResponseHeader {
            action,
            transaction_id,
        })
    }
}

pub fn parse_connection_response(body: &[u8]) -> io::Result<u64> {
    let mut cursor = Cursor::new(body);
    cursor.read_u64::<BigEndian>()
}

pub struct AnnounceResponseHeader {
    pub interval: i32,
    pub leechers: i32,
    pub seeders: i32,
}

pub fn parse_announce_body(body: &[u8]) -> io::Result<(AnnounceResponseHeader, Vec<u8>)> {
    let mut cursor = Cursor::new(body);
    let interval = cursor.read_i32::<BigEndian>()?;
    let leechers = cursor.read_i32::<BigEndian>()?;
    let seeders = cursor.read_i32::<BigEndian>()?;
    let pos = cursor.position() as usize;
    Ok((
        AnnounceResponseHeader {
            interval,
            leechers,
            seeders,
        },
        body[pos..].to_vec(),
    ))
}

/// Builds the 82-byte announce body that follows the 16-byte request
/// header (20 info-hash + 20 peer-id + 8 downloaded + 8 left + 8 uploaded
/// + 4 event + 4 ip + 4 key + 4 num-want + 2 port).
#[allow(clippy::too_many_arguments)]
pub fn build_announce_body(
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    downloaded: i64,
    left: i64,
    uploaded: i64,
    event: u32,
    ip: u32,
    key: u32,
    num_want: i32,
    port: u16,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(82);
    buf.extend_from_slice(info_hash);
    buf.extend_from_slice(peer_id);
    buf.write_i64::<BigEndian>(downloaded).unwrap();
    buf.write_i64::<BigEndian>(left).unwrap();
    buf.write_i64::<BigEndian>(uploaded).unwrap();
    buf.write_u32::<BigEndian>(event).unwrap();
    buf.write_u32::<BigEndian>(ip).unwrap();
    buf.write_u32::<BigEndian>(key).unwrap();
    buf.write_i32::<BigEndian>(num_want).unwrap();
    buf.write_u16::<BigEndian>(port).unwrap();
    buf
}

pub const CONNECTION_ID_MISMATCH: &[u8] = b"Connection ID mismatch.\0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_is_16_bytes() {
        let mut buf = Vec::new();
        RequestHeader {
            connection_id: CONNECTION_ID_MAGIC,
            action: Action::Connect,
            transaction_id: 42,
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..8], &CONNECTION_ID_MAGIC.to_be_bytes());
    }

    #[test]
    fn announce_body_is_82_bytes() {
        let body = build_announce_body(&[1; 20], &[2; 20], 0, 10, 0, 2, 0, 7, -1, 6881);
        assert_eq!(body.len(), 82);
    }

    #[test]
    fn parses_response_header() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(99).unwrap();
        let header = ResponseHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(header.action, Action::Announce);
        assert_eq!(header.transaction_id, 99);
    }
}
