use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::Header;

/// An RTP packet: fixed header plus opaque payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }
        let n = self.header.marshal_to(buf)?;
        buf[n..n + self.payload.len()].copy_from_slice(&self.payload);
        Ok(n + self.payload.len())
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(Packet { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip() {
        let pkt = Packet {
            header: Header {
                payload_type: 111,
                sequence_number: 9999,
                timestamp: 160,
                ssrc: 0xAA55_AA55,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
        };

        let raw = pkt.marshal().unwrap();
        let parsed = Packet::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_packet_empty_payload() {
        let pkt = Packet::default();
        let raw = pkt.marshal().unwrap();
        assert_eq!(raw.len(), 12);
        let parsed = Packet::unmarshal(&mut raw.clone()).unwrap();
        assert!(parsed.payload.is_empty());
    }
}
