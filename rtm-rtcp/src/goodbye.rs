use std::any::Any;

use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;

/// An RTCP Goodbye packet (RFC 3550 §6.6): the listed sources are leaving
/// the session, optionally with a reason string.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    /// Optional UTF-8 reason; empty means none is carried on the wire.
    pub reason: Bytes,
}

impl Goodbye {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type: PacketType::Goodbye,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn reason_block_len(&self) -> usize {
        if self.reason.is_empty() {
            0
        } else {
            (1 + self.reason.len() + 3) & !3
        }
    }
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.sources.len() * 4 + self.reason_block_len()
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sources.len() > COUNT_MAX {
            return Err(Error::TooManySources);
        }
        if self.reason.len() > 255 {
            return Err(Error::ReasonTooLong);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::BufferTooShort);
        }

        let mut off = self.header().marshal_to(buf)?;
        for ssrc in &self.sources {
            buf[off..off + 4].copy_from_slice(&ssrc.to_be_bytes());
            off += 4;
        }
        if !self.reason.is_empty() {
            buf[off] = self.reason.len() as u8;
            buf[off + 1..off + 1 + self.reason.len()].copy_from_slice(&self.reason);
            off += 1 + self.reason.len();
            // zero padding to the word boundary
            for b in buf.iter_mut().take(size).skip(off) {
                *b = 0;
            }
        }

        Ok(size)
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(Error::WrongType);
        }

        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < header.count as usize * 4 {
            return Err(Error::Truncated);
        }
        let mut body = buf.copy_to_bytes(body_len);

        let sources = (0..header.count).map(|_| body.get_u32()).collect();

        let mut reason = Bytes::new();
        if body.has_remaining() {
            let len = body.get_u8() as usize;
            if body.remaining() < len {
                return Err(Error::Truncated);
            }
            reason = body.copy_to_bytes(len);
            // what is left can only be the zero padding of the reason block
            if body.remaining() > 3 {
                return Err(Error::WrongMarshalSize);
            }
        }

        Ok(Goodbye { sources, reason })
    }
}

impl Packet for Goodbye {
    fn header(&self) -> Header {
        Goodbye::header(self)
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.sources.clone()
    }

    fn raw_size(&self) -> usize {
        self.marshal_size()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other.as_any().downcast_ref::<Goodbye>() == Some(self)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}
