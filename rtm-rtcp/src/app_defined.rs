use std::any::Any;

use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;

/// An RTCP Application-Defined packet (RFC 3550 §6.7).
///
/// The header count field carries the application subtype; the body is an
/// SSRC, a four-character ASCII name and opaque data that keeps the packet
/// 32-bit aligned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplicationDefined {
    pub sub_type: u8,
    pub ssrc: u32,
    pub name: [u8; 4],
    pub data: Bytes,
}

impl ApplicationDefined {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sub_type,
            packet_type: PacketType::ApplicationDefined,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }
}

impl MarshalSize for ApplicationDefined {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 4 + 4 + self.data.len()
    }
}

impl Marshal for ApplicationDefined {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sub_type as usize > COUNT_MAX {
            return Err(Error::InvalidHeader);
        }
        if !self.name.iter().all(|b| b.is_ascii()) {
            return Err(Error::InvalidAppName);
        }
        if self.data.len() % 4 != 0 {
            return Err(Error::InvalidAppData);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut off = self.header().marshal_to(buf)?;
        buf[off..off + 4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[off + 4..off + 8].copy_from_slice(&self.name);
        off += 8;
        buf[off..off + self.data.len()].copy_from_slice(&self.data);

        Ok(off + self.data.len())
    }
}

impl Unmarshal for ApplicationDefined {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ApplicationDefined {
            return Err(Error::WrongType);
        }

        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < 8 {
            return Err(Error::Truncated);
        }

        let ssrc = buf.get_u32();
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);
        if !name.iter().all(|b| b.is_ascii()) {
            return Err(Error::InvalidAppName);
        }
        let data = buf.copy_to_bytes(body_len - 8);

        Ok(ApplicationDefined {
            sub_type: header.count,
            ssrc,
            name,
            data,
        })
    }
}

impl Packet for ApplicationDefined {
    fn header(&self) -> Header {
        ApplicationDefined::header(self)
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![self.ssrc]
    }

    fn raw_size(&self) -> usize {
        self.marshal_size()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other.as_any().downcast_ref::<ApplicationDefined>() == Some(self)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}
