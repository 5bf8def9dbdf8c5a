use bytes::Buf;

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const VERSION: u8 = 2;
pub const HEADER_LENGTH: usize = 12;

/// RTP packet header (RFC 3550 §5.1), fixed part plus CSRC list.
///
/// Header extensions are not modeled; the control plane only reads the
/// sequence number, timestamp and SSRC of frames the data path hands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: vec![],
        }
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.csrc.len() * 4
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::BufferTooShort);
        }
        if self.csrc.len() > 0x0F {
            return Err(Error::TooManySources);
        }

        buf[0] = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | self.csrc.len() as u8;
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        let mut off = HEADER_LENGTH;
        for csrc in &self.csrc {
            buf[off..off + 4].copy_from_slice(&csrc.to_be_bytes());
            off += 4;
        }

        Ok(off)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::HeaderSizeInsufficient);
        }

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != VERSION {
            return Err(Error::InvalidHeader);
        }
        let padding = (b0 >> 5) & 0x1 != 0;
        let extension = (b0 >> 4) & 0x1 != 0;
        let cc = (b0 & 0x0F) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> 7 != 0;
        let payload_type = b1 & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc * 4 {
            return Err(Error::HeaderSizeInsufficient);
        }
        let csrc = (0..cc).map(|_| buf.get_u32()).collect();

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
        })
    }
}
