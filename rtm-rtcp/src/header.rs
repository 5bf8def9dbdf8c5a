use std::fmt;

use bytes::Buf;

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// The RTP protocol version every RTCP packet carries.
pub const VERSION: u8 = 2;
/// Length of the common RTCP header in octets.
pub const HEADER_LENGTH: usize = 4;
/// Largest value the 5-bit count field can hold.
pub const COUNT_MAX: usize = (1 << 5) - 1;

const VERSION_SHIFT: u8 = 6;
const PADDING_SHIFT: u8 = 5;
const COUNT_MASK: u8 = 0x1F;

/// RTCP packet types registered for this codec.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    #[default]
    Unsupported = 0,
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            _ => PacketType::Unsupported,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PacketType::Unsupported => "Unsupported",
            PacketType::SenderReport => "SR",
            PacketType::ReceiverReport => "RR",
            PacketType::SourceDescription => "SDES",
            PacketType::Goodbye => "BYE",
            PacketType::ApplicationDefined => "APP",
        };
        write!(f, "{s}")
    }
}

/// The common 4-octet header shared by every RTCP packet.
///
/// `length` is the packet size in 32-bit words minus one, header included.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    /// The padding bit. The codec never sets it and refuses packets that do.
    pub padding: bool,
    /// Report count, chunk count or APP subtype, depending on the type.
    pub count: u8,
    pub packet_type: PacketType,
    pub length: u16,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::BufferTooShort);
        }
        if self.count as usize > COUNT_MAX {
            return Err(Error::InvalidHeader);
        }

        buf[0] = (VERSION << VERSION_SHIFT) | ((self.padding as u8) << PADDING_SHIFT) | self.count;
        buf[1] = self.packet_type as u8;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());

        Ok(HEADER_LENGTH)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::Truncated);
        }

        let b0 = buf.get_u8();
        if b0 >> VERSION_SHIFT != VERSION {
            return Err(Error::InvalidHeader);
        }
        if (b0 >> PADDING_SHIFT) & 0x1 != 0 {
            return Err(Error::PaddingUnsupported);
        }
        let count = b0 & COUNT_MASK;

        let pt = buf.get_u8();
        let packet_type = PacketType::from(pt);
        if packet_type == PacketType::Unsupported {
            return Err(Error::UnsupportedType(pt));
        }

        let length = buf.get_u16();

        Ok(Header {
            padding: false,
            count,
            packet_type,
            length,
        })
    }
}
