use std::any::Any;
use std::fmt;

use bytes::Buf;

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::app_defined::ApplicationDefined;
use crate::goodbye::Goodbye;
use crate::header::{Header, PacketType, HEADER_LENGTH};
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;

/// A parsed RTCP packet of any supported type.
///
/// Concrete types are recovered with [`Packet::as_any`] downcasts.
pub trait Packet: Marshal + fmt::Debug + Send + Sync {
    fn header(&self) -> Header;
    /// The SSRCs this packet refers to.
    fn destination_ssrc(&self) -> Vec<u32>;
    fn raw_size(&self) -> usize;
    fn as_any(&self) -> &(dyn Any + Send + Sync);
    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool;
    fn cloned(&self) -> Box<dyn Packet + Send + Sync>;
}

impl PartialEq for dyn Packet + Send + Sync {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl Clone for Box<dyn Packet + Send + Sync> {
    fn clone(&self) -> Self {
        self.cloned()
    }
}

/// Parse one compound datagram into its constituent packets.
///
/// Any structural defect in any packet fails the whole datagram; nothing is
/// delivered from a partially valid compound.
pub fn unmarshal<B>(buf: &mut B) -> Result<Vec<Box<dyn Packet + Send + Sync>>>
where
    B: Buf,
{
    let mut packets = vec![];
    while buf.has_remaining() {
        packets.push(unmarshaller(buf)?);
    }
    if packets.is_empty() {
        return Err(Error::EmptyCompound);
    }
    Ok(packets)
}

/// Parse exactly one packet from the front of `buf`.
fn unmarshaller<B>(buf: &mut B) -> Result<Box<dyn Packet + Send + Sync>>
where
    B: Buf,
{
    let header = Header::unmarshal(&mut buf.chunk())?;

    let pkt_len = (header.length as usize + 1) * 4;
    if buf.remaining() < pkt_len {
        return Err(Error::Truncated);
    }
    let mut pkt_buf = buf.copy_to_bytes(pkt_len);

    let packet: Box<dyn Packet + Send + Sync> = match header.packet_type {
        PacketType::SenderReport => Box::new(SenderReport::unmarshal(&mut pkt_buf)?),
        PacketType::ReceiverReport => Box::new(ReceiverReport::unmarshal(&mut pkt_buf)?),
        PacketType::SourceDescription => Box::new(SourceDescription::unmarshal(&mut pkt_buf)?),
        PacketType::Goodbye => Box::new(Goodbye::unmarshal(&mut pkt_buf)?),
        PacketType::ApplicationDefined => Box::new(ApplicationDefined::unmarshal(&mut pkt_buf)?),
        PacketType::Unsupported => return Err(Error::UnsupportedType(header.packet_type as u8)),
    };

    Ok(packet)
}
