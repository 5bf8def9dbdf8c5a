use bytes::Buf;

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::PacketType;
use crate::packet::{self, Packet};
use crate::source_description::{SdesType, SourceDescription};

/// A compound RTCP packet: several packets marshalled back to back into one
/// datagram.
///
/// RFC 3550 requires the first packet to be an SR or RR and the compound to
/// carry an SDES with a CNAME item; [`CompoundPacket::validate`] enforces
/// both. Validation is explicit so a dispatcher can still inspect packets
/// from peers that violate the grouping rules.
#[derive(Debug, Default, Clone)]
pub struct CompoundPacket(pub Vec<Box<dyn Packet + Send + Sync>>);

impl PartialEq for CompoundPacket {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.equal(&**b))
    }
}

impl CompoundPacket {
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::EmptyCompound);
        }

        match self.0[0].header().packet_type {
            PacketType::SenderReport | PacketType::ReceiverReport => {}
            _ => return Err(Error::BadFirstPacket),
        }

        for pkt in &self.0[1..] {
            if let Some(sdes) = pkt.as_any().downcast_ref::<SourceDescription>() {
                let has_cname = sdes
                    .chunks
                    .iter()
                    .any(|c| c.items.iter().any(|i| i.sdes_type == SdesType::SdesCname));
                if has_cname {
                    return Ok(());
                }
            }
        }

        Err(Error::MissingCname)
    }

    pub fn destination_ssrc(&self) -> Vec<u32> {
        self.0.iter().flat_map(|p| p.destination_ssrc()).collect()
    }
}

impl MarshalSize for CompoundPacket {
    fn marshal_size(&self) -> usize {
        self.0.iter().map(|p| p.marshal_size()).sum()
    }
}

impl Marshal for CompoundPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }
        let mut off = 0;
        for pkt in &self.0 {
            off += pkt.marshal_to(&mut buf[off..])?;
        }
        Ok(off)
    }
}

impl Unmarshal for CompoundPacket {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        Ok(CompoundPacket(packet::unmarshal(buf)?))
    }
}
