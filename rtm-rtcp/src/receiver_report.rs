use std::any::Any;

use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;
use crate::reception_report::{ReceptionReport, RECEPTION_REPORT_LENGTH};

const SSRC_LENGTH: usize = 4;

/// An RTCP Receiver Report (RFC 3550 §6.4.2).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// The reporter's synchronization source identifier.
    pub ssrc: u32,
    /// Zero or more reception report blocks.
    pub reports: Vec<ReceptionReport>,
    /// Profile-specific extension data, a multiple of 4 octets.
    pub profile_extensions: Bytes,
}

impl ReceiverReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SSRC_LENGTH
            + self.reports.len() * RECEPTION_REPORT_LENGTH
            + self.profile_extensions.len()
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX {
            return Err(Error::TooManyReports);
        }
        if self.profile_extensions.len() % 4 != 0 {
            return Err(Error::WrongMarshalSize);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut off = self.header().marshal_to(buf)?;
        buf[off..off + 4].copy_from_slice(&self.ssrc.to_be_bytes());
        off += SSRC_LENGTH;

        for report in &self.reports {
            off += report.marshal_to(&mut buf[off..])?;
        }
        buf[off..off + self.profile_extensions.len()].copy_from_slice(&self.profile_extensions);

        Ok(off + self.profile_extensions.len())
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::WrongType);
        }

        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len
            || body_len < SSRC_LENGTH + header.count as usize * RECEPTION_REPORT_LENGTH
        {
            return Err(Error::Truncated);
        }

        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let ext_len = body_len - SSRC_LENGTH - reports.len() * RECEPTION_REPORT_LENGTH;
        let profile_extensions = buf.copy_to_bytes(ext_len);

        Ok(ReceiverReport {
            ssrc,
            reports,
            profile_extensions,
        })
    }
}

impl Packet for ReceiverReport {
    fn header(&self) -> Header {
        ReceiverReport::header(self)
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.reports.iter().map(|r| r.ssrc).collect()
    }

    fn raw_size(&self) -> usize {
        self.marshal_size()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other.as_any().downcast_ref::<ReceiverReport>() == Some(self)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}
