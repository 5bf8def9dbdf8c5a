use std::any::Any;

use bytes::{Buf, Bytes};

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;
use crate::reception_report::{ReceptionReport, RECEPTION_REPORT_LENGTH};

/// Length of the sender info section (SSRC + NTP + RTP + counts).
pub const SENDER_INFO_LENGTH: usize = 24;

/// An RTCP Sender Report (RFC 3550 §6.4.1).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// The sender's synchronization source identifier.
    pub ssrc: u32,
    /// Wallclock time when this report was sent, 64-bit NTP format.
    pub ntp_time: u64,
    /// RTP timestamp corresponding to `ntp_time`.
    pub rtp_time: u32,
    /// Total RTP data packets transmitted since starting transmission.
    pub packet_count: u32,
    /// Total payload octets transmitted since starting transmission.
    pub octet_count: u32,
    /// Zero or more reception report blocks.
    pub reports: Vec<ReceptionReport>,
    /// Profile-specific extension data, a multiple of 4 octets.
    pub profile_extensions: Bytes,
}

impl SenderReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::SenderReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SENDER_INFO_LENGTH
            + self.reports.len() * RECEPTION_REPORT_LENGTH
            + self.profile_extensions.len()
    }
}

impl Marshal for SenderReport {
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
        buf[off + 4..off + 12].copy_from_slice(&self.ntp_time.to_be_bytes());
        buf[off + 12..off + 16].copy_from_slice(&self.rtp_time.to_be_bytes());
        buf[off + 16..off + 20].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[off + 20..off + 24].copy_from_slice(&self.octet_count.to_be_bytes());
        off += SENDER_INFO_LENGTH;

        for report in &self.reports {
            off += report.marshal_to(&mut buf[off..])?;
        }
        buf[off..off + self.profile_extensions.len()].copy_from_slice(&self.profile_extensions);

        Ok(off + self.profile_extensions.len())
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::WrongType);
        }

        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len
            || body_len < SENDER_INFO_LENGTH + header.count as usize * RECEPTION_REPORT_LENGTH
        {
            return Err(Error::Truncated);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let ext_len = body_len - SENDER_INFO_LENGTH - reports.len() * RECEPTION_REPORT_LENGTH;
        let profile_extensions = buf.copy_to_bytes(ext_len);

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
            profile_extensions,
        })
    }
}

impl Packet for SenderReport {
    fn header(&self) -> Header {
        SenderReport::header(self)
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
        other.as_any().downcast_ref::<SenderReport>() == Some(self)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_report_round_trip() {
        // the S5 scenario: every field survives serialize-then-parse
        let sr = SenderReport {
            ssrc: 0x902F_9E2E,
            ntp_time: 0x0000_0001_8000_0000,
            rtp_time: 12345,
            packet_count: 10,
            octet_count: 4000,
            reports: vec![ReceptionReport {
                ssrc: 0xBC5E_9A40,
                fraction_lost: 0x20,
                total_lost: 3,
                last_sequence_number: 65540,
                jitter: 42,
                last_sender_report: 0xCAFE_BABE,
                delay: 65536,
            }],
            profile_extensions: Bytes::new(),
        };

        let raw = sr.marshal().unwrap();
        assert_eq!(raw.len(), sr.marshal_size());

        let parsed = SenderReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, sr);
        // and serialization is byte-exact
        assert_eq!(parsed.marshal().unwrap(), raw);
    }

    #[test]
    fn test_sender_report_no_reports() {
        let sr = SenderReport {
            ssrc: 1,
            ntp_time: 2,
            rtp_time: 3,
            packet_count: 4,
            octet_count: 5,
            ..Default::default()
        };
        let raw = sr.marshal().unwrap();
        assert_eq!(raw.len(), HEADER_LENGTH + SENDER_INFO_LENGTH);
        assert_eq!(SenderReport::unmarshal(&mut raw.clone()).unwrap(), sr);
    }

    #[test]
    fn test_sender_report_profile_extensions() {
        let sr = SenderReport {
            ssrc: 0x0102_0304,
            profile_extensions: Bytes::from_static(&[0x55, 0x66, 0x77, 0x88]),
            ..Default::default()
        };
        let raw = sr.marshal().unwrap();
        let parsed = SenderReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.profile_extensions, sr.profile_extensions);
    }

    #[test]
    fn test_sender_report_unaligned_extensions_refused() {
        let sr = SenderReport {
            profile_extensions: Bytes::from_static(&[0x01]),
            ..Default::default()
        };
        assert_eq!(sr.marshal(), Err(Error::WrongMarshalSize));
    }

    #[test]
    fn test_sender_report_truncated() {
        let sr = SenderReport {
            reports: vec![ReceptionReport::default()],
            ..Default::default()
        };
        let raw = sr.marshal().unwrap();
        let cut = &raw[..raw.len() - 4];
        assert_eq!(SenderReport::unmarshal(&mut &cut[..]), Err(Error::Truncated));
    }

    #[test]
    fn test_sender_report_wrong_type() {
        let raw = [0x80u8, 201, 0x00, 0x01, 0, 0, 0, 1];
        assert_eq!(SenderReport::unmarshal(&mut &raw[..]), Err(Error::WrongType));
    }
}
