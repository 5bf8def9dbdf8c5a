use bytes::Buf;

use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// Length of one reception report block in octets.
pub const RECEPTION_REPORT_LENGTH: usize = 24;

/// One reception report block as carried in SR and RR packets.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    /// The SSRC this report describes.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, Q0.8.
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24 bits on the wire.
    pub total_lost: u32,
    /// Extended highest sequence number received (cycles << 16 | max seq).
    pub last_sequence_number: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR received.
    pub last_sender_report: u32,
    /// Delay since that SR, in units of 1/65536 seconds.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < RECEPTION_REPORT_LENGTH {
            return Err(Error::BufferTooShort);
        }
        if self.total_lost > 0x00FF_FFFF {
            return Err(Error::InvalidTotalLost);
        }

        buf[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[4] = self.fraction_lost;
        buf[5] = (self.total_lost >> 16) as u8;
        buf[6] = (self.total_lost >> 8) as u8;
        buf[7] = self.total_lost as u8;
        buf[8..12].copy_from_slice(&self.last_sequence_number.to_be_bytes());
        buf[12..16].copy_from_slice(&self.jitter.to_be_bytes());
        buf[16..20].copy_from_slice(&self.last_sender_report.to_be_bytes());
        buf[20..24].copy_from_slice(&self.delay.to_be_bytes());

        Ok(RECEPTION_REPORT_LENGTH)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::Truncated);
        }

        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();
        let total_lost =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32;
        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();

        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reception_report_round_trip() {
        let rr = ReceptionReport {
            ssrc: 0xBC5E_9A40,
            fraction_lost: 84,
            total_lost: 341,
            last_sequence_number: 12,
            jitter: 273,
            last_sender_report: 0x09F3_6432,
            delay: 150137,
        };

        let raw = rr.marshal().unwrap();
        assert_eq!(raw.len(), RECEPTION_REPORT_LENGTH);
        assert_eq!(ReceptionReport::unmarshal(&mut raw.clone()).unwrap(), rr);
    }

    #[test]
    fn test_reception_report_total_lost_overflow() {
        let rr = ReceptionReport {
            total_lost: 1 << 24,
            ..Default::default()
        };
        assert_eq!(rr.marshal(), Err(Error::InvalidTotalLost));
    }

    #[test]
    fn test_reception_report_truncated() {
        let raw = [0u8; 23];
        assert_eq!(
            ReceptionReport::unmarshal(&mut &raw[..]),
            Err(Error::Truncated)
        );
    }
}
