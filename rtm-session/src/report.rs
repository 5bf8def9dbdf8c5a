use std::time::Instant;

use bytes::Bytes;
use log::warn;

use rtm_rtcp::goodbye::Goodbye;
use rtm_rtcp::header::COUNT_MAX;
use rtm_rtcp::reception_report::ReceptionReport;
use rtm_rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};

use crate::participant::{ParticipantTable, Role};

/// Build one reception report block per validated sender, advancing each
/// source's per-interval loss bookkeeping.
pub(crate) fn reception_reports(table: &mut ParticipantTable, now: Instant) -> Vec<ReceptionReport> {
    let mut reports = vec![];

    for (ssrc, p) in table.iter_active_mut() {
        if p.stats.probation > 0 || p.role != Role::Sender {
            continue;
        }
        if reports.len() == COUNT_MAX {
            // a second SR/RR in the compound would carry the rest; one
            // report per packet is as far as this session goes
            warn!("more than {COUNT_MAX} senders; truncating report blocks");
            break;
        }

        let (fraction_lost, total_lost) = p.stats.interval_lost();
        let delay = match p.stats.sr_ts {
            Some(sr_ts) => (now.duration_since(sr_ts).as_secs_f64() * 65536.0) as u32,
            None => 0,
        };

        reports.push(ReceptionReport {
            ssrc: *ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number: p.stats.extended_max(),
            jitter: p.stats.jitter as u32,
            last_sender_report: p.stats.lsr,
            delay,
        });
    }

    reports
}

/// The mandatory SDES carrying this session's CNAME.
pub(crate) fn sdes_packet(ssrc: u32, cname: &str) -> SourceDescription {
    SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: ssrc,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from(cname.to_owned()),
            }],
        }],
    }
}

pub(crate) fn bye_packet(ssrc: u32) -> Goodbye {
    Goodbye {
        sources: vec![ssrc],
        reason: Bytes::new(),
    }
}
