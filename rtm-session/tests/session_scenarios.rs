//! End-to-end scenarios for the RTCP session: probation, collision
//! handling, report caching and hooks, and the scheduler loop over real
//! localhost sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use rtm_rtcp::app_defined::ApplicationDefined;
use rtm_rtcp::goodbye::Goodbye;
use rtm_rtcp::receiver_report::ReceiverReport;
use rtm_rtcp::sender_report::SenderReport;
use rtm_rtcp::source_description::{SdesType, SourceDescription};
use rtm_session::{PacketStatus, Role, RtcpSession, RtpContext};
use rtm_shared::error::Error;
use rtm_shared::marshal::Marshal;

fn addr(ip: [u8; 4], port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])), port)
}

fn free_port() -> u16 {
    let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn rtp_packet(ssrc: u32, seq: u16, timestamp: u32, payload_len: usize) -> rtm_rtp::Packet {
    rtm_rtp::Packet {
        header: rtm_rtp::Header {
            ssrc,
            sequence_number: seq,
            timestamp,
            ..Default::default()
        },
        payload: vec![0u8; payload_len].into(),
    }
}

fn sr_datagram(ssrc: u32) -> Bytes {
    SenderReport {
        ssrc,
        ntp_time: 0x0000_0001_8000_0000,
        rtp_time: 12345,
        packet_count: 10,
        octet_count: 4000,
        ..Default::default()
    }
    .marshal()
    .unwrap()
}

struct MockRtp {
    ssrc: AtomicU32,
    clock_rate: u32,
}

impl RtpContext for MockRtp {
    fn ssrc(&self) -> u32 {
        self.ssrc.load(Ordering::Relaxed)
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn set_ssrc(&self, ssrc: u32) {
        self.ssrc.store(ssrc, Ordering::Relaxed);
    }
}

// =============================================================================
// Reception statistics through the public surface
// =============================================================================

#[test]
fn test_probation_pass_registers_participant() {
    // S1: two sequential packets validate the source
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 2], 5004);

    // a brand-new source is anchored but its packet still flows downstream
    let first = session
        .handle_rtp(&rtp_packet(0xAA, 100, 0, 160), source)
        .unwrap();
    assert_eq!(first, PacketStatus::NotHandled);

    let second = session
        .handle_rtp(&rtp_packet(0xAA, 101, 160, 160), source)
        .unwrap();
    assert_eq!(second, PacketStatus::NotHandled);

    assert_eq!(session.get_participants(), vec![0xAA]);
    let stats = session.stats_of(0xAA).unwrap();
    assert_eq!(stats.probation, 0);
    assert_eq!(stats.base_seq, 101);
    assert_eq!(stats.max_seq, 101);
    assert_eq!(stats.received_pkts, 1);
    assert_eq!(stats.dropped_pkts, 0);
}

#[test]
fn test_gap_and_wrap_statistics() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 2], 5004);

    // S3: validate just before the wrap, then cross it
    for (i, seq) in [65534u16, 65535, 0, 1].iter().enumerate() {
        session
            .handle_rtp(&rtp_packet(0xBB, *seq, i as u32 * 160, 100), source)
            .unwrap();
    }
    let stats = session.stats_of(0xBB).unwrap();
    assert_eq!(stats.cycles, 65536);
    assert_eq!(stats.max_seq, 1);
    assert_eq!(stats.dropped_pkts, 0);
    assert_eq!(stats.received_bytes, 300);
}

#[test]
fn test_address_mismatch_never_mutates_state() {
    // property 7: a known SSRC from a new endpoint is dropped and counted
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 2], 5004);

    session
        .handle_rtp(&rtp_packet(0xCC, 10, 0, 100), source)
        .unwrap();
    session
        .handle_rtp(&rtp_packet(0xCC, 11, 160, 100), source)
        .unwrap();
    let before = session.stats_of(0xCC).unwrap();
    assert_eq!(session.dropped_packets(), 0);

    // different host and port entirely
    let intruder = addr([192, 168, 9, 9], 7777);
    let status = session
        .handle_rtp(&rtp_packet(0xCC, 12, 320, 100), intruder)
        .unwrap();
    assert_eq!(status, PacketStatus::Handled);
    assert_eq!(session.dropped_packets(), 1);

    let after = session.stats_of(0xCC).unwrap();
    assert_eq!(after.received_pkts, before.received_pkts);
    assert_eq!(after.max_seq, before.max_seq);
}

// =============================================================================
// RTCP dispatch, caching and hooks
// =============================================================================

#[test]
fn test_cached_report_ownership_transfer() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 3], 5005);

    session.handle_rtcp(&sr_datagram(0xDD), source).unwrap();

    let frame = session.take_sender_packet(0xDD).expect("cached SR");
    assert_eq!(frame.ntp_time, 0x0000_0001_8000_0000);
    assert_eq!(frame.packet_count, 10);
    // the slot emptied when ownership moved out
    assert!(session.take_sender_packet(0xDD).is_none());

    // LSR is the middle 32 bits of the SR's NTP time
    let stats = session.stats_of(0xDD).unwrap();
    assert_eq!(stats.lsr, 0x0001_8000);
    assert!(stats.sr_ts.is_some());
}

#[test]
fn test_sender_hook_takes_ownership() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 3], 5005);

    let (tx, rx) = mpsc::channel();
    session
        .install_sender_hook(move |sr| {
            tx.send(sr).unwrap();
        })
        .unwrap();

    session.handle_rtcp(&sr_datagram(0xEE), source).unwrap();

    let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(frame.ssrc, 0xEE);
    // the hook consumed the frame; nothing is left to poll
    assert!(session.take_sender_packet(0xEE).is_none());
}

#[test]
fn test_sdes_and_app_are_cached_per_source() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 3], 5005);

    let sdes = rtm_rtcp::source_description::SourceDescription {
        chunks: vec![rtm_rtcp::source_description::SourceDescriptionChunk {
            source: 0x77,
            items: vec![rtm_rtcp::source_description::SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from_static(b"peer@host"),
            }],
        }],
    };
    session
        .handle_rtcp(&sdes.marshal().unwrap(), source)
        .unwrap();

    let cached = session.take_sdes_packet(0x77).expect("cached SDES");
    assert_eq!(cached, sdes);
    assert!(session.take_sdes_packet(0x77).is_none());

    let app = ApplicationDefined {
        sub_type: 3,
        ssrc: 0x77,
        name: *b"xyzw",
        data: Bytes::from_static(&[1, 2, 3, 4]),
    };
    session
        .handle_rtcp(&app.marshal().unwrap(), source)
        .unwrap();
    assert_eq!(session.take_app_packet(0x77), Some(app));
}

#[test]
fn test_bye_removes_participant() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 4], 5006);

    session
        .handle_rtp(&rtp_packet(0x55, 1, 0, 100), source)
        .unwrap();
    session
        .handle_rtp(&rtp_packet(0x55, 2, 160, 100), source)
        .unwrap();
    assert_eq!(session.get_participants(), vec![0x55]);

    let bye = Goodbye {
        sources: vec![0x55],
        reason: Bytes::from_static(b"done"),
    };
    session
        .handle_rtcp(&bye.marshal().unwrap(), source)
        .unwrap();
    assert!(session.get_participants().is_empty());
}

#[test]
fn test_structural_defects_are_counted_and_refused() {
    let session = RtcpSession::new(0x1, Role::Receiver);
    let source = addr([10, 0, 0, 5], 5007);

    // wrong version
    let r = session.handle_rtcp(&[0x40, 200, 0x00, 0x00], source);
    assert_eq!(r, Err(Error::InvalidHeader));
    // padding bit set
    let r = session.handle_rtcp(&[0xA0, 200, 0x00, 0x00], source);
    assert_eq!(r, Err(Error::PaddingUnsupported));
    // unsupported type
    let r = session.handle_rtcp(&[0x80, 205, 0x00, 0x00], source);
    assert_eq!(r, Err(Error::UnsupportedType(205)));
    // header promises more than the datagram holds
    let r = session.handle_rtcp(&[0x80, 200, 0x00, 0x06], source);
    assert_eq!(r, Err(Error::Truncated));

    assert_eq!(session.dropped_packets(), 4);
    assert!(session.get_participants().is_empty());
}

// =============================================================================
// Self-SSRC collision (S6)
// =============================================================================

#[test]
fn test_self_ssrc_collision_resets_identity() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let dst_port = listener.local_addr().unwrap().port();

    let rtp = Arc::new(MockRtp {
        ssrc: AtomicU32::new(0x1111),
        clock_rate: 90000,
    });
    let session = RtcpSession::with_rtp(rtp.clone()).unwrap();
    session
        .add_participant("127.0.0.1", dst_port, free_port(), 90000)
        .unwrap();

    // the data path has been sending
    session.update_sender_stats(&rtp_packet(0x1111, 7, 0, 500));
    assert_eq!(session.sender_stats(), (1, 500, 7));

    // an SR claiming our SSRC arrives from a different endpoint
    session
        .handle_rtcp(&sr_datagram(0x1111), addr([10, 0, 0, 9], 9999))
        .unwrap();

    // BYE for the burned identifier reaches the configured destination
    let mut buf = [0u8; 256];
    let (n, _) = listener.recv_from(&mut buf).unwrap();
    let packets = rtm_rtcp::packet::unmarshal(&mut &buf[..n]).unwrap();
    let bye = packets[0]
        .as_any()
        .downcast_ref::<Goodbye>()
        .expect("BYE first");
    assert_eq!(bye.sources, vec![0x1111]);

    // fresh identity adopted, pushed to the data path, self stats zeroed
    let fresh = session.ssrc();
    assert_ne!(fresh, 0x1111);
    assert_eq!(rtp.ssrc(), fresh);
    assert_eq!(session.sender_stats(), (0, 0, 0));
}

// =============================================================================
// Scheduler loop over localhost sockets
// =============================================================================

/// Wait for the next RTCP datagram on `listener`, up to `deadline`.
fn next_compound(
    listener: &UdpSocket,
    deadline: Instant,
) -> Option<Vec<Box<dyn rtm_rtcp::Packet + Send + Sync>>> {
    let mut buf = [0u8; 1500];
    while Instant::now() < deadline {
        match listener.recv_from(&mut buf) {
            Ok((n, _)) => return rtm_rtcp::packet::unmarshal(&mut &buf[..n]).ok(),
            Err(_) => continue,
        }
    }
    None
}

#[test]
fn test_runner_emits_rr_compound_and_bye() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let dst_port = listener.local_addr().unwrap().port();

    let session = RtcpSession::new(0x2222, Role::Receiver);
    session
        .add_participant("127.0.0.1", dst_port, free_port(), 90000)
        .unwrap();
    session.start().unwrap();
    assert_eq!(session.start(), Err(Error::AlreadyRunning));

    // the initial interval is randomized around 2.5 s / 1.218
    let packets = next_compound(&listener, Instant::now() + Duration::from_secs(15))
        .expect("first scheduled compound");
    assert!(packets.len() >= 2);

    let rr = packets[0]
        .as_any()
        .downcast_ref::<ReceiverReport>()
        .expect("compound starts with RR");
    assert_eq!(rr.ssrc, 0x2222);

    let sdes = packets[1]
        .as_any()
        .downcast_ref::<SourceDescription>()
        .expect("SDES follows the report");
    assert!(sdes.chunks[0]
        .items
        .iter()
        .any(|i| i.sdes_type == SdesType::SdesCname));

    session.stop().unwrap();

    // goodbye arrives once the runner exits
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_bye = false;
    while let Some(packets) = next_compound(&listener, deadline) {
        if packets
            .iter()
            .any(|p| p.as_any().downcast_ref::<Goodbye>().is_some())
        {
            saw_bye = true;
            break;
        }
    }
    assert!(saw_bye, "BYE expected after stop()");
}

#[test]
fn test_runner_emits_sr_when_sending() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let dst_port = listener.local_addr().unwrap().port();

    let session = RtcpSession::new(0x3333, Role::Sender);
    session
        .add_participant("127.0.0.1", dst_port, free_port(), 90000)
        .unwrap();
    session.set_sender_ts_info(0, 90000, 1000).unwrap();

    for seq in 0..5u16 {
        session.update_sender_stats(&rtp_packet(0x3333, seq, seq as u32 * 3000, 1000));
    }
    session.start().unwrap();

    let packets = next_compound(&listener, Instant::now() + Duration::from_secs(15))
        .expect("first scheduled compound");
    let sr = packets[0]
        .as_any()
        .downcast_ref::<SenderReport>()
        .expect("sending session opens with SR");
    assert_eq!(sr.ssrc, 0x3333);
    assert_eq!(sr.packet_count, 5);
    assert_eq!(sr.octet_count, 5000);
    assert!(sr.ntp_time > 0);

    session.stop().unwrap();
}

#[test]
fn test_start_requires_participants() {
    let session = RtcpSession::new(0x4444, Role::Receiver);
    assert_eq!(session.start(), Err(Error::InvalidValue));
    // stop on a never-started session is harmless
    session.stop().unwrap();
}

#[test]
fn test_accounting_counters() {
    let session = RtcpSession::new(0x6666, Role::Receiver);
    assert_eq!(session.member_estimate(), (1, 1, 0));
    assert_eq!(session.rtcp_traffic(), (0, 0));

    session
        .add_participant("127.0.0.1", 9000, free_port(), 90000)
        .unwrap();
    assert_eq!(session.member_estimate(), (2, 1, 0));

    let datagram = sr_datagram(0x9A);
    session
        .handle_rtcp(&datagram, addr([10, 0, 0, 8], 5008))
        .unwrap();
    // one compound, its size counted with UDP+IP headers on top
    let (pkts, bytes) = session.rtcp_traffic();
    assert_eq!(pkts, 1);
    assert_eq!(bytes, (datagram.len() + 28) as u64);
}

#[test]
fn test_app_packet_broadcast() {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let dst_port = listener.local_addr().unwrap().port();

    let session = RtcpSession::new(0x5555, Role::Receiver);
    session
        .add_participant("127.0.0.1", dst_port, free_port(), 90000)
        .unwrap();

    session
        .send_app_packet(2, *b"stat", Bytes::from_static(&[9, 9, 9, 9]))
        .unwrap();

    let mut buf = [0u8; 256];
    let (n, _) = listener.recv_from(&mut buf).unwrap();
    let packets = rtm_rtcp::packet::unmarshal(&mut &buf[..n]).unwrap();
    let app = packets[0]
        .as_any()
        .downcast_ref::<ApplicationDefined>()
        .expect("APP packet");
    assert_eq!(app.ssrc, 0x5555);
    assert_eq!(&app.name, b"stat");
    assert_eq!(app.sub_type, 2);
}
