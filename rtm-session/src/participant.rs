use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};

use rtm_rtcp::app_defined::ApplicationDefined;
use rtm_rtcp::receiver_report::ReceiverReport;
use rtm_rtcp::sender_report::SenderReport;
use rtm_rtcp::source_description::SourceDescription;
use rtm_shared::error::{Error, Result};

use crate::stats::SourceStats;
use crate::{MIN_SEQUENTIAL, RTP_SEQ_MOD};

/// Whether a participant has been seen sending RTP in the current
/// reporting interval.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    #[default]
    Receiver,
    Sender,
}

/// One session member: its transport endpoint, the socket its RTCP flows
/// over, reception statistics and the latest control frames it sent us.
#[derive(Debug)]
pub struct Participant {
    /// Where this participant's RTCP is sent. Stable for the lifetime of
    /// the SSRC; a packet claiming the SSRC from elsewhere is a collision.
    pub address: SocketAddr,
    /// Owned by the entry; dies with it. Stats-only shadow entries have none.
    pub socket: Option<UdpSocket>,
    pub role: Role,
    pub stats: SourceStats,
    /// Monotonic reading of the last packet from this source.
    pub last_heard: Instant,

    sr: Option<SenderReport>,
    rr: Option<ReceiverReport>,
    sdes: Option<SourceDescription>,
    app: Option<ApplicationDefined>,
}

impl Participant {
    fn with_socket(address: SocketAddr, socket: UdpSocket, clock_rate: u32) -> Self {
        Participant {
            address,
            socket: Some(socket),
            role: Role::Receiver,
            stats: SourceStats {
                clock_rate,
                ..Default::default()
            },
            last_heard: Instant::now(),
            sr: None,
            rr: None,
            sdes: None,
            app: None,
        }
    }

    /// A stats-only entry for a source that showed up without being
    /// configured first.
    fn shadow(address: SocketAddr, now: Instant) -> Self {
        Participant {
            address,
            socket: None,
            role: Role::Receiver,
            stats: SourceStats::default(),
            last_heard: now,
            sr: None,
            rr: None,
            sdes: None,
            app: None,
        }
    }

    pub fn cache_sr(&mut self, frame: SenderReport) {
        self.sr = Some(frame);
    }

    pub fn cache_rr(&mut self, frame: ReceiverReport) {
        self.rr = Some(frame);
    }

    pub fn cache_sdes(&mut self, frame: SourceDescription) {
        self.sdes = Some(frame);
    }

    pub fn cache_app(&mut self, frame: ApplicationDefined) {
        self.app = Some(frame);
    }
}

/// The session membership table: configured-but-unidentified entries wait
/// in `pending` until their SSRC is learned, then move to the active map.
///
/// All mutation happens on the scheduler thread; other threads reach the
/// table only through the session's critical section.
#[derive(Debug, Default)]
pub struct ParticipantTable {
    pending: Vec<Participant>,
    active: HashMap<u32, Participant>,
}

impl ParticipantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a destination before its SSRC is known: build the RTCP
    /// socket and park the entry until a packet identifies the peer.
    pub fn add_initial(
        &mut self,
        dst_addr: &str,
        dst_port: u16,
        src_port: u16,
        clock_rate: u32,
    ) -> Result<()> {
        if dst_addr.is_empty() || dst_port == 0 || src_port == 0 {
            return Err(Error::InvalidValue);
        }
        let ip: IpAddr = dst_addr.parse().map_err(|_| Error::InvalidValue)?;

        let socket = build_rtcp_socket(ip, src_port)?;
        debug!("rtcp socket bound to port {src_port} for {dst_addr}:{dst_port}");

        self.pending.push(Participant::with_socket(
            SocketAddr::new(ip, dst_port),
            socket,
            clock_rate,
        ));
        Ok(())
    }

    /// First RTP packet from an unknown SSRC: claim a pending entry (or
    /// build a shadow one) and anchor its sequence state. The packet
    /// piggybacks on validation and is not yet counted.
    pub fn promote(
        &mut self,
        ssrc: u32,
        first_seq: u16,
        initial_rtp: u32,
        initial_ntp: u64,
        fallback_clock_rate: u32,
        source: SocketAddr,
        now: Instant,
    ) -> &mut Participant {
        let mut p = self
            .pending
            .pop()
            .unwrap_or_else(|| Participant::shadow(source, now));

        p.stats.init_seq(first_seq);
        p.stats.probation = MIN_SEQUENTIAL - 1;
        p.stats.initial_rtp = initial_rtp;
        p.stats.initial_ntp = initial_ntp;
        if p.stats.clock_rate == 0 {
            p.stats.clock_rate = fallback_clock_rate;
        }
        p.last_heard = now;

        self.active.insert(ssrc, p);
        self.active.get_mut(&ssrc).expect("just inserted")
    }

    /// An RTCP packet introduced an unknown SSRC: claim a pending entry (or
    /// build a shadow one) without anchoring sequence state. The first RTP
    /// packet still has to run full probation.
    pub fn ensure(
        &mut self,
        ssrc: u32,
        source: SocketAddr,
        fallback_clock_rate: u32,
        now: Instant,
    ) -> &mut Participant {
        if !self.active.contains_key(&ssrc) {
            let mut p = self
                .pending
                .pop()
                .unwrap_or_else(|| Participant::shadow(source, now));
            p.stats.probation = MIN_SEQUENTIAL;
            p.stats.bad_seq = RTP_SEQ_MOD + 1;
            if p.stats.clock_rate == 0 {
                p.stats.clock_rate = fallback_clock_rate;
            }
            self.active.insert(ssrc, p);
        }
        self.active.get_mut(&ssrc).expect("present")
    }

    pub fn is_known(&self, ssrc: u32) -> bool {
        self.active.contains_key(&ssrc)
    }

    pub fn get(&self, ssrc: u32) -> Option<&Participant> {
        self.active.get(&ssrc)
    }

    pub fn get_mut(&mut self, ssrc: u32) -> Option<&mut Participant> {
        self.active.get_mut(&ssrc)
    }

    pub fn address_of(&self, ssrc: u32) -> Option<SocketAddr> {
        self.active.get(&ssrc).map(|p| p.address)
    }

    pub fn stats_mut(&mut self, ssrc: u32) -> Option<&mut SourceStats> {
        self.active.get_mut(&ssrc).map(|p| &mut p.stats)
    }

    /// True when `ssrc` is known but `source` is a different endpoint.
    ///
    /// RTP and RTCP legitimately arrive from different ports of the same
    /// host, so only a packet differing in both address and port is treated
    /// as a collision or loop.
    pub fn collision(&self, ssrc: u32, source: SocketAddr) -> bool {
        match self.active.get(&ssrc) {
            Some(p) => p.address.ip() != source.ip() && p.address.port() != source.port(),
            None => false,
        }
    }

    /// Drop an entry; its socket closes with it.
    pub fn remove(&mut self, ssrc: u32) -> Option<Participant> {
        self.active.remove(&ssrc)
    }

    /// Drop active entries that have been silent past `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let stale: Vec<u32> = self
            .active
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_heard) > timeout)
            .map(|(ssrc, _)| *ssrc)
            .collect();
        for ssrc in &stale {
            debug!("participant {ssrc:#010x} timed out");
            self.active.remove(ssrc);
        }
        stale.len()
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        self.active.keys().copied().collect()
    }

    /// All entries, identified or not.
    pub fn len(&self) -> usize {
        self.pending.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_sockets(&self) -> bool {
        self.sockets().next().is_some()
    }

    /// Validated sources that sent RTP this interval.
    pub fn sender_count(&self) -> usize {
        self.active
            .values()
            .filter(|p| p.role == Role::Sender && p.stats.probation == 0)
            .count()
    }

    /// Start the next interval with everyone demoted to receiver; the next
    /// RTP packet promotes its source again.
    pub fn reset_roles(&mut self) {
        for p in self.active.values_mut() {
            p.role = Role::Receiver;
        }
    }

    /// The listening set the scheduler polls.
    pub fn sockets(&self) -> impl Iterator<Item = &UdpSocket> {
        self.pending
            .iter()
            .chain(self.active.values())
            .filter_map(|p| p.socket.as_ref())
    }

    /// Send one serialized compound to every entry with a known
    /// destination. Transport failures are logged and skipped; RTCP has no
    /// retries.
    pub fn broadcast(&self, payload: &[u8]) -> usize {
        let mut sent = 0;
        for p in self.pending.iter().chain(self.active.values()) {
            let Some(socket) = p.socket.as_ref() else {
                continue;
            };
            match socket.send_to(payload, p.address) {
                Ok(_) => sent += 1,
                Err(e) => warn!("rtcp send to {} failed: {e}", p.address),
            }
        }
        sent
    }

    /// Iterate validated entries for report assembly.
    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = (&u32, &mut Participant)> {
        self.active.iter_mut()
    }

    pub fn take_sender_packet(&mut self, ssrc: u32) -> Option<SenderReport> {
        self.active.get_mut(&ssrc).and_then(|p| p.sr.take())
    }

    pub fn take_receiver_packet(&mut self, ssrc: u32) -> Option<ReceiverReport> {
        self.active.get_mut(&ssrc).and_then(|p| p.rr.take())
    }

    pub fn take_sdes_packet(&mut self, ssrc: u32) -> Option<SourceDescription> {
        self.active.get_mut(&ssrc).and_then(|p| p.sdes.take())
    }

    pub fn take_app_packet(&mut self, ssrc: u32) -> Option<ApplicationDefined> {
        self.active.get_mut(&ssrc).and_then(|p| p.app.take())
    }
}

/// Build the RTCP socket for one destination: address reuse on, receive
/// timeout under the 5 s ceiling, non-blocking so the scheduler can drain
/// the whole listening set in one pass.
fn build_rtcp_socket(dst_ip: IpAddr, src_port: u16) -> Result<UdpSocket> {
    let domain = match dst_ip {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.set_read_timeout(Some(Duration::from_secs(3)))?;
    socket.set_nonblocking(true)?;

    let bind_ip: IpAddr = match dst_ip {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    socket.bind(&SocketAddr::new(bind_ip, src_port).into())?;

    Ok(socket.into())
}
