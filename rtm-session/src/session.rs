use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};

use rtm_rtcp::app_defined::ApplicationDefined;
use rtm_rtcp::compound_packet::CompoundPacket;
use rtm_rtcp::goodbye::Goodbye;
use rtm_rtcp::packet::Packet;
use rtm_rtcp::receiver_report::ReceiverReport;
use rtm_rtcp::sender_report::SenderReport;
use rtm_rtcp::source_description::SourceDescription;
use rtm_shared::error::{Error, Result};
use rtm_shared::marshal::Marshal;
use rtm_shared::time::{self, SystemClock};
use rtm_shared::util::random_cname;

use crate::participant::{ParticipantTable, Role};
use crate::stats::{SeqStatus, SourceStats};
use crate::{interval, report, runner, MIN_TIMEOUT_MS};

const UDP_HEADER_SIZE: usize = 8;
const IP_HEADER_SIZE: usize = 20;

/// The data-path context this control plane is attached to.
///
/// Implemented by the RTP side; the session reads identity and media clock
/// from it and tells it when a collision forces a new SSRC.
pub trait RtpContext: Send + Sync {
    fn ssrc(&self) -> u32;
    fn clock_rate(&self) -> u32;
    fn set_ssrc(&self, ssrc: u32);
}

/// What the data path should do with an RTP frame after the control plane
/// has seen it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketStatus {
    /// The frame was dropped here (collision, probation, misorder); do not
    /// process it further.
    Handled,
    /// Statistics were recorded; downstream handlers keep processing.
    NotHandled,
}

type SenderHook = Box<dyn FnMut(SenderReport) + Send>;
type ReceiverHook = Box<dyn FnMut(ReceiverReport) + Send>;
type SdesHook = Box<dyn FnMut(SourceDescription) + Send>;
type AppHook = Box<dyn FnMut(ApplicationDefined) + Send>;

#[derive(Default)]
struct Hooks {
    sender: Option<SenderHook>,
    receiver: Option<ReceiverHook>,
    sdes: Option<SdesHook>,
    app: Option<AppHook>,
}

/// A frame owed to a user hook, collected during dispatch and delivered
/// after the session state lock is released.
enum Delivery {
    Sender(SenderReport),
    Receiver(ReceiverReport),
    Sdes(SourceDescription),
    App(ApplicationDefined),
}

pub(crate) struct SessionState {
    pub ssrc: u32,
    #[allow(dead_code)]
    pub role: Role,
    /// Media clock rate for the session's own SR timestamps and as a
    /// fallback for sources with no configured rate.
    pub clock_rate: u32,
    pub table: ParticipantTable,
    pub cname: String,
    /// Reception-side statistics for the session itself; zeroed on
    /// collision together with the sender-side atomics.
    pub self_stats: SourceStats,

    pub members: usize,
    pub pmembers: usize,
    pub senders: usize,
    /// Target RTCP bandwidth, octets per second; zero means the interval
    /// floor governs.
    pub rtcp_bw: f64,
    pub avg_rtcp_size: f64,
    pub rtcp_pkt_count: u64,
    pub rtcp_byte_count: u64,
    pub initial: bool,
    pub tp: Instant,
    pub tn: Instant,

    /// NTP reading anchoring `rtp_ts_start` for SR timestamp projection.
    pub clock_start_ntp: u64,
    pub rtp_ts_start: u32,

    /// Datagrams refused for structural or collision reasons.
    pub dropped_rtcp: u64,
}

impl SessionState {
    /// Exponential average of compound sizes, UDP+IP headers included,
    /// maintained for both sent and received packets.
    pub(crate) fn update_rtcp_bandwidth(&mut self, pkt_size: usize) {
        let wire = (pkt_size + UDP_HEADER_SIZE + IP_HEADER_SIZE) as f64;
        self.rtcp_pkt_count += 1;
        self.rtcp_byte_count += wire as u64;
        self.avg_rtcp_size += (wire - self.avg_rtcp_size) / 16.0;
    }
}

pub(crate) struct Inner {
    pub state: Mutex<SessionState>,
    hooks: Mutex<Hooks>,
    pub clock: SystemClock,
    pub active: AtomicBool,
    /// True if the data path sent RTP since the last report went out.
    pub we_sent: AtomicBool,
    /// Mirror of `SessionState::ssrc` for lock-free reads on send paths.
    ssrc: AtomicU32,
    sent_pkts: AtomicU32,
    sent_bytes: AtomicU32,
    sent_max_seq: AtomicU32,
    rtp: Mutex<Option<Arc<dyn RtpContext>>>,
}

/// An RTCP session: the control plane of one RTP media stream.
///
/// Lock order inside is session state before hooks and state before the
/// RTP context; user hooks always run with every internal lock released.
pub struct RtcpSession {
    inner: Arc<Inner>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl RtcpSession {
    pub fn new(ssrc: u32, role: Role) -> Self {
        let now = Instant::now();
        let state = SessionState {
            ssrc,
            role,
            clock_rate: 0,
            table: ParticipantTable::new(),
            cname: random_cname(),
            self_stats: SourceStats::default(),
            members: 1,
            pmembers: 1,
            senders: 0,
            rtcp_bw: 0.0,
            avg_rtcp_size: 128.0,
            rtcp_pkt_count: 0,
            rtcp_byte_count: 0,
            initial: true,
            tp: now,
            tn: now,
            clock_start_ntp: 0,
            rtp_ts_start: rand::random::<u32>(),
            dropped_rtcp: 0,
        };

        RtcpSession {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                hooks: Mutex::new(Hooks::default()),
                clock: SystemClock::new(),
                active: AtomicBool::new(false),
                we_sent: AtomicBool::new(false),
                ssrc: AtomicU32::new(ssrc),
                sent_pkts: AtomicU32::new(0),
                sent_bytes: AtomicU32::new(0),
                sent_max_seq: AtomicU32::new(0),
                rtp: Mutex::new(None),
            }),
            runner: Mutex::new(None),
        }
    }

    /// Build a session that takes its identity and clock from the data path.
    pub fn with_rtp(rtp: Arc<dyn RtpContext>) -> Result<Self> {
        let session = Self::new(rtp.ssrc(), Role::Receiver);
        session.attach_rtp(rtp)?;
        Ok(session)
    }

    /// Attach (or replace) the RTP context; identity and clock rate are
    /// taken over from it.
    pub fn attach_rtp(&self, rtp: Arc<dyn RtpContext>) -> Result<()> {
        {
            let mut state = self.inner.state.lock()?;
            state.ssrc = rtp.ssrc();
            state.clock_rate = rtp.clock_rate();
        }
        self.inner.ssrc.store(rtp.ssrc(), Ordering::Relaxed);
        *self.inner.rtp.lock()? = Some(rtp);
        Ok(())
    }

    /// This session's current SSRC. Changes when a collision forces a new
    /// identity.
    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc.load(Ordering::Relaxed)
    }

    /// Target RTCP bandwidth in octets per second. Zero (the default)
    /// pins the report interval at its floor.
    pub fn set_rtcp_bandwidth(&self, octets_per_sec: f64) -> Result<()> {
        self.inner.state.lock()?.rtcp_bw = octets_per_sec;
        Ok(())
    }

    /// Anchor SR timestamp projection: the NTP reading for t = 0, the
    /// media clock rate, and the RTP timestamp counting starts from.
    pub fn set_sender_ts_info(
        &self,
        clock_start: u64,
        clock_rate: u32,
        rtp_ts_start: u32,
    ) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        state.clock_start_ntp = clock_start;
        state.clock_rate = clock_rate;
        state.rtp_ts_start = rtp_ts_start;
        Ok(())
    }

    /// Configure a destination: RTCP to `dst_addr:dst_port`, listening on
    /// `src_port`. `clock_rate` is the remote's media clock, needed for its
    /// jitter arithmetic.
    pub fn add_participant(
        &self,
        dst_addr: &str,
        dst_port: u16,
        src_port: u16,
        clock_rate: u32,
    ) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        state.table.add_initial(dst_addr, dst_port, src_port, clock_rate)?;
        state.members += 1;
        Ok(())
    }

    /// SSRCs of every identified participant.
    pub fn get_participants(&self) -> Vec<u32> {
        match self.inner.state.lock() {
            Ok(state) => state.table.ssrcs(),
            Err(_) => vec![],
        }
    }

    /// Snapshot of a participant's reception statistics.
    pub fn stats_of(&self, ssrc: u32) -> Option<SourceStats> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.table.get(ssrc).map(|p| p.stats.clone()))
    }

    /// Datagrams refused for structural or collision reasons so far.
    pub fn dropped_packets(&self) -> u64 {
        self.inner
            .state
            .lock()
            .map(|state| state.dropped_rtcp)
            .unwrap_or(0)
    }

    /// Member accounting at the last recomputation:
    /// `(members, pmembers, senders)`.
    pub fn member_estimate(&self) -> (usize, usize, usize) {
        match self.inner.state.lock() {
            Ok(state) => (state.members, state.pmembers, state.senders),
            Err(_) => (0, 0, 0),
        }
    }

    /// RTCP traffic accounting: compound packets and octets (UDP+IP
    /// headers included), sent and received combined.
    pub fn rtcp_traffic(&self) -> (u64, u64) {
        match self.inner.state.lock() {
            Ok(state) => (state.rtcp_pkt_count, state.rtcp_byte_count),
            Err(_) => (0, 0),
        }
    }

    /// Sender-side self statistics: packets, octets, last sequence number.
    pub fn sender_stats(&self) -> (u32, u32, u16) {
        (
            self.inner.sent_pkts.load(Ordering::Relaxed),
            self.inner.sent_bytes.load(Ordering::Relaxed),
            self.inner.sent_max_seq.load(Ordering::Relaxed) as u16,
        )
    }

    /// Start the scheduler thread. Fails with `InvalidValue` when no
    /// participant socket exists to poll.
    pub fn start(&self) -> Result<()> {
        {
            let state = self.inner.state.lock()?;
            if !state.table.has_sockets() {
                return Err(Error::InvalidValue);
            }
        }
        if self.inner.active.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name("rtcp-runner".to_owned())
            .spawn(move || runner::run(inner))
        {
            Ok(handle) => {
                *self.runner.lock()? = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the scheduler. The runner says goodbye to every participant
    /// before it exits; the call returns once the thread has joined.
    pub fn stop(&self) -> Result<()> {
        self.inner.active.store(false, Ordering::Release);
        if let Some(handle) = self.runner.lock()?.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn install_sender_hook(
        &self,
        hook: impl FnMut(SenderReport) + Send + 'static,
    ) -> Result<()> {
        self.inner.hooks.lock()?.sender = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_receiver_hook(
        &self,
        hook: impl FnMut(ReceiverReport) + Send + 'static,
    ) -> Result<()> {
        self.inner.hooks.lock()?.receiver = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_sdes_hook(
        &self,
        hook: impl FnMut(SourceDescription) + Send + 'static,
    ) -> Result<()> {
        self.inner.hooks.lock()?.sdes = Some(Box::new(hook));
        Ok(())
    }

    pub fn install_app_hook(
        &self,
        hook: impl FnMut(ApplicationDefined) + Send + 'static,
    ) -> Result<()> {
        self.inner.hooks.lock()?.app = Some(Box::new(hook));
        Ok(())
    }

    /// Latest SR received from `ssrc`; ownership moves to the caller and
    /// the cache slot empties.
    pub fn take_sender_packet(&self, ssrc: u32) -> Option<SenderReport> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|mut s| s.table.take_sender_packet(ssrc))
    }

    pub fn take_receiver_packet(&self, ssrc: u32) -> Option<ReceiverReport> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|mut s| s.table.take_receiver_packet(ssrc))
    }

    pub fn take_sdes_packet(&self, ssrc: u32) -> Option<SourceDescription> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|mut s| s.table.take_sdes_packet(ssrc))
    }

    pub fn take_app_packet(&self, ssrc: u32) -> Option<ApplicationDefined> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|mut s| s.table.take_app_packet(ssrc))
    }

    /// Record one RTP packet the data path sent. Callable from any thread.
    pub fn update_sender_stats(&self, frame: &rtm_rtp::Packet) {
        self.inner.sent_pkts.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sent_bytes
            .fetch_add(frame.payload.len() as u32, Ordering::Relaxed);
        self.inner
            .sent_max_seq
            .store(frame.header.sequence_number as u32, Ordering::Relaxed);
        self.inner.we_sent.store(true, Ordering::Relaxed);
    }

    /// The data-path handler hook: feed one received RTP frame through the
    /// reception estimator.
    ///
    /// Returns [`PacketStatus::NotHandled`] when downstream handlers should
    /// keep processing the frame, [`PacketStatus::Handled`] when the
    /// control plane dropped it (collision, probation, misorder), and
    /// `SsrcCollision` when a self-collision reset landed on yet another
    /// taken identifier (retry with [`reset_rtcp_state`]).
    ///
    /// [`reset_rtcp_state`]: RtcpSession::reset_rtcp_state
    pub fn handle_rtp(&self, frame: &rtm_rtp::Packet, source: SocketAddr) -> Result<PacketStatus> {
        let now = Instant::now();
        let now_ntp = self.inner.clock.ntp(now);
        let mut state = self.inner.state.lock()?;

        let ssrc = frame.header.ssrc;
        if ssrc == state.ssrc {
            // our own identifier arriving from the network is a collision
            // (or a loop); retire it and pick a fresh one
            self.inner.reset_self(&mut state)?;
            return Ok(PacketStatus::Handled);
        }

        if state.table.is_known(ssrc) {
            if state.table.collision(ssrc, source) {
                state.dropped_rtcp += 1;
                debug!("dropping rtp from {source}: ssrc {ssrc:#010x} bound elsewhere");
                return Ok(PacketStatus::Handled);
            }
            let p = state.table.get_mut(ssrc).expect("known");
            p.last_heard = now;
            p.role = Role::Sender;
            if p.stats.initial_ntp == 0 {
                // entry was created by RTCP; anchor the jitter projection
                // at the first RTP packet
                p.stats.initial_ntp = now_ntp;
                p.stats.initial_rtp = frame.header.timestamp;
            }
            match p.stats.update_seq(frame.header.sequence_number) {
                SeqStatus::Accepted => {
                    p.stats.record_received(frame.payload.len());
                    p.stats.update_jitter(frame.header.timestamp, now_ntp);
                }
                SeqStatus::Rejected => return Ok(PacketStatus::Handled),
            }
        } else {
            let clock_rate = state.clock_rate;
            let p = state.table.promote(
                ssrc,
                frame.header.sequence_number,
                frame.header.timestamp,
                now_ntp,
                clock_rate,
                source,
                now,
            );
            p.role = Role::Sender;
            // first packet only anchors the sequence state; it is not
            // counted until probation clears, but it still flows on to
            // downstream handlers
        }

        Ok(PacketStatus::NotHandled)
    }

    /// Validate and dispatch one received RTCP datagram.
    ///
    /// This is what the scheduler thread calls for every datagram its
    /// sockets yield; it is public so custom transports can inject
    /// compounds themselves.
    pub fn handle_rtcp(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        self.inner.dispatch_rtcp(data, source)
    }

    /// Pick a fresh random SSRC after [`handle_rtp`] or [`handle_rtcp`]
    /// reported `SsrcCollision`. Returns the adopted identifier.
    ///
    /// [`handle_rtp`]: RtcpSession::handle_rtp
    /// [`handle_rtcp`]: RtcpSession::handle_rtcp
    pub fn reset_rtcp_state(&self) -> Result<u32> {
        let mut state = self.inner.state.lock()?;
        self.inner.adopt_new_ssrc(&mut state)
    }

    /// Send an application-defined packet to every participant.
    pub fn send_app_packet(&self, sub_type: u8, name: [u8; 4], data: Bytes) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        let app = ApplicationDefined {
            sub_type,
            ssrc: state.ssrc,
            name,
            data,
        };
        let raw = app.marshal()?;
        state.table.broadcast(&raw);
        state.update_rtcp_bandwidth(raw.len());
        Ok(())
    }
}

impl Drop for RtcpSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl Inner {
    pub(crate) fn dispatch_rtcp(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        let now = Instant::now();

        let packets = match rtm_rtcp::packet::unmarshal(&mut &data[..]) {
            Ok(packets) => packets,
            Err(e) => {
                self.state.lock()?.dropped_rtcp += 1;
                return Err(e);
            }
        };

        let mut deliveries = vec![];
        {
            let mut state = self.state.lock()?;
            state.update_rtcp_bandwidth(data.len());

            for pkt in &packets {
                let any = pkt.as_any();
                if let Some(sr) = any.downcast_ref::<SenderReport>() {
                    self.on_sender_report(&mut state, sr, source, now, &mut deliveries)?;
                } else if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
                    self.on_receiver_report(&mut state, rr, source, now, &mut deliveries)?;
                } else if let Some(sdes) = any.downcast_ref::<SourceDescription>() {
                    self.on_sdes(&mut state, sdes, source, now, &mut deliveries)?;
                } else if let Some(bye) = any.downcast_ref::<Goodbye>() {
                    self.on_bye(&mut state, bye);
                } else if let Some(app) = any.downcast_ref::<ApplicationDefined>() {
                    self.on_app(&mut state, app, source, now, &mut deliveries)?;
                }
            }
        }
        self.deliver(deliveries);
        Ok(())
    }

    fn on_sender_report(
        &self,
        state: &mut SessionState,
        sr: &SenderReport,
        source: SocketAddr,
        now: Instant,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        if sr.ssrc == state.ssrc {
            return self.reset_self(state);
        }
        if state.table.collision(sr.ssrc, source) {
            state.dropped_rtcp += 1;
            debug!("dropping SR from {source}: ssrc {:#010x} bound elsewhere", sr.ssrc);
            return Ok(());
        }

        let clock_rate = state.clock_rate;
        let deliver = self.hooks.lock()?.sender.is_some();
        let p = state.table.ensure(sr.ssrc, source, clock_rate, now);
        p.last_heard = now;
        p.role = Role::Sender;
        p.stats.lsr = (sr.ntp_time >> 16) as u32;
        p.stats.sr_ts = Some(now);

        if deliver {
            deliveries.push(Delivery::Sender(sr.clone()));
        } else {
            p.cache_sr(sr.clone());
        }
        Ok(())
    }

    fn on_receiver_report(
        &self,
        state: &mut SessionState,
        rr: &ReceiverReport,
        source: SocketAddr,
        now: Instant,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        if rr.ssrc == state.ssrc {
            return self.reset_self(state);
        }
        if state.table.collision(rr.ssrc, source) {
            state.dropped_rtcp += 1;
            debug!("dropping RR from {source}: ssrc {:#010x} bound elsewhere", rr.ssrc);
            return Ok(());
        }

        let clock_rate = state.clock_rate;
        let deliver = self.hooks.lock()?.receiver.is_some();
        let p = state.table.ensure(rr.ssrc, source, clock_rate, now);
        p.last_heard = now;

        if deliver {
            deliveries.push(Delivery::Receiver(rr.clone()));
        } else {
            p.cache_rr(rr.clone());
        }
        Ok(())
    }

    fn on_sdes(
        &self,
        state: &mut SessionState,
        sdes: &SourceDescription,
        source: SocketAddr,
        now: Instant,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        let deliver = self.hooks.lock()?.sdes.is_some();
        let clock_rate = state.clock_rate;

        for chunk in &sdes.chunks {
            if chunk.source == state.ssrc {
                self.reset_self(state)?;
                continue;
            }
            if state.table.collision(chunk.source, source) {
                state.dropped_rtcp += 1;
                continue;
            }
            let p = state.table.ensure(chunk.source, source, clock_rate, now);
            p.last_heard = now;
            if !deliver {
                p.cache_sdes(sdes.clone());
            }
        }

        if deliver {
            deliveries.push(Delivery::Sdes(sdes.clone()));
        }
        Ok(())
    }

    fn on_bye(&self, state: &mut SessionState, bye: &Goodbye) {
        for ssrc in &bye.sources {
            if state.table.remove(*ssrc).is_some() {
                state.members = state.members.saturating_sub(1);
                if bye.reason.is_empty() {
                    debug!("participant {ssrc:#010x} left the session");
                } else {
                    debug!(
                        "participant {ssrc:#010x} left: {}",
                        String::from_utf8_lossy(&bye.reason)
                    );
                }
            }
        }
    }

    fn on_app(
        &self,
        state: &mut SessionState,
        app: &ApplicationDefined,
        source: SocketAddr,
        now: Instant,
        deliveries: &mut Vec<Delivery>,
    ) -> Result<()> {
        if app.ssrc == state.ssrc {
            return self.reset_self(state);
        }
        if state.table.collision(app.ssrc, source) {
            state.dropped_rtcp += 1;
            return Ok(());
        }

        let clock_rate = state.clock_rate;
        let deliver = self.hooks.lock()?.app.is_some();
        let p = state.table.ensure(app.ssrc, source, clock_rate, now);
        p.last_heard = now;

        if deliver {
            deliveries.push(Delivery::App(app.clone()));
        } else {
            p.cache_app(app.clone());
        }
        Ok(())
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }
        let Ok(mut hooks) = self.hooks.lock() else {
            return;
        };
        for delivery in deliveries {
            match delivery {
                Delivery::Sender(frame) => {
                    if let Some(hook) = hooks.sender.as_mut() {
                        hook(frame);
                    }
                }
                Delivery::Receiver(frame) => {
                    if let Some(hook) = hooks.receiver.as_mut() {
                        hook(frame);
                    }
                }
                Delivery::Sdes(frame) => {
                    if let Some(hook) = hooks.sdes.as_mut() {
                        hook(frame);
                    }
                }
                Delivery::App(frame) => {
                    if let Some(hook) = hooks.app.as_mut() {
                        hook(frame);
                    }
                }
            }
        }
    }

    /// Self-SSRC collision: say goodbye to the burned identifier, zero the
    /// session's own statistics and adopt a fresh random SSRC.
    fn reset_self(&self, state: &mut SessionState) -> Result<()> {
        let old = state.ssrc;
        match report::bye_packet(old).marshal() {
            Ok(raw) => {
                state.table.broadcast(&raw);
                state.update_rtcp_bandwidth(raw.len());
            }
            Err(e) => warn!("failed to serialize collision BYE: {e}"),
        }

        state.self_stats.reset();
        self.sent_pkts.store(0, Ordering::Relaxed);
        self.sent_bytes.store(0, Ordering::Relaxed);
        self.sent_max_seq.store(0, Ordering::Relaxed);

        let adopted = self.adopt_new_ssrc(state)?;
        warn!("ssrc collision: {old:#010x} retired, continuing as {adopted:#010x}");
        Ok(())
    }

    /// Draw a fresh identifier; the remote table survives so a second
    /// collision is detected immediately and reported for retry.
    pub(crate) fn adopt_new_ssrc(&self, state: &mut SessionState) -> Result<u32> {
        let fresh = rand::random::<u32>();
        if state.table.is_known(fresh) {
            return Err(Error::SsrcCollision);
        }
        state.ssrc = fresh;
        self.ssrc.store(fresh, Ordering::Relaxed);
        if let Some(rtp) = self.rtp.lock()?.as_ref() {
            rtp.set_ssrc(fresh);
        }
        Ok(fresh)
    }

    /// Assemble and send the scheduled compound report, then recompute the
    /// transmission timeline.
    pub(crate) fn emit_report(&self, now: Instant) -> Result<()> {
        let mut state = self.state.lock()?;

        state
            .table
            .expire(now, Duration::from_millis(5 * MIN_TIMEOUT_MS));
        state.members = 1 + state.table.len();
        let we_sent = self.we_sent.load(Ordering::Relaxed);
        state.senders = state.table.sender_count() + usize::from(we_sent);

        debug!(
            "rtcp report due; previous went out {:?} ago",
            now.duration_since(state.tp)
        );

        // schedule first so a failed send cannot hot-loop the runner
        let t = interval::rtcp_interval(
            state.members,
            state.senders,
            state.rtcp_bw,
            we_sent,
            state.avg_rtcp_size,
            state.initial,
        );
        state.tp = now;
        state.tn = now + t;
        state.pmembers = state.members;
        state.initial = false;

        let reports = report::reception_reports(&mut state.table, now);
        let mut packets: Vec<Box<dyn Packet + Send + Sync>> = vec![];
        if we_sent {
            let now_ntp = self.clock.ntp(now);
            if state.clock_start_ntp == 0 {
                state.clock_start_ntp = now_ntp;
            }
            let rtp_time = time::rtp_timestamp(
                state.rtp_ts_start,
                time::ntp_diff_ms(now_ntp, state.clock_start_ntp),
                state.clock_rate,
            );
            packets.push(Box::new(SenderReport {
                ssrc: state.ssrc,
                ntp_time: now_ntp,
                rtp_time,
                packet_count: self.sent_pkts.load(Ordering::Relaxed),
                octet_count: self.sent_bytes.load(Ordering::Relaxed),
                reports,
                profile_extensions: Bytes::new(),
            }));
        } else {
            packets.push(Box::new(ReceiverReport {
                ssrc: state.ssrc,
                reports,
                profile_extensions: Bytes::new(),
            }));
        }
        packets.push(Box::new(report::sdes_packet(state.ssrc, &state.cname)));

        let raw = CompoundPacket(packets).marshal()?;
        if state.table.broadcast(&raw) > 0 {
            state.update_rtcp_bandwidth(raw.len());
        }

        state.table.reset_roles();
        self.we_sent.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Goodbye on the way out. Large sessions reconsider first so a mass
    /// departure cannot synchronize a BYE flood.
    pub(crate) fn emit_bye(&self) {
        let delay = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.members >= interval::BYE_RECONSIDERATION_MEMBERS {
                let t = interval::deterministic_interval(
                    state.members,
                    state.senders,
                    state.rtcp_bw,
                    false,
                    state.avg_rtcp_size,
                    false,
                ) * state.members as f64
                    / interval::BYE_RECONSIDERATION_MEMBERS as f64;

                // the departing session counts only itself from here on
                state.tp = Instant::now();
                state.members = 1;
                state.pmembers = 1;
                state.senders = 0;
                state.initial = true;
                Some(Duration::from_secs_f64(t))
            } else {
                None
            }
        };
        if let Some(d) = delay {
            thread::sleep(d);
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match report::bye_packet(state.ssrc).marshal() {
            Ok(raw) => {
                state.table.broadcast(&raw);
                state.update_rtcp_bandwidth(raw.len());
            }
            Err(e) => warn!("failed to serialize BYE: {e}"),
        }
        self.we_sent.store(false, Ordering::Relaxed);
    }
}
