use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::interval;
use crate::session::Inner;

/// Shortest poll pause; keeps the loop from spinning when a report is due.
const POLL_FLOOR: Duration = Duration::from_millis(5);
/// Longest poll pause; bounds reaction time to `stop()` and to datagrams
/// arriving while the next report is far away.
const POLL_CAP: Duration = Duration::from_millis(250);
/// One datagram; RTCP compounds are required to fit a single MTU.
const RECV_BUF_LEN: usize = 1500;

/// The scheduler loop: drain every participant socket, dispatch what
/// arrived, and emit the compound report whenever the transmission time
/// passes. Runs until the session's active flag clears, then says goodbye.
pub(crate) fn run(inner: Arc<Inner>) {
    let mut buf = [0u8; RECV_BUF_LEN];

    {
        let Ok(mut state) = inner.state.lock() else {
            return;
        };
        let now = Instant::now();
        let t = interval::rtcp_interval(
            state.members,
            state.senders,
            state.rtcp_bw,
            false,
            state.avg_rtcp_size,
            state.initial,
        );
        state.tp = now;
        state.tn = now + t;
    }

    while inner.active.load(Ordering::Acquire) {
        let mut datagrams: Vec<(Vec<u8>, std::net::SocketAddr)> = vec![];
        {
            let Ok(state) = inner.state.lock() else {
                return;
            };
            for socket in state.table.sockets() {
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((n, source)) => datagrams.push((buf[..n].to_vec(), source)),
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            break;
                        }
                        Err(e) => {
                            warn!("rtcp recv failed: {e}");
                            break;
                        }
                    }
                }
            }
        }

        for (data, source) in datagrams {
            if let Err(e) = inner.dispatch_rtcp(&data, source) {
                debug!("dropping rtcp datagram from {source}: {e}");
            }
        }

        let now = Instant::now();
        let due = match inner.state.lock() {
            Ok(state) => now >= state.tn,
            Err(_) => return,
        };
        if due {
            if let Err(e) = inner.emit_report(now) {
                warn!("report emission failed: {e}");
            }
        }

        let sleep_for = match inner.state.lock() {
            Ok(state) => state
                .tn
                .saturating_duration_since(Instant::now())
                .clamp(POLL_FLOOR, POLL_CAP),
            Err(_) => return,
        };
        thread::sleep(sleep_for);
    }

    inner.emit_bye();
}
