use std::time::Duration;

use rand::Rng;

/// Minimum deterministic report interval, seconds (RFC 3550 §6.2).
pub const RTCP_MIN_TIME: f64 = 5.0;
/// Member count at and above which a departing session delays its BYE.
pub const BYE_RECONSIDERATION_MEMBERS: usize = 50;

/// The randomized interval oscillates around the deterministic one; divide
/// by `e - 3/2` to keep its mean there (RFC 3550 §6.3.1).
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Deterministic interval before randomization, in seconds.
///
/// `members` and `senders` both include this session itself when it
/// counts. A zero bandwidth target degrades to the minimum interval rather
/// than dividing by zero.
pub fn deterministic_interval(
    members: usize,
    senders: usize,
    rtcp_bw: f64,
    we_sent: bool,
    avg_rtcp_size: f64,
    initial: bool,
) -> f64 {
    let t_min = if initial {
        RTCP_MIN_TIME / 2.0
    } else {
        RTCP_MIN_TIME
    };

    let n = if we_sent {
        senders.max(1)
    } else {
        members.max(1)
    };

    if rtcp_bw <= 0.0 {
        return t_min;
    }
    (avg_rtcp_size * n as f64 / rtcp_bw).max(t_min)
}

/// The next transmission delay: the deterministic interval scaled by a
/// uniform factor in [0.5, 1.5] and compensated per RFC 3550 §6.3.1.
pub fn rtcp_interval(
    members: usize,
    senders: usize,
    rtcp_bw: f64,
    we_sent: bool,
    avg_rtcp_size: f64,
    initial: bool,
) -> Duration {
    let t = deterministic_interval(members, senders, rtcp_bw, we_sent, avg_rtcp_size, initial);
    let factor: f64 = rand::rng().random_range(0.5..=1.5);
    Duration::from_secs_f64(t * factor / COMPENSATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_interval_floor() {
        // tiny sessions never report faster than the floor
        let t = deterministic_interval(2, 0, 1000.0, false, 128.0, false);
        assert_eq!(t, RTCP_MIN_TIME);
    }

    #[test]
    fn test_initial_interval_is_halved() {
        let t = deterministic_interval(2, 0, 1000.0, false, 128.0, true);
        assert_eq!(t, RTCP_MIN_TIME / 2.0);
    }

    #[test]
    fn test_bandwidth_scales_interval() {
        // 100 members at 128 octets each against 1000 octets/s: 12.8 s
        let t = deterministic_interval(100, 0, 1000.0, false, 128.0, false);
        assert!((t - 12.8).abs() < 1e-9);
    }

    #[test]
    fn test_senders_used_when_we_sent() {
        let t = deterministic_interval(100, 2, 10.0, true, 128.0, false);
        assert!((t - 25.6).abs() < 1e-9);
    }

    #[test]
    fn test_zero_bandwidth_degrades_to_minimum() {
        let t = deterministic_interval(100, 5, 0.0, false, 128.0, false);
        assert_eq!(t, RTCP_MIN_TIME);
        let t = deterministic_interval(100, 5, 0.0, false, 128.0, true);
        assert_eq!(t, RTCP_MIN_TIME / 2.0);
    }

    #[test]
    fn test_member_count_never_below_one() {
        let t = deterministic_interval(0, 0, 1000.0, false, 20000.0, false);
        assert!((t - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_randomized_interval_bounds() {
        // deterministic T = 5 s: the randomized value stays within
        // [0.5, 1.5] * T / (e - 3/2)
        let lo = 0.5 * RTCP_MIN_TIME / COMPENSATION;
        let hi = 1.5 * RTCP_MIN_TIME / COMPENSATION;
        for _ in 0..200 {
            let d = rtcp_interval(2, 0, 0.0, false, 128.0, false).as_secs_f64();
            assert!(d >= lo - 1e-9 && d <= hi + 1e-9, "out of range: {d}");
        }
    }
}
