use chrono::{DateTime, Duration, Utc};

/// Estimates the hub/peer clock offset from a single timestamped round
/// trip, assuming symmetric one-way latency.
///
/// One estimate per session is sufficient: scheduled countdowns only need
/// to line up to the second, not the millisecond.
#[derive(Debug, Default)]
pub struct ClockSync {
    offset: Option<Duration>,
    pending_sent_at: Option<DateTime<Utc>>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// offset ≈ remote − (send + receive) / 2
    pub fn offset_from_round_trip(
        local_send: DateTime<Utc>,
        remote_timestamp: DateTime<Utc>,
        local_receive: DateTime<Utc>,
    ) -> Duration {
        let midpoint = local_send + (local_receive - local_send) / 2;
        remote_timestamp - midpoint
    }

    /// Records the send instant of an outgoing sync request.
    pub fn begin_round_trip(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.pending_sent_at = Some(now);
        now
    }

    /// Completes the round trip with the remote's timestamp. A reply with
    /// no matching request is ignored.
    pub fn complete_round_trip(&mut self, remote_timestamp: DateTime<Utc>) {
        self.complete_round_trip_at(remote_timestamp, Utc::now());
    }

    pub fn complete_round_trip_at(
        &mut self,
        remote_timestamp: DateTime<Utc>,
        local_receive: DateTime<Utc>,
    ) {
        if let Some(sent_at) = self.pending_sent_at.take() {
            let offset = Self::offset_from_round_trip(sent_at, remote_timestamp, local_receive);
            tracing::debug!(offset_ms = offset.num_milliseconds(), "Clock offset learned");
            self.offset = Some(offset);
        }
    }

    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    pub fn offset(&self) -> Duration {
        self.offset.unwrap_or_else(Duration::zero)
    }

    /// Converts an instant expressed on the remote's wall clock into the
    /// local clock, so countdowns on every screen reach zero together.
    pub fn local_instant(&self, remote_wall_clock: DateTime<Utc>) -> DateTime<Utc> {
        remote_wall_clock - self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_offset_with_skewed_remote() {
        // Remote clock runs 5s ahead; round trip takes 2s.
        let offset = ClockSync::offset_from_round_trip(at(0), at(6), at(2));
        assert_eq!(offset, Duration::seconds(5));
    }

    #[test]
    fn test_offset_with_aligned_clocks() {
        let offset = ClockSync::offset_from_round_trip(at(0), at(1), at(2));
        assert_eq!(offset, Duration::zero());
    }

    #[test]
    fn test_local_instant_compensates_skew() {
        let mut clock = ClockSync::new();
        clock.pending_sent_at = Some(at(0));
        clock.complete_round_trip_at(at(6), at(2));
        assert!(clock.is_synced());

        // The hub schedules on its own clock, which runs 5s fast, so the
        // local firing instant is 5s earlier.
        let hub_instant = at(17);
        assert_eq!(clock.local_instant(hub_instant), at(12));
    }

    #[test]
    fn test_unsolicited_reply_ignored() {
        let mut clock = ClockSync::new();
        clock.complete_round_trip_at(at(6), at(2));
        assert!(!clock.is_synced());
        assert_eq!(clock.offset(), Duration::zero());
    }
}
