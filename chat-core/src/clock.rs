//! Lamport logical clock.
//!
//! Wall-clock timestamps on records are set by the sender and cannot be
//! trusted to order concurrent messages. Every outgoing record is stamped
//! with a `lamport` tag; every incoming stamp advances the local clock.
//!
//! - Seeded from the highest stamp found in stored history
//! - Ticked once per outgoing stamped record
//! - Merged with `max` on every received stamp
//!
//! The value never decreases during a session.

use chat_types::Record;

/// Process-wide logical clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    /// Create a clock at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock seeded from historical records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut clock = Self::new();
        clock.seed(records);
        clock
    }

    /// Advance to the highest `lamport` stamp found in `records`.
    ///
    /// Records without a stamp are ignored; with none at all the clock
    /// stays where it is.
    pub fn seed<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        if let Some(max) = records.into_iter().filter_map(Record::lamport).max() {
            self.observe(max);
        }
    }

    /// Increment and return the new value. Call once per outgoing record.
    ///
    /// Saturates at `u64::MAX`; a peer can push the clock there with a
    /// single stamp.
    pub fn tick(&mut self) -> u64 {
        self.time = self.time.saturating_add(1);
        self.time
    }

    /// Merge a received stamp.
    pub fn observe(&mut self, value: u64) {
        self.time = self.time.max(value);
    }

    /// Current value without advancing.
    pub fn now(&self) -> u64 {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::{Kind, PublicKey, Tags, UnsignedRecord};

    fn stamped(lamport: Option<u64>) -> Record {
        let tags = match lamport {
            Some(v) => Tags::new().with_lamport(v),
            None => Tags::new(),
        };
        Record::from_unsigned(
            UnsignedRecord::new(PublicKey::from_bytes([1; 32]), Kind::DirectMessage, tags, ""),
            String::new(),
        )
    }

    #[test]
    fn seed_takes_max_stamp() {
        let records = [stamped(Some(3)), stamped(Some(1)), stamped(Some(4))];
        let mut clock = LamportClock::from_records(&records);

        assert_eq!(clock.now(), 4);
        assert_eq!(clock.tick(), 5);

        clock.observe(10);
        assert_eq!(clock.tick(), 11);
    }

    #[test]
    fn seed_without_stamps_is_zero() {
        let records = [stamped(None), stamped(None)];
        let clock = LamportClock::from_records(&records);
        assert_eq!(clock.now(), 0);
    }

    #[test]
    fn observe_never_decreases() {
        let mut clock = LamportClock::new();
        clock.observe(7);
        clock.observe(2);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn seed_after_ticks_does_not_regress() {
        let mut clock = LamportClock::new();
        for _ in 0..5 {
            clock.tick();
        }
        clock.seed(&[stamped(Some(2))]);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn ticks_are_strictly_increasing() {
        let mut clock = LamportClock::new();
        let a = clock.tick();
        let b = clock.tick();
        let c = clock.tick();
        assert!(a < b && b < c);
    }

    #[test]
    fn tick_saturates_after_max_stamp() {
        let mut clock = LamportClock::new();
        clock.observe(u64::MAX);

        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.now(), u64::MAX);
    }
}
