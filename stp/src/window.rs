//! Fixed-capacity circular send window.
//!
//! [`SendWindow`] holds up to `capacity` in-flight DATA segments in a ring of
//! slots. `send_base` is the slot of the oldest unacknowledged segment.
//!
//! # Invariants
//!
//! - Occupied slots form one contiguous circular run starting at `send_base`.
//! - A slot empties exactly when a cumulative ACK covering its end sequence
//!   number is applied.
//!
//! ```text
//!            send_base
//!                │
//!  ┌──────┬──────▼──────┬──────┬──────┐
//!  │ None │ seg@3000    │ seg@4000    │ None │   capacity = 4
//!  └──────┴─────────────┴─────────────┴──────┘
//!                 └── in flight ──┘  └ next free slot
//! ```
//!
//! This module only manages slots; timers, duplicate-ACK counting and socket
//! I/O belong to [`crate::control`] and [`crate::sender`].

use crate::segment::Segment;

/// Result of matching a cumulative ACK against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMatch {
    /// The ACK covers the segment at `send_base` and possibly later ones;
    /// `cleared` slots were emptied.
    Advanced { cleared: usize },
    /// The ACK repeats the sequence number of the segment at `send_base`.
    Duplicate,
    /// The ACK matches nothing in flight.
    Unmatched,
}

/// Circular buffer of in-flight segments.
#[derive(Debug)]
pub struct SendWindow {
    slots: Vec<Option<Segment>>,
    send_base: usize,
}

impl SendWindow {
    /// Create an empty window with `capacity` slots (≥ 1).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            slots: vec![None; capacity],
            send_base: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of the oldest unacknowledged segment.
    pub fn send_base(&self) -> usize {
        self.send_base
    }

    /// Number of occupied slots.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.next_free().is_none()
    }

    /// Segment at `send_base`, if any.
    pub fn base(&self) -> Option<&Segment> {
        self.slots[self.send_base].as_ref()
    }

    /// First empty slot scanning circularly from `send_base`.
    ///
    /// Because occupied slots are contiguous from `send_base`, this is the
    /// slot right after the in-flight run.
    pub fn next_free(&self) -> Option<usize> {
        (0..self.capacity())
            .map(|off| (self.send_base + off) % self.capacity())
            .find(|&i| self.slots[i].is_none())
    }

    /// Place `segment` into the next free slot and return its index.
    ///
    /// Returns `None` (and drops nothing) when the window is full.
    pub fn push(&mut self, segment: Segment) -> Option<usize> {
        let index = self.next_free()?;
        self.slots[index] = Some(segment);
        Some(index)
    }

    /// Index of the occupied slot whose cumulative end equals `ack`.
    pub fn find_by_end(&self, ack: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|seg| seg.end_seq() == ack))
    }

    /// Apply a cumulative ACK.
    ///
    /// - match at `send_base` → that slot is cleared, `send_base` moves by one;
    /// - ACK equal to the `send_base` segment's own seq → [`AckMatch::Duplicate`];
    /// - match further along → every slot from `send_base` through the match
    ///   is cleared and `send_base` moves past it;
    /// - anything else → [`AckMatch::Unmatched`].
    pub fn on_ack(&mut self, ack: u16) -> AckMatch {
        let matched = self.find_by_end(ack);

        if matched == Some(self.send_base) {
            return AckMatch::Advanced {
                cleared: self.clear_through(self.send_base),
            };
        }
        if self.base().is_some_and(|seg| seg.seq == ack) {
            return AckMatch::Duplicate;
        }
        match matched {
            Some(index) => AckMatch::Advanced {
                cleared: self.clear_through(index),
            },
            None => AckMatch::Unmatched,
        }
    }

    /// Empty every slot and reset `send_base` to the first slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.send_base = 0;
    }

    /// In-flight segments from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        (0..self.capacity())
            .map(move |off| (self.send_base + off) % self.capacity())
            .map_while(move |i| self.slots[i].as_ref())
    }

    /// Clear `send_base..=index` (circular) and advance `send_base` past it.
    fn clear_through(&mut self, index: usize) -> usize {
        let mut cleared = 0;
        loop {
            let at = self.send_base;
            self.slots[at] = None;
            self.send_base = (self.send_base + 1) % self.capacity();
            cleared += 1;
            if at == index {
                return cleared;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fill `window` with `count` segments of `len` bytes starting at `seq`.
    fn fill(window: &mut SendWindow, mut seq: u16, len: usize, count: usize) -> u16 {
        for _ in 0..count {
            window.push(Segment::data(seq, vec![0u8; len])).unwrap();
            seq = crate::seq::advance(seq, len);
        }
        seq
    }

    /// Occupied slots must be one contiguous run starting at `send_base`.
    fn assert_contiguous(window: &SendWindow) {
        let cap = window.capacity();
        let run = window.in_flight();
        for off in 0..cap {
            let i = (window.send_base() + off) % cap;
            assert_eq!(
                window.slots[i].is_some(),
                off < run,
                "slot {i} breaks the run (send_base={}, run={run})",
                window.send_base()
            );
        }
    }

    #[test]
    fn initial_state() {
        let w = SendWindow::new(4);
        assert_eq!(w.capacity(), 4);
        assert_eq!(w.send_base(), 0);
        assert!(w.is_empty());
        assert_eq!(w.next_free(), Some(0));
        assert!(w.base().is_none());
    }

    #[test]
    fn push_fills_in_order_until_full() {
        let mut w = SendWindow::new(2);
        assert_eq!(w.push(Segment::data(0, vec![1; 10])), Some(0));
        assert_eq!(w.push(Segment::data(10, vec![2; 10])), Some(1));
        assert!(w.is_full());
        assert_eq!(w.push(Segment::data(20, vec![3; 10])), None);
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn ack_at_base_slides_by_one() {
        let mut w = SendWindow::new(4);
        fill(&mut w, 0, 10, 3);

        assert_eq!(w.on_ack(10), AckMatch::Advanced { cleared: 1 });
        assert_eq!(w.send_base(), 1);
        assert_eq!(w.in_flight(), 2);
        assert_contiguous(&w);
    }

    #[test]
    fn cumulative_ack_clears_exactly_through_match() {
        let mut w = SendWindow::new(5);
        fill(&mut w, 100, 10, 4); // ends: 110, 120, 130, 140

        // ACK for the third segment past send_base.
        assert_eq!(w.on_ack(130), AckMatch::Advanced { cleared: 3 });
        assert_eq!(w.send_base(), 3);
        assert_eq!(w.in_flight(), 1);
        assert_eq!(w.base().unwrap().seq, 130, "later slot must be untouched");
        assert_contiguous(&w);
    }

    #[test]
    fn cumulative_ack_wraps_around_the_ring() {
        let mut w = SendWindow::new(3);
        let next = fill(&mut w, 0, 5, 3); // slots 0,1,2
        assert_eq!(w.on_ack(10), AckMatch::Advanced { cleared: 2 }); // base → 2
        fill(&mut w, next, 5, 2); // occupies slots 0 and 1 (seq 15, 20)
        assert_contiguous(&w);

        // ACK 25 covers slot 2 (end 15), slot 0 (end 20), slot 1 (end 25).
        assert_eq!(w.on_ack(25), AckMatch::Advanced { cleared: 3 });
        assert!(w.is_empty());
        assert_eq!(w.send_base(), 2);
    }

    #[test]
    fn ack_for_base_seq_is_duplicate() {
        let mut w = SendWindow::new(4);
        fill(&mut w, 40, 10, 2);
        assert_eq!(w.on_ack(40), AckMatch::Duplicate);
        assert_eq!(w.in_flight(), 2);
        assert_eq!(w.send_base(), 0);
    }

    #[test]
    fn stale_or_unknown_ack_is_unmatched() {
        let mut w = SendWindow::new(4);
        fill(&mut w, 40, 10, 2);
        assert_eq!(w.on_ack(5), AckMatch::Unmatched);
        assert_eq!(w.on_ack(45), AckMatch::Unmatched);
        assert_eq!(w.in_flight(), 2);
    }

    #[test]
    fn matching_uses_wrapped_end_sequence() {
        let mut w = SendWindow::new(2);
        fill(&mut w, 65000, 1000, 2); // ends: 464, 1464
        assert_eq!(w.on_ack(464), AckMatch::Advanced { cleared: 1 });
        assert_eq!(w.on_ack(1464), AckMatch::Advanced { cleared: 1 });
        assert!(w.is_empty());
    }

    #[test]
    fn run_stays_contiguous_under_mixed_acks() {
        let mut w = SendWindow::new(4);
        let mut next = fill(&mut w, 0, 100, 4);
        let mut acked = 0u16;

        // Alternate single and cumulative ACKs while refilling.
        for step in 0..20 {
            let advance_by = if step % 3 == 0 { 2 } else { 1 };
            acked = crate::seq::advance(acked, 100 * advance_by);
            assert!(matches!(w.on_ack(acked), AckMatch::Advanced { .. }));
            assert_contiguous(&w);
            while !w.is_full() {
                next = fill(&mut w, next, 100, 1);
            }
            assert_contiguous(&w);
        }
    }

    #[test]
    fn iter_yields_oldest_first() {
        let mut w = SendWindow::new(3);
        fill(&mut w, 0, 1, 3);
        w.on_ack(1);
        fill(&mut w, 3, 1, 1);
        let seqs: Vec<u16> = w.iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn clear_empties_window() {
        let mut w = SendWindow::new(3);
        fill(&mut w, 0, 1, 2);
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.send_base(), 0);
    }
}
