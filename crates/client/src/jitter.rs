//! Per-sender jitter buffer.
//!
//! A bounded ordered map from sequence number to frame, drained in
//! ascending order. The buffer itself is single-owner; the receive
//! pipeline either owns one outright or shares it behind a `Mutex`,
//! holding the lock across the insert-then-drain of one tick.

use std::collections::BTreeMap;

use parley_shared::config;

pub struct JitterBuffer {
    frames: BTreeMap<u32, Vec<u8>>,
    window: usize,
    expected_seq: u32,
}

impl JitterBuffer {
    /// `window` is the maximum number of buffered frames; use
    /// [`config::JITTER_WINDOW_PRIVATE`] or [`config::JITTER_WINDOW_GROUP`].
    pub fn new(window: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            window,
            expected_seq: 0,
        }
    }

    pub fn private() -> Self {
        Self::new(config::JITTER_WINDOW_PRIVATE)
    }

    pub fn group() -> Self {
        Self::new(config::JITTER_WINDOW_GROUP)
    }

    /// Buffer a frame. Frames older than the delivery cursor are dropped
    /// so playback order stays strictly increasing; when the window
    /// overflows, the smallest key is evicted.
    pub fn insert(&mut self, seq: u32, frame: Vec<u8>) {
        if seq < self.expected_seq {
            return;
        }
        self.frames.insert(seq, frame);
        while self.frames.len() > self.window {
            if let Some(&oldest) = self.frames.keys().next() {
                self.frames.remove(&oldest);
            }
        }
    }

    /// Remove and return the frame at the delivery cursor, if buffered,
    /// advancing the cursor past it.
    pub fn pop_expected(&mut self) -> Option<Vec<u8>> {
        let frame = self.frames.remove(&self.expected_seq)?;
        self.expected_seq += 1;
        Some(frame)
    }

    /// Remove and return the smallest buffered frame, advancing the
    /// delivery cursor past it (lossy catch-up).
    pub fn pop_oldest(&mut self) -> Option<Vec<u8>> {
        let &oldest = self.frames.keys().next()?;
        let frame = self.frames.remove(&oldest)?;
        self.expected_seq = self.expected_seq.max(oldest + 1);
        Some(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Vec<u8> {
        vec![tag; 4]
    }

    #[test]
    fn reordered_arrivals_play_in_order() {
        let mut jb = JitterBuffer::private();
        let mut played = Vec::new();

        // Arrival order 1, 0, 2, with the drain-on-arrival loop the
        // private consumer runs after each insert.
        for seq in [1u32, 0, 2] {
            jb.insert(seq, frame(seq as u8));
            while let Some(f) = jb.pop_expected() {
                played.push(f[0]);
            }
        }

        assert_eq!(played, vec![0, 1, 2]);
        assert_eq!(jb.expected_seq(), 3);
        assert!(jb.is_empty());
    }

    #[test]
    fn timeout_catch_up_skips_the_gap() {
        let mut jb = JitterBuffer::private();
        jb.insert(1, frame(1));
        jb.insert(2, frame(2));
        assert!(jb.pop_expected().is_none());

        // Receive timeout: play the oldest available and move on.
        assert_eq!(jb.pop_oldest().unwrap(), frame(1));
        assert_eq!(jb.expected_seq(), 2);
        assert_eq!(jb.pop_expected().unwrap(), frame(2));
        assert_eq!(jb.expected_seq(), 3);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut jb = JitterBuffer::group();
        for seq in 0..100 {
            jb.insert(seq, frame(seq as u8));
            assert!(jb.len() <= config::JITTER_WINDOW_GROUP);
        }
        // Overflow evicted the smallest keys.
        assert!(jb.pop_expected().is_none());
        assert_eq!(jb.pop_oldest().unwrap(), frame(95));
    }

    #[test]
    fn stale_frames_are_dropped() {
        let mut jb = JitterBuffer::private();
        jb.insert(0, frame(0));
        assert!(jb.pop_expected().is_some());

        // A late duplicate of an already-played frame must not rewind
        // delivery.
        jb.insert(0, frame(0));
        assert!(jb.is_empty());
        assert_eq!(jb.expected_seq(), 1);
    }

    #[test]
    fn cursor_is_monotonic_under_catch_up() {
        let mut jb = JitterBuffer::private();
        jb.insert(5, frame(5));
        assert_eq!(jb.pop_oldest().unwrap(), frame(5));
        assert_eq!(jb.expected_seq(), 6);

        jb.insert(7, frame(7));
        jb.insert(8, frame(8));
        let mut cursors = vec![jb.expected_seq()];
        while jb.pop_oldest().is_some() {
            cursors.push(jb.expected_seq());
        }
        assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
    }
}
