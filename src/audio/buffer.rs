//! Jitter-absorbing ring buffer
//!
//! A fixed-capacity circular store of audio chunks indexed by wire
//! sequence number modulo capacity. The network receive loop writes,
//! the real-time playback callback reads; the two sides never share a
//! buffer-wide lock. Each slot is an independently locked cell holding
//! one whole chunk, so a same-slot write and read can never observe a
//! torn chunk, and cross-slot accesses need no coordination at all.
//!
//! Writes are unconditional: a late, duplicate, or reordered packet
//! silently overwrites whatever occupies its slot. Reads are equally
//! unconditional: the play cursor advances once per period whether or
//! not fresh data ever landed, playing stale or silent audio through a
//! gap. Underrun and overrun are by design not errors here; they are
//! visible only through [`JitterRing::occupancy`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};

/// One fixed-size block of interleaved int16 PCM samples.
///
/// Cloning is cheap (the sample storage is shared), and a chunk is
/// never mutated after construction, so handing clones across the
/// network/audio thread boundary is safe by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    samples: std::sync::Arc<[i16]>,
}

impl Chunk {
    /// A zero-filled chunk of `len` interleaved samples
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0i16; len].into(),
        }
    }

    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Sequence-number-indexed circular chunk store.
///
/// Sequence arithmetic is wrapping 16-bit end-to-end, matching the wire
/// field. The slot for sequence `s` is `s % cells_in_buffer`; the play
/// cursor lives in sequence space and is reduced to a slot index on
/// every read.
pub struct JitterRing {
    slots: Box<[Mutex<Chunk>]>,
    cells_in_buffer: usize,
    chunks_to_buffer: usize,
    /// Last sequence number accepted by the writer side
    last_written: AtomicU16,
    /// Next sequence number due for playback
    play_seq: AtomicU16,
}

impl JitterRing {
    /// Allocate a ring of `cells_in_buffer` slots, each prefilled with
    /// a silence chunk of `samples_per_chunk` samples.
    pub fn new(cells_in_buffer: usize, chunks_to_buffer: usize, samples_per_chunk: usize) -> Self {
        debug_assert!(cells_in_buffer > 0);
        let slots = (0..cells_in_buffer)
            .map(|_| Mutex::new(Chunk::silence(samples_per_chunk)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            cells_in_buffer,
            chunks_to_buffer,
            last_written: AtomicU16::new(0),
            play_seq: AtomicU16::new(0),
        }
    }

    /// Store `chunk` in slot `seq % capacity`, unconditionally
    /// overwriting the previous occupant.
    pub fn write(&self, seq: u16, chunk: Chunk) {
        let slot = seq as usize % self.cells_in_buffer;
        *self.slots[slot].lock() = chunk;
        self.last_written.store(seq, Ordering::Release);
    }

    /// Return the chunk due for playback and advance the play cursor by
    /// exactly one slot. Never fails: an unwritten slot yields its
    /// prefilled silence, a stale slot yields the last chunk written.
    pub fn read_next(&self) -> Chunk {
        let seq = self.play_seq.fetch_add(1, Ordering::AcqRel);
        let slot = seq as usize % self.cells_in_buffer;
        self.slots[slot].lock().clone()
    }

    /// Chunks between the write and play cursors, in `[0, capacity)`.
    ///
    /// The two cursors are read without coordination, so the value may
    /// be stale by one update from either side; it is telemetry, not a
    /// transactional quantity.
    pub fn occupancy(&self) -> usize {
        let written = self.last_written.load(Ordering::Acquire);
        let playing = self.play_seq.load(Ordering::Acquire);
        written.wrapping_sub(playing) as usize % self.cells_in_buffer
    }

    /// Seed the play cursor from the first received sequence number,
    /// placing playback `chunks_to_buffer` chunks behind the writer to
    /// realize the target latency.
    pub fn seed(&self, first_seq: u16) {
        let seeded = first_seq.wrapping_sub(self.chunks_to_buffer as u16);
        self.play_seq.store(seeded, Ordering::Release);
    }

    /// Current play cursor as a slot index
    pub fn play_cursor(&self) -> usize {
        self.play_seq.load(Ordering::Acquire) as usize % self.cells_in_buffer
    }

    pub fn capacity(&self) -> usize {
        self.cells_in_buffer
    }

    pub fn chunks_to_buffer(&self) -> usize {
        self.chunks_to_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ring(cells: usize, target: usize) -> JitterRing {
        JitterRing::new(cells, target, 4)
    }

    fn chunk_of(value: i16) -> Chunk {
        Chunk::from_samples(vec![value; 4])
    }

    #[test]
    fn test_seeding_offsets_play_cursor() {
        let ring = ring(10, 5);
        ring.seed(100);
        assert_eq!(ring.play_cursor(), (100 - 5) % 10);
        assert_eq!(ring.play_cursor(), 5);
    }

    #[test]
    fn test_seeding_establishes_target_occupancy() {
        let ring = ring(10, 5);
        ring.write(100, chunk_of(1));
        ring.seed(100);
        assert_eq!(ring.occupancy(), 5);
    }

    #[test]
    fn test_seeding_near_sequence_wrap() {
        let ring = ring(10, 5);
        ring.write(2, chunk_of(1));
        ring.seed(2); // play_seq wraps below zero
        assert_eq!(ring.occupancy(), 5);
    }

    #[test]
    fn test_underrun_plays_silence() {
        let ring = ring(10, 5);
        // No write ever lands; every read yields the prefilled silence.
        for _ in 0..25 {
            let chunk = ring.read_next();
            assert_eq!(chunk.samples(), &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_later_write_wins_same_slot() {
        let ring = ring(10, 5);
        ring.write(5, chunk_of(5));
        ring.write(15, chunk_of(15));
        // Slot 5 now holds chunk 15's data even though chunk 5 was
        // never read.
        ring.seed(5 + 5); // place play cursor on slot 5
        assert_eq!(ring.read_next().samples(), &[15, 15, 15, 15]);
    }

    #[test]
    fn test_read_advances_one_slot() {
        let ring = ring(4, 2);
        for seq in 0..4u16 {
            ring.write(seq, chunk_of(seq as i16));
        }
        assert_eq!(ring.read_next().samples()[0], 0);
        assert_eq!(ring.read_next().samples()[0], 1);
        assert_eq!(ring.read_next().samples()[0], 2);
        assert_eq!(ring.read_next().samples()[0], 3);
        // Wraps back to slot 0
        assert_eq!(ring.read_next().samples()[0], 0);
    }

    #[test]
    fn test_occupancy_in_range_across_counter_wrap() {
        let ring = ring(10, 5);
        ring.seed(u16::MAX - 3);
        for i in 0..8u16 {
            let seq = (u16::MAX - 3).wrapping_add(i);
            ring.write(seq, chunk_of(0));
            let occ = ring.occupancy();
            assert!(occ < ring.capacity(), "occupancy {} out of range", occ);
            ring.read_next();
        }
    }

    #[test]
    fn test_no_torn_reads_under_concurrent_slot_access() {
        let ring = Arc::new(JitterRing::new(4, 2, 64));
        let writer_ring = ring.clone();

        // Hammer the same slots from both sides; every observed chunk
        // must have the configured length.
        let writer = std::thread::spawn(move || {
            for i in 0..20_000u32 {
                let seq = (i % 4) as u16;
                writer_ring.write(seq, Chunk::from_samples(vec![i as i16; 64]));
            }
        });
        let reader = std::thread::spawn(move || {
            for _ in 0..20_000 {
                let chunk = ring.read_next();
                assert_eq!(chunk.len(), 64);
                // Whole-chunk replace: every sample carries the same value.
                let first = chunk.samples()[0];
                assert!(chunk.samples().iter().all(|&s| s == first));
            }
        });
        writer.join().unwrap();
        reader.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_occupancy_always_in_range(
            cells in (1usize..64).prop_map(|n| n * 2),
            ops in proptest::collection::vec((any::<u16>(), any::<bool>()), 0..200),
        ) {
            let ring = JitterRing::new(cells, cells / 2, 2);
            for (seq, is_write) in ops {
                if is_write {
                    ring.write(seq, Chunk::silence(2));
                } else {
                    ring.read_next();
                }
                prop_assert!(ring.occupancy() < cells);
            }
        }

        #[test]
        fn prop_seeded_cursor_matches_formula(
            target in 1usize..32,
            first_seq in any::<u16>(),
        ) {
            let cells = target * 2;
            let ring = JitterRing::new(cells, target, 2);
            ring.seed(first_seq);
            let expected = first_seq.wrapping_sub(target as u16) as usize % cells;
            prop_assert_eq!(ring.play_cursor(), expected);
        }
    }
}
