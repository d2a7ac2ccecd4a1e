//! Single-producer, single-consumer sample ring.
//!
//! The engine worker writes decoded samples and the output callback reads
//! them. Slots hold `f32` bit patterns in `AtomicU32`s so no `unsafe` is
//! needed; the read and write cursors carry the acquire/release ordering.
//! Only the consumer stores `read_pos`. `clear` publishes a discard mark
//! that the consumer jumps to on its next read.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity SPSC ring of `f32` samples.
pub struct RingBuffer {
    slots: Box<[AtomicU32]>,
    /// Total samples ever read.
    read_pos: AtomicUsize,
    /// Total samples ever written.
    write_pos: AtomicUsize,
    /// Write position at the last `clear`.
    discard_to: AtomicUsize,
    mask: usize,
}

impl RingBuffer {
    /// Create a ring holding at least `capacity` samples (rounded up to a power of two).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            slots,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            discard_to: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Read cursor after any pending discard.
    fn effective_read(&self, read: usize) -> usize {
        let discard = self.discard_to.load(Ordering::Acquire);
        if discard.wrapping_sub(read) <= self.capacity() {
            discard
        } else {
            read
        }
    }

    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.effective_read(self.read_pos.load(Ordering::Acquire));
        write.wrapping_sub(read)
    }

    /// Slots free for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Producer side. Returns how many samples fit.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.effective_read(self.read_pos.load(Ordering::Acquire));
        let space = self.capacity() - write.wrapping_sub(read);
        let count = samples.len().min(space);

        for (offset, sample) in samples[..count].iter().enumerate() {
            self.slots[write.wrapping_add(offset) & self.mask]
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Consumer side. Returns how many samples were copied into `output`.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read = self.effective_read(self.read_pos.load(Ordering::Relaxed));
        let write = self.write_pos.load(Ordering::Acquire);
        let count = output.len().min(write.wrapping_sub(read));

        for (offset, sample) in output[..count].iter_mut().enumerate() {
            *sample = f32::from_bits(
                self.slots[read.wrapping_add(offset) & self.mask].load(Ordering::Relaxed),
            );
        }

        self.read_pos
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Discard everything not yet read. Called from the producer side.
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Relaxed);
        self.discard_to.store(write, Ordering::Release);
    }
}

/// Ring shared between the worker and the output callback.
pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn shared_ring_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
