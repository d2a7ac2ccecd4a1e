//! Lock-free buffers shared between the engine worker and the output callback.

pub mod ring;

pub use ring::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
