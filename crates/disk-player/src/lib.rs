//! Disk-streaming audio playback.
//!
//! A disk thread decodes a [`source::StreamSource`] into a lock-free
//! [`ring_buffer::RingBuffer`]; an audio host's realtime thread drains it through
//! [`realtime::RealtimeCallback`]. [`session::play`] wires the two together.

pub mod config;
pub mod decode;
pub mod disk;
pub mod error;
pub mod host;
pub mod realtime;
pub mod ring_buffer;
pub mod session;
pub mod source;
pub mod state;
pub mod wake;

pub use error::PlayerError;
