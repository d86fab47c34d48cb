//! Encoder gateway.
//!
//! The rest of the system sees one contract: a video path goes in, a
//! normalized global vector and an unnormalized temporal matrix come out.
//! Two implementations exist — an HTTP client for the external encoder
//! service and a deterministic offline encoder for development and tests —
//! plus a FIFO pool that serializes access to the non-reentrant instances.

pub mod client;
pub mod error;
pub mod gateway;
pub mod offline;
pub mod pool;

pub use client::{EncoderConfig, HttpEncoder};
pub use error::{EncoderError, EncoderResult};
pub use gateway::{EncoderHealth, VideoEncoder};
pub use offline::OfflineEncoder;
pub use pool::EncoderPool;
