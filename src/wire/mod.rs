//! Wire module - Framed host transport
//!
//! Broker and executor host speak length-prefixed JSON frames:
//! - `EnvelopeCodec`, u32 little-endian length prefix + JSON payload
//! - `HostLink`, the broker-side executor link over a framed stream
//! - `SessionHost`, the executor-side loop serving queries

mod codec;
mod host_link;
mod session_host;

pub use codec::{CodecError, EnvelopeCodec, MAX_FRAME_BYTES};
pub use host_link::HostLink;
pub use session_host::SessionHost;
