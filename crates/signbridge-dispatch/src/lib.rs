//! # signbridge-dispatch — request delivery to the signing agent
//!
//! The relay hands each validated request to a local signing agent over a
//! message channel and answers the caller without waiting for the work to
//! finish. The only signal used to decide the answer is whether the channel
//! survives a short grace period after the request is written.
//!
//! ## Module Overview
//!
//! - [`frame`] — native-messaging length-prefixed framing
//! - [`channel`] — channel events, ports and the connector seam
//! - [`registry`] — open channels by request
//! - [`machine`] — the per-request dispatch state machine
//! - [`native`] — host manifests and process-backed channels
//! - [`memory`] — in-process channels driven by the embedder

pub mod channel;
pub mod frame;
pub mod machine;
pub mod memory;
pub mod native;
pub mod registry;

pub use channel::{
    AgentChannel, AgentConnector, AgentPort, ChannelError, ChannelEvent, ConnectError, EventSink,
};
pub use frame::{FrameError, MAX_FRAME_BYTES, encode_frame, read_frame, write_frame};
pub use machine::{DEFAULT_GRACE_PERIOD, DispatchError, DispatchState, Dispatcher};
pub use memory::{MemoryConnector, MemorySession};
pub use native::{HostManifest, HostRegistry, ProcessConnector, STDIO_TRANSPORT, is_valid_host_name};
pub use registry::{ChannelInfo, ChannelRegistry, RegistrationToken};
