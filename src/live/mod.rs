//! Real-time event distribution: the fan-out bus and its SSE bridge.

pub mod broadcaster;
pub mod sse;

pub use broadcaster::{Broadcaster, Subscription};
