//! The per-cycle acquisition core: double-buffered channels, device worker
//! threads, the cycle coordinator and the reconnection policy.

pub mod channel;
pub mod coordinator;
pub mod reconnect;
pub mod worker;

pub use channel::{ChannelCounters, DeviceChannel, Reconciled, SensorChannel};
pub use coordinator::Coordinator;
pub use reconnect::RetryPolicy;
