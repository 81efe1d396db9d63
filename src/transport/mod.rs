pub mod mqtt;
pub mod traits;

pub use mqtt::{AckTracker, MqttTransport};
pub use traits::{Delivery, InboundMessage, QoS, Transport, TransportError};
