//! Event Delivery
//!
//! Everything on the AWS side of the relay: turning inbound envelopes into
//! bus entries and keeping an EventBridge client bound to the active
//! credentials.

pub mod client;
pub mod eventbridge;
pub mod transform;

pub use client::{BusEntry, ClientFactory, ClientHandle, DownstreamClientCache, EventPublisher};
pub use eventbridge::EventBridgeFactory;
pub use transform::{transform, DeliveryPayload, Envelope, PubSubMessage, PubSubPush};
