//! Per-node state machine and error taxonomy for a federation of share market nodes.
//! The network surfaces live in agora-http and agora-client.
pub mod market;
pub mod peer;
