//! Network surfaces for agora market nodes: the JSON RPC server, the connectionless
//! availability responder and the per-node audit log.
pub mod audit;
pub mod http;
pub mod udp;
