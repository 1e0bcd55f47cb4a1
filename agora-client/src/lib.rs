//! Caller-side library for the agora federation: an HTTP client for the market_v1 RPC
//! surface, an in-process client for tests, and the identity routing table that maps a
//! participant id to its home market.
pub mod client;
pub mod routes;
