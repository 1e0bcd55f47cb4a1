//! Versioned RPC surfaces. Wire types, server handlers and the `Client` trait for one
//! version live together in one module so the contract is readable in one place.
pub mod market_v1;
