pub mod market_v1;
