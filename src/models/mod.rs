pub mod config;
pub mod events;
pub mod filter;
pub mod flow;
