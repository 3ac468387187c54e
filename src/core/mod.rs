pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod negotiation;
pub mod peer_store;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod timer;
