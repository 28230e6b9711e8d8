//! The inbound half of the relay: who may submit, and how submissions reach
//! the queue.

pub mod filter;
pub mod inbound;
pub mod store;

pub use filter::RelayFilter;
pub use inbound::InboundWorker;
pub use store::RelayStore;
