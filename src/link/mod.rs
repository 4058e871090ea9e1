//! The memory service and the ways the CPU can reach it.
//!
//! - [`protocol`]: request/response wire types
//! - [`service`]: the service owning the address space
//! - [`client`]: text-protocol port, for a service in another process
//! - [`channel`]: message-passing port, for a service on another thread

pub mod channel;
pub mod client;
pub mod protocol;
pub mod service;

pub use channel::ChannelPort;
pub use client::{spawn_service, ChildPort, LinkPort};
pub use protocol::{Request, RequestError};
pub use service::{MemoryService, ServiceError};
