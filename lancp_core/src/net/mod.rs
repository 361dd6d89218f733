//! Addressing and deadline primitives shared by every phase.

pub mod addr;
pub mod bounded;

pub use addr::{LocalEndpoints, NetworkAddress, Port, broadcast_address, port_as_string};
pub use bounded::{BoundedOperation, dial_tcp};
