//! Network subsystem for UDP audio transport

pub mod receiver;
pub mod transport;

pub use receiver::{ReceiveLoop, ReceiveStats};
pub use transport::UdpTransport;
