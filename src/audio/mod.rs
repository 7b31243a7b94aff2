//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod duplex;
pub mod rate;

pub use buffer::{Chunk, JitterRing};
pub use device::{find_input_device, find_output_device, list_devices, DeviceInfo};
pub use duplex::DuplexAudio;
pub use rate::RateController;
