pub mod device;
pub mod traffic;

pub use device::{DeviceRecord, SnmpSettings};
pub use traffic::{RawInterfaceSnapshot, TrafficResult};
