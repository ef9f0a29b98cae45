pub mod ber;
pub mod collector;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::{
    CollectError, Collection, InterfaceCollector, InterfaceColumn, SnmpCollector, WalkDiagnostics,
    WalkStatus,
};
pub use session::{SessionOptions, SnmpError, WalkError};
