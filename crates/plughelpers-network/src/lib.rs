//! Remote network driver plugin category (`NetworkDriver.*`).

mod driver;
pub mod ports;
mod types;

pub use driver::*;
pub use ports::{PortBinding, Protocol, TransportPort};
pub use types::*;
