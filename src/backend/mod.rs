//! Backend abstraction layer
//!
//! Provides the driver trait the render graph executes against, the types it
//! exchanges with drivers, and a recording dummy driver.

pub mod dummy;
pub mod traits;
pub mod types;

pub use dummy::{DriverCommand, DummyDriver};
pub use traits::*;
pub use types::*;
