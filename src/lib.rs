pub mod clock;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod log;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
