//! Ports - 外部との境界
//!
//! The store and the relay loop only see these traits. Concrete
//! implementations live in `impls` (development/test) or in the binary
//! crate (the real queue client).

pub mod clock;
pub mod sink;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::sink::{Sink, SinkError};
