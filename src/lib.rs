#![doc = include_str!("../README.md")]

mod error;
mod session;

pub mod clock;
pub mod timesync;
pub mod transport;
pub mod ulog;

pub use error::{Error, Result};
pub use session::{Session, SessionBuilder};

pub(crate) mod prelude {
    pub use crate::error::{Error, Result};
}
