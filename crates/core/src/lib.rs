#![forbid(unsafe_code)]

pub mod countdown;
pub mod model;
pub mod session;
pub mod time;

pub use countdown::Countdown;
pub use time::Clock;
