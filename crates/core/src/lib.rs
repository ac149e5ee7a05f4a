#![forbid(unsafe_code)]

pub mod error;
pub mod grading;
pub mod model;
pub mod outline;
pub mod time;
pub mod tree;

pub use error::Error;
pub use time::Clock;
