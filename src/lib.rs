pub mod connection_settings;
pub mod dispatch;
pub mod error;
pub mod pdu;
pub mod usage_log;

pub use connection_settings::*;
pub use dispatch::{Action, Config, Outcome};
pub use error::{Error, Result};
