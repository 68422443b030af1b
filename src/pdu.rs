pub mod connector;
pub mod line;
pub mod parser;
pub mod reply;
pub mod send_receive;
pub mod session;

#[cfg(test)]
pub(crate) mod fake_device;

pub use connector::*;
pub use reply::*;
pub use send_receive::*;
pub use session::*;
