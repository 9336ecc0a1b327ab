mod base;
mod batch;
mod connection;

pub use base::*;
pub use batch::*;
pub use connection::*;
