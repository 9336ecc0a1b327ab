mod base;
mod descriptor;
mod registry;

pub use base::*;
pub use descriptor::*;
pub use registry::*;
