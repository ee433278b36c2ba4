mod ident;
mod mode;
mod registry;
mod resource;

pub use ident::*;
pub use mode::*;
pub use registry::*;
pub use resource::*;
