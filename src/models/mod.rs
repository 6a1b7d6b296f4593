pub mod check;
pub mod proxy;
pub mod result;
pub mod source;

pub use check::*;
pub use proxy::*;
pub use result::*;
pub use source::*;
