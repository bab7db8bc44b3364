mod class;
mod constants;
mod member;
mod reader;

pub use class::*;
pub use constants::*;
pub use member::*;
pub(crate) use reader::*;
