pub(crate) mod padding;

mod conv;
mod options;
mod roi_pool;

pub use conv::*;
pub use options::*;
pub use roi_pool::*;
