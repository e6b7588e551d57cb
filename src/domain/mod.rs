mod filter;
mod pathtree;
mod record;
mod summary;
mod value;

pub use filter::*;
pub use pathtree::*;
pub use record::*;
pub use summary::*;
pub use value::*;
