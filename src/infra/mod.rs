mod annotations;
mod scan;
mod watch;

pub use annotations::*;
pub use scan::*;
pub use watch::*;
