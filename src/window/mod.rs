pub mod clock;
pub mod resolver;

pub use clock::{Clock, SystemClock};
pub use resolver::{resolve, ResolvedWindow};
