pub mod system;
pub mod trades;

pub use system::*;
pub use trades::*;
