mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::TradeStore;
