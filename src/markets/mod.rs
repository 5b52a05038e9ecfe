mod registry;

pub use registry::MarketRegistry;
