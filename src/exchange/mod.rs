pub mod factory;
mod traits;

pub use factory::build_gateway;
pub use traits::{ExchangeGateway, DEFAULT_BOOK_DEPTH, DEFAULT_LATEST_ORDERS_LIMIT};

#[cfg(test)]
pub use traits::MockExchangeGateway;
