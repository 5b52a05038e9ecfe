pub mod cube_auth;
pub mod cube_rest;
pub mod paper;
pub mod postgres;

pub use cube_auth::CubeCredentials;
pub use cube_rest::{CubeClient, DEFAULT_CUBE_API_BASE};
pub use paper::{PaperExchange, PaperStatsSnapshot};
pub use postgres::PostgresStore;
