use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapters::{CubeClient, CubeCredentials, PaperExchange};
use crate::config::AppConfig;
use crate::error::Result;
use crate::markets::MarketRegistry;

use super::ExchangeGateway;

/// Create the runtime exchange gateway from `AppConfig`.
///
/// Dry-run mode routes everything to the in-process paper exchange. A live
/// gateway is only returned once the exchange accepts its API key.
pub async fn build_gateway(
    app_config: &AppConfig,
    registry: Arc<MarketRegistry>,
) -> Result<Arc<dyn ExchangeGateway>> {
    if app_config.dry_run.enabled {
        return Ok(Arc::new(PaperExchange::new(registry)));
    }

    let exchange = &app_config.exchange;
    let credentials = CubeCredentials::new(&exchange.api_key, &exchange.api_secret)?;
    let client = CubeClient::new(
        &exchange.rest_url,
        credentials,
        exchange.subaccount_id,
        registry,
    )?
    .with_max_retries(exchange.max_retries)
    .with_timeout(Duration::from_millis(exchange.request_timeout_ms))?;

    client.check_api_key().await?;
    info!("Cube API key accepted (subaccount {})", exchange.subaccount_id);

    Ok(Arc::new(client))
}
