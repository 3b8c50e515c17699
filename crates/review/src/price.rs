//! Best-effort fiat valuation of a review.

use crate::{analyze::TxReview, error::ReviewError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SATS_PER_BTC: f64 = 100_000_000.0;

/// Source of the current bitcoin price.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn btc_price_usd(&self) -> Result<f64, ReviewError>;
}

/// Fiat values shown next to the amounts of a review.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub btc_price_usd: f64,
    pub spend_usd: f64,
    pub fee_usd: f64,
}

impl Valuation {
    pub fn new(btc_price_usd: f64, review: &TxReview) -> Self {
        let usd = |sats: f64| sats * btc_price_usd / SATS_PER_BTC;
        Self {
            btc_price_usd,
            spend_usd: usd(review.balance.spend as f64),
            fee_usd: usd(review.decoded.fee_sats as f64),
        }
    }
}

/// Values `review` in USD.
///
/// Never fails: a slow or failing oracle yields `None`.
pub async fn value_review<P: PriceOracle + ?Sized>(
    oracle: &P,
    review: &TxReview,
    timeout: Duration,
) -> Option<Valuation> {
    match tokio::time::timeout(timeout, oracle.btc_price_usd()).await {
        Ok(Ok(price)) if price.is_finite() && price > 0.0 => Some(Valuation::new(price, review)),
        Ok(Ok(price)) => {
            warn!(target: "review", price, "ignoring invalid btc price");
            None
        }
        Ok(Err(err)) => {
            warn!(target: "review", %err, "failed to fetch btc price");
            None
        }
        Err(_) => {
            warn!(target: "review", ?timeout, "timed out fetching btc price");
            None
        }
    }
}
