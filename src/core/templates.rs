//! Task templates
//!
//! A template is the configured shape of a recurring order task. It turns into
//! a scheduler `TaskConfig` whose function places one order per listed
//! exchange, each time with a fresh amount drawn from `[min_amount, max_amount]`.

use std::sync::Arc;

use anyhow::anyhow;
use futures_util::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::manager::ConnectionManager;
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{OrderRequest, OrderSide, OrderType};
use crate::core::scheduler::{task_fn, TaskConfig};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub min_amount: f64,
    pub max_amount: f64,
    /// Required for limit orders
    #[serde(default)]
    pub price: Option<f64>,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub exchanges: Vec<String>,
}

impl TaskTemplate {
    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |msg: String| Err(AppError::Config(format!("Task '{}': {}", self.id, msg)));

        if self.id.trim().is_empty() {
            return Err(AppError::Config("Task id must not be empty".into()));
        }
        if self.symbol.trim().is_empty() {
            return fail("symbol must not be empty".into());
        }
        if self.min_interval_secs == 0 || self.min_interval_secs > self.max_interval_secs {
            return fail(format!(
                "min_interval_secs ({}) must be > 0 and <= max_interval_secs ({})",
                self.min_interval_secs, self.max_interval_secs
            ));
        }
        if !self.min_amount.is_finite()
            || !self.max_amount.is_finite()
            || self.min_amount <= 0.0
            || self.min_amount > self.max_amount
        {
            return fail(format!(
                "min_amount ({}) must be > 0 and <= max_amount ({})",
                self.min_amount, self.max_amount
            ));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => return fail("limit orders require a price".into()),
            (_, Some(price)) if !price.is_finite() || price <= 0.0 => {
                return fail(format!("price must be positive, got {}", price))
            }
            _ => {}
        }
        if self.exchanges.is_empty() {
            return fail("at least one exchange is required".into());
        }
        Ok(())
    }

    /// Uniform draw from `[min_amount, max_amount]`
    pub fn draw_amount(&self) -> f64 {
        if self.min_amount >= self.max_amount {
            return self.min_amount;
        }
        rand::thread_rng().gen_range(self.min_amount..=self.max_amount)
    }

    /// One order request with a freshly drawn amount
    pub fn order_request(&self) -> OrderRequest {
        let amount = self.draw_amount();
        match (self.order_type, self.price) {
            (OrderType::Limit, Some(price)) => {
                OrderRequest::limit(self.symbol.clone(), self.side, amount, price)
            }
            _ => OrderRequest::market(self.symbol.clone(), self.side, amount),
        }
    }

    /// Scheduler registration placing this template's orders through `manager`
    pub fn into_task_config<A: ExchangeAdapter + 'static>(
        &self,
        manager: ConnectionManager<A>,
    ) -> TaskConfig {
        let template = Arc::new(self.clone());
        TaskConfig {
            task_id: self.id.clone(),
            min_time_seconds: self.min_interval_secs,
            max_time_seconds: self.max_interval_secs,
            task_function: task_fn(move || {
                let template = Arc::clone(&template);
                let manager = manager.clone();
                async move { place_orders(&template, &manager).await }
            }),
        }
    }
}

/// Place one order on every exchange of `template`
///
/// Fails only when no exchange accepted an order.
async fn place_orders<A: ExchangeAdapter + 'static>(
    template: &TaskTemplate,
    manager: &ConnectionManager<A>,
) -> anyhow::Result<()> {
    let request = template.order_request();
    let results = join_all(
        template
            .exchanges
            .iter()
            .map(|exchange| manager.create_order(exchange, request.clone())),
    )
    .await;

    let mut placed = 0usize;
    for (exchange, result) in template.exchanges.iter().zip(results) {
        match result {
            Ok(order) => {
                placed += 1;
                info!(
                    task_id = %template.id,
                    exchange = %exchange,
                    order_id = %order.id,
                    amount = request.amount,
                    "Task order placed"
                );
            }
            Err(e) => {
                warn!(task_id = %template.id, exchange = %exchange, error = %e, "Task order failed");
            }
        }
    }

    if placed == 0 {
        return Err(anyhow!(
            "task {}: no order placed on {} exchange(s)",
            template.id,
            template.exchanges.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::mock_manager;
    use crate::adapters::types::Credentials;
    use crate::config::HealthConfig;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    fn template() -> TaskTemplate {
        TaskTemplate {
            id: "dca".into(),
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            min_amount: 0.01,
            max_amount: 0.02,
            price: None,
            min_interval_secs: 10,
            max_interval_secs: 20,
            exchanges: vec!["alpha".into(), "beta".into()],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(template().validate().is_ok());

        let mut fixed = template();
        fixed.min_interval_secs = 20;
        fixed.min_amount = 0.02;
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let mut t = template();
        t.min_interval_secs = 0;
        assert!(t.validate().unwrap_err().to_string().contains("min_interval_secs"));

        let mut t = template();
        t.min_interval_secs = 30;
        assert!(t.validate().unwrap_err().to_string().contains("min_interval_secs"));

        let mut t = template();
        t.max_amount = 0.001;
        assert!(t.validate().unwrap_err().to_string().contains("min_amount"));

        let mut t = template();
        t.min_amount = f64::NAN;
        assert!(t.validate().is_err());

        let mut t = template();
        t.exchanges.clear();
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_limit_requires_price() {
        let mut t = template();
        t.order_type = OrderType::Limit;
        assert!(t.validate().unwrap_err().to_string().contains("price"));

        t.price = Some(41_000.0);
        assert!(t.validate().is_ok());
        let request = t.order_request();
        assert_eq!(request.order_type, OrderType::Limit);
        assert_eq!(request.price, Some(41_000.0));
    }

    proptest! {
        #[test]
        fn prop_draw_amount_within_bounds(min in 0.0001f64..10.0, extra in 0.0f64..10.0) {
            let mut t = template();
            t.min_amount = min;
            t.max_amount = min + extra;
            let amount = t.draw_amount();
            prop_assert!(amount >= t.min_amount && amount <= t.max_amount);
        }
    }

    #[tokio::test]
    async fn test_task_places_one_order_per_exchange() {
        let (manager, controls) = mock_manager(&["alpha", "beta"], HealthConfig::default());
        manager.add_exchange("alpha", Credentials::new("k", "s"), true).await.unwrap();
        manager.add_exchange("beta", Credentials::new("k", "s"), true).await.unwrap();

        let config = template().into_task_config(manager.clone());
        assert_eq!(config.task_id, "dca");
        assert_eq!((config.min_time_seconds, config.max_time_seconds), (10, 20));

        (config.task_function)().await.unwrap();
        assert_eq!(controls["alpha"].orders_placed.load(Ordering::SeqCst), 1);
        assert_eq!(controls["beta"].orders_placed.load(Ordering::SeqCst), 1);

        // One failing exchange is tolerated
        manager.disconnect_exchange("beta").await.unwrap();
        (config.task_function)().await.unwrap();
        assert_eq!(controls["alpha"].orders_placed.load(Ordering::SeqCst), 2);

        manager.disconnect_exchange("alpha").await.unwrap();
        assert!((config.task_function)().await.is_err());
    }
}
