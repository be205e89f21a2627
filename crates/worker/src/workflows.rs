//! Order fulfillment workflow run by the demo worker

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_durable::prelude::*;

pub const PAYMENT_SIGNAL: &str = "payment_received";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: String,
    pub total_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub order_id: String,
    pub total_cents: u64,
    pub tracking_number: String,
}

/// Prices the order and holds stock for it
pub struct ReserveInventory;

#[async_trait]
impl Activity for ReserveInventory {
    const TYPE: &'static str = "reserve_inventory";
    type Input = (Order,);
    type Output = Reservation;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        (order,): (Order,),
    ) -> Result<Reservation, ActivityError> {
        if order.items.is_empty() {
            return Err(ActivityError::new("order has no items").with_type("empty_order"));
        }

        let total_cents = order
            .items
            .iter()
            .map(|item| u64::from(item.quantity) * item.unit_price_cents)
            .sum();

        tracing::info!(
            instance_id = %ctx.instance_id,
            order_id = %order.id,
            total_cents,
            "inventory reserved"
        );

        Ok(Reservation {
            order_id: order.id,
            total_cents,
        })
    }
}

/// Hands the order to the carrier
pub struct ShipOrder;

#[async_trait]
impl Activity for ShipOrder {
    const TYPE: &'static str = "ship_order";
    type Input = (String,);
    type Output = String;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        (order_id,): (String,),
    ) -> Result<String, ActivityError> {
        let tracking_number = format!("TRK-{}", order_id.to_uppercase());
        tracing::info!(instance_id = %ctx.instance_id, %order_id, %tracking_number, "order shipped");
        Ok(tracking_number)
    }
}

enum Stage {
    Reserving,
    AwaitingPayment,
    CoolingOff,
    Shipping,
}

/// Reserve, wait for payment, hold briefly, then ship
pub struct OrderFulfillment {
    order: Order,
    cooling_off_ms: u64,
    stage: Stage,
    reservation: Option<Reservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentInput {
    pub order: Order,
    #[serde(default = "default_cooling_off_ms")]
    pub cooling_off_ms: u64,
}

fn default_cooling_off_ms() -> u64 {
    500
}

impl Workflow for OrderFulfillment {
    const TYPE: &'static str = "order_fulfillment";
    type Input = FulfillmentInput;
    type Output = Receipt;

    fn new(input: FulfillmentInput) -> Self {
        Self {
            order: input.order,
            cooling_off_ms: input.cooling_off_ms,
            stage: Stage::Reserving,
            reservation: None,
        }
    }

    fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<Receipt>, WorkflowError> {
        ctx.call_activity(ReserveInventory, (self.order.clone(),))
            .map(Step::Yield)
    }

    fn resume(
        &mut self,
        ctx: &WorkflowContext,
        value: Resumed,
    ) -> Result<Step<Receipt>, WorkflowError> {
        match self.stage {
            Stage::Reserving => {
                self.reservation = Some(serde_json::from_value(value?)?);
                self.stage = Stage::AwaitingPayment;
                Ok(Step::Yield(ctx.wait_for_signal(PAYMENT_SIGNAL)))
            }
            Stage::AwaitingPayment => {
                let paid = value?.get("amount_cents").and_then(Value::as_u64);
                let due = self.reservation.as_ref().map_or(0, |r| r.total_cents);
                if paid.unwrap_or(0) < due {
                    return Err(WorkflowError::new(format!(
                        "payment of {} does not cover {due}",
                        paid.unwrap_or(0)
                    ))
                    .with_code("underpaid"));
                }
                self.stage = Stage::CoolingOff;
                Ok(Step::Yield(ctx.sleep(self.cooling_off_ms)))
            }
            Stage::CoolingOff => {
                self.stage = Stage::Shipping;
                ctx.call_activity(ShipOrder, (self.order.id.clone(),))
                    .map(Step::Yield)
            }
            Stage::Shipping => {
                let tracking_number: String = serde_json::from_value(value?)?;
                Ok(Step::Return(Receipt {
                    order_id: self.order.id.clone(),
                    total_cents: self.reservation.as_ref().map_or(0, |r| r.total_cents),
                    tracking_number,
                }))
            }
        }
    }
}

/// Poll history until the instance is waiting for `signal`
///
/// A signal delivered before its wait is recorded is dropped.
pub async fn wait_until_waiting(
    executor: &WorkflowExecutor,
    instance_id: &str,
    signal: &str,
    every: Duration,
) -> Result<(), ExecutorError> {
    loop {
        let history = executor.history(instance_id).await?;
        let waiting = history
            .iter()
            .any(|e| matches!(&e.kind, EventKind::WaitingSignal { signal: s } if s == signal));
        if waiting {
            return Ok(());
        }
        tokio::time::sleep(every).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn input(cooling_off_ms: u64) -> Value {
        json!({
            "order": {
                "id": "ord-7",
                "items": [
                    {"sku": "tea", "quantity": 2, "unit_price_cents": 450},
                    {"sku": "cup", "quantity": 1, "unit_price_cents": 1200}
                ]
            },
            "cooling_off_ms": cooling_off_ms
        })
    }

    fn executor() -> WorkflowExecutor {
        let mut executor = WorkflowExecutor::new(Arc::new(InMemoryBackend::new()));
        executor.register::<OrderFulfillment>();
        executor
    }

    #[tokio::test]
    async fn test_paid_order_ships() {
        let executor = executor();
        let instance = assert_ok!(
            executor
                .start_workflow(OrderFulfillment::TYPE, Some(input(10)))
                .await
        );

        assert_ok!(executor.run_activation(&instance.id).await);
        assert_ok!(
            executor
                .signal_workflow(&instance.id, PAYMENT_SIGNAL, Some(json!({"amount_cents": 2100})))
                .await
        );
        assert_ok!(executor.run_activation(&instance.id).await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let outcome = assert_ok!(executor.run_activation(&instance.id).await);
        assert!(outcome.completed);

        let instance = assert_ok!(executor.instance(&instance.id).await);
        assert_eq!(
            instance.result,
            Some(json!({
                "order_id": "ord-7",
                "total_cents": 2100,
                "tracking_number": "TRK-ORD-7"
            }))
        );
    }

    #[tokio::test]
    async fn test_underpaid_order_fails() {
        let executor = executor();
        let instance = assert_ok!(
            executor
                .start_workflow(OrderFulfillment::TYPE, Some(input(10)))
                .await
        );

        assert_ok!(executor.run_activation(&instance.id).await);
        assert_ok!(
            executor
                .signal_workflow(&instance.id, PAYMENT_SIGNAL, Some(json!({"amount_cents": 5})))
                .await
        );
        assert_ok!(executor.run_activation(&instance.id).await);

        let instance = assert_ok!(executor.instance(&instance.id).await);
        assert!(instance.is_completed());
        assert_eq!(
            instance.error.and_then(|e| e.code),
            Some("underpaid".to_string())
        );
    }

    #[tokio::test]
    async fn test_payer_waits_for_payment_wait() {
        let executor = Arc::new(executor());
        let instance = assert_ok!(
            executor
                .start_workflow(OrderFulfillment::TYPE, Some(input(10)))
                .await
        );

        let waiter = {
            let executor = Arc::clone(&executor);
            let id = instance.id.clone();
            tokio::spawn(async move {
                wait_until_waiting(&executor, &id, PAYMENT_SIGNAL, Duration::from_millis(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        assert_ok!(executor.run_activation(&instance.id).await);
        let waited = tokio::time::timeout(Duration::from_secs(2), waiter).await;
        assert_ok!(assert_ok!(assert_ok!(waited)));
    }
}
