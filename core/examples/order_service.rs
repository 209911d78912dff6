//! Order service guarding a flaky payment provider
//!
//! Run with `RUST_LOG=tripwire=debug cargo run --example order_service`
//! to see the breaker's own logs next to the demo output.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tripwire::{BreakerError, CircuitBreaker, ProtectedOperation};

#[derive(Debug, Clone)]
struct Order {
    id: u32,
    amount_cents: u64,
}

#[derive(Debug)]
struct Receipt(String);

#[derive(Debug)]
struct PaymentError(&'static str);

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for PaymentError {}

/// Simulated provider; flip `down` to make every charge fail
#[derive(Debug, Default)]
struct PaymentService {
    down: AtomicBool,
    charges: AtomicU32,
}

impl ProtectedOperation<Order> for PaymentService {
    type Output = Receipt;
    type Error = PaymentError;

    async fn invoke(&self, order: Order) -> Result<Receipt, PaymentError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.down.load(Ordering::SeqCst) {
            return Err(PaymentError("provider unavailable"));
        }
        let n = self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(Receipt(format!(
            "txn-{:04} order={} amount={}",
            n, order.id, order.amount_cents
        )))
    }
}

async fn checkout(breaker: &CircuitBreaker, payments: &PaymentService, id: u32) {
    let order = Order {
        id,
        amount_cents: 1_999,
    };
    match breaker.fire(payments, order).await {
        Ok(receipt) => println!("  order {id}: paid ({})", receipt.0),
        Err(BreakerError::CircuitOpen { state, .. }) => {
            println!("  order {id}: rejected, circuit {state}")
        }
        Err(e) => println!("  order {id}: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let breaker = CircuitBreaker::builder("payments")
        .call_timeout(Duration::from_secs(3))
        .error_threshold_percent(50.0)
        .minimum_volume(4)
        .rolling_window(Duration::from_secs(10))
        .rolling_window_buckets(10)
        .reset_timeout(Duration::from_secs(2))
        .on_open(|name, _| tracing::warn!(circuit = name, "payments suspended"))
        .on_half_open(|name, _| tracing::info!(circuit = name, "probing provider"))
        .on_close(|name, _| tracing::info!(circuit = name, "payments resumed"))
        .build()?;
    let payments = PaymentService::default();

    println!("--- provider healthy ---");
    checkout(&breaker, &payments, 1).await;
    println!("state: {}\n", breaker.state());

    println!("--- provider goes down ---");
    payments.down.store(true, Ordering::SeqCst);
    for id in 2..=4 {
        checkout(&breaker, &payments, id).await;
    }
    let stats = breaker.stats();
    println!(
        "state: {} ({} calls, {:.0}% errors)\n",
        breaker.state(),
        stats.volume,
        stats.error_percentage
    );

    println!("--- failing fast ---");
    checkout(&breaker, &payments, 5).await;
    println!("state: {}\n", breaker.state());

    println!("--- provider recovers, waiting out the cooldown ---");
    payments.down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    checkout(&breaker, &payments, 6).await;
    println!("state: {}\n", breaker.state());

    checkout(&breaker, &payments, 7).await;
    Ok(())
}
