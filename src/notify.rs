use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::model::{PaymentConfig, PaymentMethod, Reservation, Room, format_cents};

const CHANNEL_CAPACITY: usize = 1024;
/// Deliveries (including their retry sleeps) running at once per property.
const MAX_IN_FLIGHT: usize = 16;

/// Everything a guest confirmation needs, captured after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub reservation: Reservation,
    pub room: Room,
    pub guest_name: String,
    pub guest_email: String,
    pub payment: PaymentConfig,
}

impl Confirmation {
    pub fn subject(&self) -> String {
        format!("Reservation pending - {} (room {})", self.room.kind, self.room.number)
    }

    /// Plain-text body with stay details and payment instructions.
    pub fn body(&self) -> String {
        let r = &self.reservation;
        let total = format_cents(r.total_price);
        let mut out = format!(
            "Thank you for your reservation, {}!\n\n\
             Room: {} (No. {})\n\
             Arrival: {}\n\
             Departure: {}\n\
             Total: ${total}\n\n",
            self.guest_name,
            self.room.kind,
            self.room.number,
            format_day(r.span.start),
            format_day(r.span.end),
        );
        match r.payment_method {
            PaymentMethod::Transfer => {
                out.push_str(&format!(
                    "Your reservation is pending. Please transfer ${total} to:\n\
                     Bank: {}\nAccount: {}\nCLABE: {}\n\
                     Then send the receipt to {} to have it confirmed.\n",
                    self.payment.bank,
                    self.payment.account_number,
                    self.payment.clabe,
                    self.payment.whatsapp_url,
                ));
            }
            PaymentMethod::Cash => {
                out.push_str(&format!(
                    "The payment of ${total} is made in cash at check-in.\n\
                     Your reservation stays pending until then.\n"
                ));
            }
        }
        out
    }
}

fn format_day(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Delivery channel for guest confirmations (email, SMS, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, confirmation: &Confirmation) -> Result<(), NotifyError>;
}

/// Writes the rendered confirmation to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, c: &Confirmation) -> Result<(), NotifyError> {
        info!(
            to = %c.guest_email,
            reservation = %c.reservation.id,
            subject = %c.subject(),
            "confirmation:\n{}",
            c.body()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Post-commit hand-off point. Writers push confirmations; a background worker
/// delivers them with retries. Sending never waits on delivery.
pub struct NotifyHub {
    tx: mpsc::Sender<Confirmation>,
}

impl NotifyHub {
    /// Spawn the delivery worker. Must be called inside a tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self::spawn_with_limit(notifier, policy, MAX_IN_FLIGHT)
    }

    fn spawn_with_limit(notifier: Arc<dyn Notifier>, policy: RetryPolicy, in_flight: usize) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(delivery_loop(rx, notifier, policy, in_flight));
        Self { tx }
    }

    /// Queue a confirmation. Drops it (with a warning) if the queue is full or closed.
    pub fn send(&self, confirmation: Confirmation) {
        let id = confirmation.reservation.id;
        if let Err(e) = self.tx.try_send(confirmation) {
            metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            warn!("dropping confirmation for reservation {id}: {e}");
        }
    }
}

async fn delivery_loop(
    mut rx: mpsc::Receiver<Confirmation>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    in_flight: usize,
) {
    // Stop pulling from the queue while every slot is busy retrying; the bounded
    // channel then fills and `send` starts dropping.
    let slots = Arc::new(Semaphore::new(in_flight.max(1)));
    while let Some(confirmation) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let notifier = notifier.clone();
        tokio::spawn(async move {
            deliver_with_retry(notifier.as_ref(), &confirmation, policy).await;
            drop(permit);
        });
    }
    debug!("notify queue closed");
}

/// Returns true once delivered, false when the policy gives up.
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    confirmation: &Confirmation,
    policy: RetryPolicy,
) -> bool {
    let id = confirmation.reservation.id;
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match notifier.deliver(confirmation).await {
            Ok(()) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
                debug!("confirmation for {id} delivered (attempt {attempt})");
                return true;
            }
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!("confirmation for {id} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("giving up on confirmation for {id} after {attempts} attempts: {e}");
            }
        }
    }
    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
    false
}
