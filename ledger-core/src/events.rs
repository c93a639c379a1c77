//! Balance change events
//!
//! The engine publishes one [`BalanceChanged`] per committed posting.
//! Delivery to clients (push channel, polling, webhooks) is up to whoever
//! subscribes; publishing never blocks and never fails the posting.

use crate::types::{AccountId, Amount, Transaction};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// `balance_changed` domain event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChanged {
    /// Account whose balance moved
    pub account_id: AccountId,
    /// Balance after the transaction
    pub new_balance: Amount,
    /// Transaction that caused the change
    pub transaction: Transaction,
}

/// In-process fan-out of balance events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BalanceChanged>,
}

impl EventBus {
    /// Create a bus; slow subscribers lag after `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// New subscription, sees events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceChanged> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: BalanceChanged) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No balance event subscribers");
        }
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TransactionStatus, TransactionType};
    use chrono::Utc;
    use uuid::Uuid;

    fn event(balance: u64) -> BalanceChanged {
        BalanceChanged {
            account_id: AccountId::new("alice"),
            new_balance: Amount::from_minor(balance),
            transaction: Transaction {
                id: Uuid::now_v7(),
                account_id: AccountId::new("alice"),
                tx_type: TransactionType::Topup,
                direction: Direction::Credit,
                amount: Amount::from_minor(balance),
                fee: None,
                status: TransactionStatus::Completed,
                counterparty_account_id: None,
                reference: Uuid::now_v7().to_string(),
                description: String::new(),
                balance_after: Amount::from_minor(balance),
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(event(10));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.publish(event(10));
        bus.publish(event(20));

        assert_eq!(rx.recv().await.unwrap().new_balance, Amount::from_minor(10));
        assert_eq!(rx.recv().await.unwrap().new_balance, Amount::from_minor(20));
    }
}
