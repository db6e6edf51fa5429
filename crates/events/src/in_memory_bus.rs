//! Channel-backed bus for tests, benches and single-process deployments.

use std::sync::{Mutex, PoisonError, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    #[error("event bus lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for InMemoryBusError {
    fn from(_: PoisonError<T>) -> Self {
        InMemoryBusError::Poisoned
    }
}

/// Fans every published message out to the live subscriptions.
///
/// Publishing with nobody subscribed is not an error: notifications are
/// best-effort. A subscription whose receiver was dropped is forgotten on the
/// next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriptions that were alive at the last publish (or created since).
    pub fn subscriber_count(&self) -> Result<usize, InMemoryBusError> {
        Ok(self.senders.lock()?.len())
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock()?;
        let Some((last, rest)) = senders.split_last() else {
            return Ok(());
        };

        let mut alive: Vec<bool> = rest
            .iter()
            .map(|tx| tx.send(message.clone()).is_ok())
            .collect();
        alive.push(last.send(message).is_ok());

        let mut flags = alive.into_iter();
        senders.retain(|_| flags.next().unwrap_or(false));
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        match self.senders.lock() {
            Ok(mut senders) => senders.push(tx),
            // The subscription is still handed out; it simply never receives.
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish("inventory.stock.low".to_string()).unwrap();

        assert_eq!(a.try_recv().unwrap(), "inventory.stock.low");
        assert_eq!(b.try_recv().unwrap(), "inventory.stock.low");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = InMemoryEventBus::<u32>::new();
        bus.publish(7).unwrap();
        assert_eq!(bus.subscriber_count().unwrap(), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count().unwrap(), 2);

        bus.publish(1u32).unwrap();
        bus.publish(2u32).unwrap();

        assert_eq!(kept.drain(), vec![1, 2]);
        assert_eq!(bus.subscriber_count().unwrap(), 1);
    }
}
