use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Outstanding jobs of one cycle.
#[derive(Debug, Default)]
pub struct CompletionCounter {
    outstanding: AtomicUsize,
    drained: Notify,
}

impl CompletionCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers one more outstanding job. The job counts as done when the ticket is dropped.
    pub fn ticket(self: &Arc<Self>) -> CompletionTicket {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        CompletionTicket {
            counter: Arc::clone(self),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Resolves once every ticket handed out so far has been dropped.
    pub async fn wait(&self) {
        loop {
            // Registered before the check so a concurrent final drop is not missed.
            let drained = self.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }
}

#[derive(Debug)]
pub struct CompletionTicket {
    counter: Arc<CompletionCounter>,
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        if self.counter.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counter.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let counter = CompletionCounter::new();
        tokio::time::timeout(Duration::from_millis(100), counter.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_all_tickets_dropped() {
        let counter = CompletionCounter::new();
        let tickets: Vec<_> = (0..3).map(|_| counter.ticket()).collect();
        assert_eq!(counter.outstanding(), 3);

        let waiter = tokio::spawn({
            let counter = counter.clone();
            async move { counter.wait().await }
        });

        for ticket in tickets {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!waiter.is_finished());
            drop(ticket);
        }

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.outstanding(), 0);
    }
}
