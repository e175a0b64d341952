use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ============================================================================
// Bulkhead - Concurrency Cap
// ============================================================================
//
// Caps in-flight calls to an operation; excess callers are rejected
// immediately instead of queueing, isolating one operation's load from the
// rest of the system.
//
// ============================================================================

pub struct Bulkhead {
    name: String,
    permits: Arc<Semaphore>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Fast-fail admission: `None` when the bulkhead is full. The permit
    /// frees a slot on drop.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(bulkhead = %self.name, "Bulkhead full, rejecting call");
                None
            }
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_when_full() {
        let bulkhead = Bulkhead::new("orders", 2);
        let p1 = bulkhead.try_acquire();
        let p2 = bulkhead.try_acquire();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(bulkhead.try_acquire().is_none());
    }

    #[test]
    fn test_permit_released_on_drop() {
        let bulkhead = Bulkhead::new("orders", 1);
        {
            let _permit = bulkhead.try_acquire().unwrap();
            assert_eq!(bulkhead.available(), 0);
        }
        assert_eq!(bulkhead.available(), 1);
    }
}
