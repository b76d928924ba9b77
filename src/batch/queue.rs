use std::collections::VecDeque;

use parking_lot::Mutex;

use super::ConversionRequest;

/// FIFO of requests no worker has picked up yet.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: Mutex<VecDeque<ConversionRequest>>,
}

impl PendingQueue {
    pub(crate) fn new(requests: impl IntoIterator<Item = ConversionRequest>) -> Self {
        Self {
            items: Mutex::new(requests.into_iter().collect()),
        }
    }

    pub(crate) fn pop(&self) -> Option<ConversionRequest> {
        self.items.lock().pop_front()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.lock().len()
    }
}
