use std::collections::VecDeque;

/// QueueWithSizes is present in default-controller streams and abstracts away
/// certain queue operations.
/// https://streams.spec.whatwg.org/#queue-with-sizes
///
/// Sizes are `usize`, so the non-negative/finite validation the reference
/// algorithms perform on JS numbers holds structurally.
#[derive(Debug)]
pub(crate) struct QueueWithSizes<T> {
    pub(crate) queue: VecDeque<ValueWithSize<T>>,
    pub(crate) queue_total_size: usize,
}

impl<T> Default for QueueWithSizes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueWithSizes<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queue_total_size: 0,
        }
    }

    pub(crate) fn enqueue_value_with_size(&mut self, value: T, size: usize) {
        // Append a new value-with-size with value value and size size to container.[[queue]].
        self.queue.push_back(ValueWithSize { value, size });

        // Set container.[[queueTotalSize]] to container.[[queueTotalSize]] + size.
        self.queue_total_size += size;
    }

    pub(crate) fn dequeue_value(&mut self) -> T {
        // Let valueWithSize be container.[[queue]][0].
        // Remove valueWithSize from container.[[queue]].
        let value_with_size = self
            .queue
            .pop_front()
            .expect("DequeueValue called with empty queue");

        // Set container.[[queueTotalSize]] to container.[[queueTotalSize]] − valueWithSize’s size.
        self.queue_total_size = self.queue_total_size.saturating_sub(value_with_size.size);

        value_with_size.value
    }

    /// Remove every entry in one pass, for the readMany fast path. The total
    /// size is left untouched so the caller can snapshot it before
    /// `reset_queue`.
    pub(crate) fn dequeue_all(&mut self) -> impl Iterator<Item = T> {
        std::mem::take(&mut self.queue).into_iter().map(|e| e.value)
    }

    pub(crate) fn reset_queue(&mut self) {
        // Set container.[[queue]] to a new empty list.
        self.queue.clear();
        // Set container.[[queueTotalSize]] to 0.
        self.queue_total_size = 0;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct ValueWithSize<T> {
    pub(crate) value: T,
    size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_tracks_entry_sizes() {
        let mut queue = QueueWithSizes::new();
        queue.enqueue_value_with_size("a", 3);
        queue.enqueue_value_with_size("b", 5);
        assert_eq!(queue.queue_total_size, 8);

        assert_eq!(queue.dequeue_value(), "a");
        assert_eq!(queue.queue_total_size, 5);

        assert_eq!(queue.dequeue_value(), "b");
        assert_eq!(queue.queue_total_size, 0);
    }

    #[test]
    fn reset_queue_is_idempotent() {
        let mut queue: QueueWithSizes<&str> = QueueWithSizes::new();
        queue.reset_queue();
        assert_eq!(queue.queue_total_size, 0);
        assert!(queue.is_empty());

        queue.enqueue_value_with_size("a", 1);
        queue.reset_queue();
        queue.reset_queue();
        assert_eq!(queue.queue_total_size, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_all_preserves_order() {
        let mut queue = QueueWithSizes::new();
        for value in ["a", "b", "c"] {
            queue.enqueue_value_with_size(value, 1);
        }
        let drained: Vec<_> = queue.dequeue_all().collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }
}
