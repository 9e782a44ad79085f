use std::sync::Arc;

use tracing::trace;

use super::{
    pop_live_request,
    stream::{call_pull_if_needed, controller_error, DefaultShared},
};
use crate::error::StreamError;

/// Handle through which an underlying source feeds a default stream.
/// https://streams.spec.whatwg.org/#rs-default-controller-class
///
/// Handles are cheap clones over the stream's shared state and stay valid for
/// the life of the stream; once the stream is closed or errored the mutating
/// methods report a `Type` error.
pub struct ReadableStreamDefaultController<T> {
    shared: Arc<DefaultShared<T>>,
}

impl<T> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> ReadableStreamDefaultController<T> {
    pub(super) fn new(shared: Arc<DefaultShared<T>>) -> Self {
        Self { shared }
    }

    /// https://streams.spec.whatwg.org/#rs-default-controller-enqueue
    pub fn enqueue(&self, chunk: T) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(this) is
            // false, throw a TypeError.
            if !inner.can_close_or_enqueue() {
                return Err(StreamError::r#type(
                    "stream is closed or draining, chunk rejected",
                ));
            }

            // If ! IsReadableStreamLocked(stream) is true and
            // ! ReadableStreamGetNumReadRequests(stream) > 0, perform
            // ! ReadableStreamFulfillReadRequest(stream, chunk, false).
            if let Some(request) = pop_live_request(&mut inner.read_requests) {
                request.chunk_steps(chunk);
            } else {
                // Let chunkSize be the result of performing
                // controller.[[strategySizeAlgorithm]], passing in chunk.
                let size = inner
                    .strategy_size
                    .as_ref()
                    .expect("size algorithm present while enqueue permitted")(&chunk);

                // Perform ! EnqueueValueWithSize(controller, chunk, chunkSize).
                inner.container.enqueue_value_with_size(chunk, size);
            }
        }

        // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
        call_pull_if_needed(&self.shared);
        Ok(())
    }

    /// https://streams.spec.whatwg.org/#rs-default-controller-close
    pub fn close(&self) -> Result<(), StreamError> {
        let mut inner = self.shared.inner.lock();
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(this) is
        // false, throw a TypeError. Covers both double-close and
        // close-after-error.
        if !inner.can_close_or_enqueue() {
            return Err(StreamError::r#type(
                "cannot close an already closing or closed stream",
            ));
        }

        // Set controller.[[closeRequested]] to true.
        inner.close_requested = true;
        trace!("close requested");

        // If controller.[[queue]] is empty, perform
        // ! ReadableStreamClose(stream). Otherwise the close happens once the
        // queue drains.
        if inner.container.is_empty() {
            inner.strategy_size = None;
            inner.readable_stream_close();
            drop(inner);
            *self.shared.source.lock() = None;
        }
        Ok(())
    }

    /// https://streams.spec.whatwg.org/#rs-default-controller-error
    pub fn error(&self, e: impl Into<StreamError>) -> Result<(), StreamError> {
        if !self.shared.inner.lock().state.is_readable() {
            return Err(StreamError::r#type(
                "cannot error a stream that is not readable",
            ));
        }
        controller_error(&self.shared, e.into());
        Ok(())
    }

    /// Remaining demand: high water mark minus the queue total size. `None`
    /// once the stream has errored, zero once it has closed.
    /// https://streams.spec.whatwg.org/#rs-default-controller-desired-size
    pub fn desired_size(&self) -> Option<isize> {
        self.shared.inner.lock().desired_size()
    }
}
