use futures::future::BoxFuture;

use super::{byte_controller::ReadableByteStreamController, ReadableStreamDefaultController};
use crate::error::StreamError;

/// What a source callback produced: a value that settled synchronously, or a
/// promise that settles later. Sources that can answer immediately avoid
/// allocating a future, and the controller avoids a trip through the pending
/// machinery.
pub enum SourceResult {
    Ready(Result<(), StreamError>),
    Pending(BoxFuture<'static, Result<(), StreamError>>),
}

impl SourceResult {
    /// Equivalent of returning undefined from a callback.
    pub fn ok() -> Self {
        Self::Ready(Ok(()))
    }

    pub fn err(e: impl Into<StreamError>) -> Self {
        Self::Ready(Err(e.into()))
    }

    pub fn pending(fut: impl std::future::Future<Output = Result<(), StreamError>> + Send + 'static) -> Self {
        Self::Pending(Box::pin(fut))
    }
}

impl From<Result<(), StreamError>> for SourceResult {
    fn from(result: Result<(), StreamError>) -> Self {
        Self::Ready(result)
    }
}

/// The underlying source of a default readable stream.
/// https://streams.spec.whatwg.org/#underlying-source-api
///
/// Each callback receives a controller handle; it may enqueue, close or error
/// synchronously before returning, or stash the handle and do so later.
/// Callbacks run outside the stream's internal lock, so re-entering the
/// controller from inside `pull` is always safe.
pub trait UnderlyingSource<T>: Send + 'static {
    /// Called once at construction, before any pull. Pulls are held back
    /// until the returned result settles.
    fn start(&mut self, controller: ReadableStreamDefaultController<T>) -> SourceResult {
        let _ = controller;
        SourceResult::ok()
    }

    /// Called whenever the stream wants more data: there is a pending read,
    /// or the queue is below the high water mark. Never invoked concurrently
    /// with itself.
    fn pull(&mut self, controller: ReadableStreamDefaultController<T>) -> SourceResult {
        let _ = controller;
        SourceResult::ok()
    }

    /// Called when the consumer cancels the stream. The queue has already
    /// been discarded by the time this runs.
    fn cancel(&mut self, reason: Option<String>) -> SourceResult {
        let _ = reason;
        SourceResult::ok()
    }
}

/// The underlying source of a readable byte stream.
pub trait UnderlyingByteSource: Send + 'static {
    fn start(&mut self, controller: ReadableByteStreamController) -> SourceResult {
        let _ = controller;
        SourceResult::ok()
    }

    fn pull(&mut self, controller: ReadableByteStreamController) -> SourceResult {
        let _ = controller;
        SourceResult::ok()
    }

    fn cancel(&mut self, reason: Option<String>) -> SourceResult {
        let _ = reason;
        SourceResult::ok()
    }

    /// When set, plain `read()`s on an empty queue put up a pull-into
    /// descriptor of this many bytes, so the source can fill consumer-visible
    /// buffers through the BYOB request even without a BYOB reader.
    /// Zero is rejected at construction.
    fn auto_allocate_chunk_size(&self) -> Option<usize> {
        None
    }
}
