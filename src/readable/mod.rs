use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use futures::{
    future::BoxFuture,
    task::{self, ArcWake},
};
use parking_lot::Mutex;

use crate::error::StreamError;

mod byob_reader;
mod byte_controller;
mod byte_reader;
mod default_controller;
mod default_reader;
pub(crate) mod source;
mod stream;

pub use byob_reader::{
    BufferView, FilledView, ReadIntoFuture, ReadableStreamBYOBReader, ReadableStreamBYOBRequest,
};
pub use byte_controller::{ReadableByteStream, ReadableByteStreamController};
pub use byte_reader::{
    ByteClosedFuture, ByteReadFuture, ByteReadManyFuture, ReadableByteStreamReader,
};
pub use default_controller::ReadableStreamDefaultController;
pub use default_reader::{ClosedFuture, ReadFuture, ReadManyFuture, ReadableStreamDefaultReader};
pub use source::{SourceResult, UnderlyingByteSource, UnderlyingSource};
pub use stream::{ReadableStream, ReadableStreamState};

/// The result of a single `read()`: either a chunk, or the end of the stream.
///
/// «[ "value" → chunk, "done" → false ]» / «[ "value" → undefined, "done" → true ]»
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadableStreamReadResult<T> {
    pub value: Option<T>,
    pub done: bool,
}

impl<T> ReadableStreamReadResult<T> {
    pub(crate) fn chunk(value: T) -> Self {
        Self {
            value: Some(value),
            done: false,
        }
    }

    pub(crate) fn done() -> Self {
        Self {
            value: None,
            done: true,
        }
    }
}

/// The result of a `read_many()` batch drain.
///
/// `size` is the queue-size snapshot consumed by the drain: summed byte
/// lengths for byte streams, the queuing-strategy total for default streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadManyResult<T> {
    pub value: Vec<T>,
    pub size: usize,
    pub done: bool,
}

impl<T> ReadManyResult<T> {
    pub(crate) fn done() -> Self {
        Self {
            value: Vec::new(),
            size: 0,
            done: true,
        }
    }
}

/// A pending read registered with the stream, fulfilled by `enqueue`, `close`
/// or `error`. The future half polls the shared slot; the controller half
/// writes exactly once.
pub(crate) struct ReadRequest<T> {
    slot: Arc<Mutex<ReadRequestSlot<T>>>,
}

struct ReadRequestSlot<T> {
    result: Option<Result<ReadableStreamReadResult<T>, StreamError>>,
    waker: Option<Waker>,
    abandoned: bool,
}

impl<T> Clone for ReadRequest<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> ReadRequest<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(ReadRequestSlot {
                result: None,
                waker: None,
                abandoned: false,
            })),
        }
    }

    /// Chunk steps: resolve with «[ "value" → chunk, "done" → false ]».
    pub(crate) fn chunk_steps(&self, chunk: T) {
        self.fulfill(Ok(ReadableStreamReadResult::chunk(chunk)));
    }

    /// Close steps: resolve with «[ "value" → undefined, "done" → true ]».
    pub(crate) fn close_steps(&self) {
        self.fulfill(Ok(ReadableStreamReadResult::done()));
    }

    /// Error steps: reject with e.
    pub(crate) fn error_steps(&self, e: StreamError) {
        self.fulfill(Err(e));
    }

    pub(crate) fn fulfill(&self, result: Result<ReadableStreamReadResult<T>, StreamError>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.result.is_none(), "read request fulfilled twice");
        slot.result = Some(result);
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn take_result(&self) -> Option<Result<ReadableStreamReadResult<T>, StreamError>> {
        self.slot.lock().result.take()
    }

    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.slot.lock();
        match slot.waker {
            Some(ref existing) if existing.will_wake(waker) => {},
            _ => slot.waker = Some(waker.clone()),
        }
    }

    /// The consuming future was dropped before settling. Controllers skip
    /// abandoned requests when handing out chunks, so a dead request cannot
    /// swallow data meant for a live one.
    pub(crate) fn abandon(&self) {
        self.slot.lock().abandoned = true;
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.slot.lock().abandoned
    }
}

/// Pops the first read request whose consumer is still around, discarding
/// abandoned ones on the way.
pub(crate) fn pop_live_request<T>(
    requests: &mut VecDeque<ReadRequest<T>>,
) -> Option<ReadRequest<T>> {
    while let Some(request) = requests.pop_front() {
        if !request.is_abandoned() {
            return Some(request);
        }
    }
    None
}

pub(crate) fn error_read_requests<T>(requests: &mut VecDeque<ReadRequest<T>>, e: &StreamError) {
    // Set reader.[[readRequests]] to a new empty list.
    // For each readRequest of readRequests, perform readRequest’s error steps, given e.
    for request in requests.drain(..) {
        request.error_steps(e.clone());
    }
}

pub(crate) fn close_read_requests<T>(requests: &mut VecDeque<ReadRequest<T>>) {
    for request in requests.drain(..) {
        request.close_steps();
    }
}

/// The single start-or-pull future allowed to be in flight on a stream,
/// driven by whichever consumer future gets polled.
pub(crate) enum InFlight {
    Start(BoxFuture<'static, Result<(), StreamError>>),
    Pull(BoxFuture<'static, Result<(), StreamError>>),
}

/// Future returned by `cancel()`: the synchronous outcome when the source
/// settled immediately, otherwise the source's pending cancel future.
pub enum CancelFuture {
    Ready(Option<Result<(), StreamError>>),
    Pending(BoxFuture<'static, Result<(), StreamError>>),
}

impl Future for CancelFuture {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            CancelFuture::Ready(result) => {
                Poll::Ready(result.take().expect("CancelFuture polled after completion"))
            },
            CancelFuture::Pending(fut) => fut.as_mut().poll(cx),
        }
    }
}

/// Wakers of every consumer future parked on a stream.
///
/// The in-flight start/pull future is polled through a waker built over this
/// set, so when the source becomes ready the wakeup fans out to all parked
/// consumers instead of reaching only the one that happened to drive the
/// future last (which may be gone by then).
pub(crate) struct WakerSet {
    wakers: Mutex<Vec<Waker>>,
}

impl WakerSet {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            wakers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn register(&self, waker: &Waker) {
        let mut wakers = self.wakers.lock();
        if !wakers.iter().any(|existing| existing.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    pub(crate) fn wake_all(&self) {
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
    }
}

impl ArcWake for WakerSet {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_all();
    }
}

pub(crate) fn fanout_waker(set: &Arc<WakerSet>) -> Waker {
    task::waker(set.clone())
}
