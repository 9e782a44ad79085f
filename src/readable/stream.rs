use std::{collections::VecDeque, future::Future, sync::Arc, task::Context};

use parking_lot::Mutex;
use tracing::trace;

use super::{
    close_read_requests, error_read_requests, fanout_waker,
    source::{SourceResult, UnderlyingSource},
    CancelFuture, InFlight, ReadRequest, ReadableStreamDefaultReader, WakerSet,
};
use crate::{
    error::StreamError, queuing_strategy::QueuingStrategy, readable::ReadableStreamDefaultController,
    utils::queue::QueueWithSizes,
};

/// https://streams.spec.whatwg.org/#rs-internal-slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadableStreamState {
    Readable,
    Closed,
    Errored(StreamError),
}

impl ReadableStreamState {
    pub(super) fn is_readable(&self) -> bool {
        matches!(self, Self::Readable)
    }
}

/// State shared between a default stream, its controller handles and its
/// reader. The source sits in its own lock so callbacks never run under the
/// stream lock; a controller handle used from inside `pull` takes the stream
/// lock freely.
pub(super) struct DefaultShared<T> {
    pub(super) inner: Mutex<DefaultInner<T>>,
    pub(super) source: Mutex<Option<Box<dyn UnderlyingSource<T>>>>,
}

pub(super) struct DefaultInner<T> {
    pub(super) state: ReadableStreamState,
    pub(super) disturbed: bool,
    pub(super) locked: bool,
    pub(super) container: QueueWithSizes<T>,
    pub(super) close_requested: bool,
    pub(super) started: bool,
    pub(super) pulling: bool,
    pub(super) pull_again: bool,
    pub(super) strategy_hwm: usize,
    pub(super) strategy_size: Option<Box<dyn Fn(&T) -> usize + Send>>,
    pub(super) read_requests: VecDeque<ReadRequest<T>>,
    pub(super) in_flight: Option<InFlight>,
    /// Consumer futures parked on this stream; woken when a new start/pull
    /// future is stashed, when the in-flight one becomes ready, and on
    /// close/error.
    pub(super) wakers: Arc<WakerSet>,
}

impl<T> DefaultInner<T> {
    /// https://streams.spec.whatwg.org/#readable-stream-default-controller-can-close-or-enqueue
    pub(super) fn can_close_or_enqueue(&self) -> bool {
        // If controller.[[closeRequested]] is false and state is "readable", return true.
        !self.close_requested && self.state.is_readable()
    }

    /// https://streams.spec.whatwg.org/#readable-stream-default-controller-get-desired-size
    pub(super) fn desired_size(&self) -> Option<isize> {
        match self.state {
            ReadableStreamState::Errored(_) => None,
            ReadableStreamState::Closed => Some(0),
            ReadableStreamState::Readable => {
                Some(self.strategy_hwm as isize - self.container.queue_total_size as isize)
            },
        }
    }

    /// https://streams.spec.whatwg.org/#readable-stream-default-controller-should-call-pull
    fn should_call_pull(&self) -> bool {
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(controller) is
        // false, return false.
        if !self.can_close_or_enqueue() {
            return false;
        }

        // If controller.[[started]] is false, return false.
        if !self.started {
            return false;
        }

        // If ! IsReadableStreamLocked(stream) is true and
        // ! ReadableStreamGetNumReadRequests(stream) > 0, return true.
        if self.locked && !self.read_requests.is_empty() {
            return true;
        }

        // If desiredSize > 0, return true.
        self.desired_size().expect("desiredSize of readable stream") > 0
    }

    /// https://streams.spec.whatwg.org/#readable-stream-close
    pub(super) fn readable_stream_close(&mut self) {
        // Set stream.[[state]] to "closed".
        self.state = ReadableStreamState::Closed;
        self.in_flight = None;

        // Resolve each read request with «[ "value" → undefined, "done" → true ]».
        close_read_requests(&mut self.read_requests);
        self.wakers.wake_all();
    }
}

/// https://streams.spec.whatwg.org/#readable-stream-default-controller-error
pub(super) fn controller_error<T>(shared: &Arc<DefaultShared<T>>, e: StreamError) {
    {
        let mut inner = shared.inner.lock();
        // If stream.[[state]] is not "readable", return.
        if !inner.state.is_readable() {
            return;
        }

        trace!(error = %e, "erroring stream");

        // Perform ! ResetQueue(controller).
        inner.container.reset_queue();
        inner.strategy_size = None;
        inner.in_flight = None;

        // Perform ! ReadableStreamError(stream, e).
        inner.state = ReadableStreamState::Errored(e.clone());
        error_read_requests(&mut inner.read_requests, &e);
        inner.wakers.wake_all();
    }

    // Perform ! ReadableStreamDefaultControllerClearAlgorithms(controller).
    *shared.source.lock() = None;
}

/// https://streams.spec.whatwg.org/#readable-stream-default-controller-call-pull-if-needed
///
/// The single entry point through which the source's pull is ever invoked.
/// The pulling/pullAgain pair coalesces any number of demand signals arriving
/// during a pull into at most one follow-up call.
pub(super) fn call_pull_if_needed<T: Send + 'static>(shared: &Arc<DefaultShared<T>>) {
    loop {
        {
            let mut inner = shared.inner.lock();
            // Let shouldPull be ! ReadableStreamDefaultControllerShouldCallPull(controller).
            // If shouldPull is false, return.
            if !inner.should_call_pull() {
                return;
            }

            // If controller.[[pulling]] is true, set controller.[[pullAgain]]
            // to true and return.
            if inner.pulling {
                trace!("pull in flight, coalescing");
                inner.pull_again = true;
                return;
            }

            // Set controller.[[pulling]] to true.
            inner.pulling = true;
        }

        trace!("invoking pull");
        let mut source = shared.source.lock().take();
        let result = match source.as_mut() {
            Some(source) => source.pull(ReadableStreamDefaultController::new(shared.clone())),
            None => SourceResult::ok(),
        };
        if shared.inner.lock().state.is_readable() {
            *shared.source.lock() = source;
        }

        match result {
            // Upon fulfillment of pullPromise: set controller.[[pulling]] to
            // false; if controller.[[pullAgain]] is true, set it to false and
            // perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
            SourceResult::Ready(Ok(())) => {
                let mut inner = shared.inner.lock();
                inner.pulling = false;
                if inner.pull_again {
                    inner.pull_again = false;
                    drop(inner);
                    continue;
                }
                return;
            },
            // Upon rejection of pullPromise with reason e: perform
            // ! ReadableStreamDefaultControllerError(controller, e).
            SourceResult::Ready(Err(e)) => {
                controller_error(shared, e);
                return;
            },
            SourceResult::Pending(fut) => {
                let mut inner = shared.inner.lock();
                if !inner.state.is_readable() {
                    return;
                }
                inner.in_flight = Some(InFlight::Pull(fut));
                // Some parked consumer has to poll the new future.
                inner.wakers.wake_all();
                return;
            },
        }
    }
}

/// Polls whatever start/pull future is in flight. Consumer futures call this
/// from their own `poll`, so the stream makes progress whenever anyone is
/// waiting on it, without a background task.
///
/// The future is polled through the stream's waker set, not the caller's
/// waker alone: readiness must reach every parked consumer, the caller
/// included, even if the caller is dropped before the future settles.
pub(super) fn drive<T: Send + 'static>(shared: &Arc<DefaultShared<T>>, cx: &mut Context<'_>) {
    loop {
        let (in_flight, wakers) = {
            let mut inner = shared.inner.lock();
            let Some(in_flight) = inner.in_flight.take() else {
                return;
            };
            inner.wakers.register(cx.waker());
            (in_flight, inner.wakers.clone())
        };
        let waker = fanout_waker(&wakers);
        let mut fan_cx = Context::from_waker(&waker);
        let cx = &mut fan_cx;

        match in_flight {
            InFlight::Start(mut fut) => match fut.as_mut().poll(cx) {
                std::task::Poll::Pending => {
                    let mut inner = shared.inner.lock();
                    if inner.state.is_readable() && inner.in_flight.is_none() {
                        inner.in_flight = Some(InFlight::Start(fut));
                    }
                    return;
                },
                // Upon fulfillment of startPromise: set controller.[[started]]
                // to true, perform CallPullIfNeeded.
                std::task::Poll::Ready(Ok(())) => {
                    shared.inner.lock().started = true;
                    call_pull_if_needed(shared);
                },
                std::task::Poll::Ready(Err(e)) => {
                    controller_error(shared, e);
                    return;
                },
            },
            InFlight::Pull(mut fut) => match fut.as_mut().poll(cx) {
                std::task::Poll::Pending => {
                    let mut inner = shared.inner.lock();
                    if inner.state.is_readable() && inner.in_flight.is_none() {
                        inner.in_flight = Some(InFlight::Pull(fut));
                    }
                    return;
                },
                std::task::Poll::Ready(Ok(())) => {
                    let pull_again = {
                        let mut inner = shared.inner.lock();
                        inner.pulling = false;
                        std::mem::take(&mut inner.pull_again)
                    };
                    if pull_again {
                        call_pull_if_needed(shared);
                    }
                },
                std::task::Poll::Ready(Err(e)) => {
                    controller_error(shared, e);
                    return;
                },
            },
        }
    }
}

/// https://streams.spec.whatwg.org/#readable-stream-cancel
pub(super) fn readable_stream_cancel<T: Send + 'static>(
    shared: &Arc<DefaultShared<T>>,
    reason: Option<String>,
) -> CancelFuture {
    {
        let mut inner = shared.inner.lock();
        // Set stream.[[disturbed]] to true.
        inner.disturbed = true;

        match inner.state {
            // If stream.[[state]] is "closed", return a promise resolved with
            // undefined.
            ReadableStreamState::Closed => return CancelFuture::Ready(Some(Ok(()))),
            // If stream.[[state]] is "errored", return a promise rejected
            // with stream.[[storedError]].
            ReadableStreamState::Errored(ref e) => {
                return CancelFuture::Ready(Some(Err(e.clone())));
            },
            ReadableStreamState::Readable => {},
        }

        // Perform ! ReadableStreamClose(stream).
        inner.readable_stream_close();
        // cancelSteps: perform ! ResetQueue(this), clear algorithms.
        inner.container.reset_queue();
        inner.strategy_size = None;
    }

    // Return the result of reacting to sourceCancelPromise.
    match shared.source.lock().take() {
        None => CancelFuture::Ready(Some(Ok(()))),
        Some(mut source) => match source.cancel(reason) {
            SourceResult::Ready(result) => CancelFuture::Ready(Some(result)),
            SourceResult::Pending(fut) => CancelFuture::Pending(fut),
        },
    }
}

/// A readable stream of chunks of type `T`, queued with a pluggable strategy.
/// https://streams.spec.whatwg.org/#rs-class
///
/// Construction runs the source's `start` immediately; pulls begin once start
/// settles and demand exists.
pub struct ReadableStream<T> {
    pub(super) shared: Arc<DefaultShared<T>>,
}

impl<T: Send + 'static> ReadableStream<T> {
    pub fn new(
        source: impl UnderlyingSource<T>,
        strategy: impl QueuingStrategy<T>,
    ) -> Self {
        let strategy_hwm = strategy.high_water_mark();
        let shared = Arc::new(DefaultShared {
            inner: Mutex::new(DefaultInner {
                state: ReadableStreamState::Readable,
                disturbed: false,
                locked: false,
                container: QueueWithSizes::new(),
                close_requested: false,
                started: false,
                pulling: false,
                pull_again: false,
                strategy_hwm,
                strategy_size: Some(Box::new(move |chunk| strategy.size(chunk))),
                read_requests: VecDeque::new(),
                in_flight: None,
                wakers: WakerSet::new(),
            }),
            source: Mutex::new(Some(Box::new(source))),
        });

        // Let startResult be the result of performing startAlgorithm.
        let mut source = shared.source.lock().take();
        let result = match source.as_mut() {
            Some(source) => source.start(ReadableStreamDefaultController::new(shared.clone())),
            None => SourceResult::ok(),
        };
        if shared.inner.lock().state.is_readable() {
            *shared.source.lock() = source;
        }

        match result {
            SourceResult::Ready(Ok(())) => {
                shared.inner.lock().started = true;
                call_pull_if_needed(&shared);
            },
            SourceResult::Ready(Err(e)) => controller_error(&shared, e),
            SourceResult::Pending(fut) => {
                shared.inner.lock().in_flight = Some(InFlight::Start(fut));
            },
        }

        Self { shared }
    }

    /// Whether a reader currently holds the stream.
    pub fn is_locked(&self) -> bool {
        self.shared.inner.lock().locked
    }

    /// Whether the stream has ever been read from or cancelled.
    pub fn is_disturbed(&self) -> bool {
        self.shared.inner.lock().disturbed
    }

    /// https://streams.spec.whatwg.org/#rs-get-reader
    pub fn get_reader(&self) -> Result<ReadableStreamDefaultReader<T>, StreamError> {
        let mut inner = self.shared.inner.lock();
        // If ! IsReadableStreamLocked(stream) is true, throw a TypeError.
        if inner.locked {
            return Err(StreamError::r#type(
                "ReadableStream is locked to a reader",
            ));
        }
        inner.locked = true;
        Ok(ReadableStreamDefaultReader::new(self.shared.clone()))
    }

    /// https://streams.spec.whatwg.org/#rs-cancel
    pub fn cancel(&self, reason: Option<String>) -> CancelFuture {
        // If ! IsReadableStreamLocked(this) is true, return a promise rejected
        // with a TypeError.
        if self.shared.inner.lock().locked {
            return CancelFuture::Ready(Some(Err(StreamError::r#type(
                "cannot cancel a stream locked to a reader",
            ))));
        }
        readable_stream_cancel(&self.shared, reason)
    }

    pub fn state(&self) -> ReadableStreamState {
        self.shared.inner.lock().state.clone()
    }
}
