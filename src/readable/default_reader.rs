use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use super::{
    error_read_requests,
    stream::{call_pull_if_needed, drive, readable_stream_cancel, DefaultShared, ReadableStreamState},
    CancelFuture, ReadManyResult, ReadRequest, ReadableStreamReadResult,
};
use crate::error::StreamError;

/// https://streams.spec.whatwg.org/#default-reader-class
///
/// Holds the stream's lock until dropped or released. At most one reader can
/// exist at a time; pending reads are rejected if the reader is released out
/// from under them.
pub struct ReadableStreamDefaultReader<T> {
    shared: Arc<DefaultShared<T>>,
    released: bool,
}

impl<T: Send + 'static> ReadableStreamDefaultReader<T> {
    pub(super) fn new(shared: Arc<DefaultShared<T>>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// https://streams.spec.whatwg.org/#default-reader-read
    pub fn read(&self) -> ReadFuture<T> {
        if self.released {
            return ReadFuture::immediate(
                &self.shared,
                Err(StreamError::r#type("reader has been released")),
            );
        }

        let mut inner = self.shared.inner.lock();
        // Set stream.[[disturbed]] to true.
        inner.disturbed = true;

        match inner.state.clone() {
            // If stream.[[state]] is "closed", perform readRequest’s close steps.
            ReadableStreamState::Closed => {
                drop(inner);
                ReadFuture::immediate(&self.shared, Ok(ReadableStreamReadResult::done()))
            },
            // If stream.[[state]] is "errored", perform readRequest’s error
            // steps given stream.[[storedError]].
            ReadableStreamState::Errored(e) => {
                drop(inner);
                ReadFuture::immediate(&self.shared, Err(e))
            },
            ReadableStreamState::Readable => {
                // pullSteps: if this.[[queue]] is not empty, let chunk be
                // ! DequeueValue(this).
                if !inner.container.is_empty() {
                    let chunk = inner.container.dequeue_value();

                    // If this.[[closeRequested]] is true and this.[[queue]]
                    // is empty, perform ! ReadableStreamClose(stream).
                    if inner.close_requested && inner.container.is_empty() {
                        inner.strategy_size = None;
                        inner.readable_stream_close();
                        drop(inner);
                        *self.shared.source.lock() = None;
                    } else {
                        // Otherwise, perform CallPullIfNeeded.
                        drop(inner);
                        call_pull_if_needed(&self.shared);
                    }

                    ReadFuture::immediate(&self.shared, Ok(ReadableStreamReadResult::chunk(chunk)))
                } else {
                    // Otherwise, perform ! ReadableStreamAddReadRequest(stream,
                    // readRequest) and CallPullIfNeeded.
                    let request = ReadRequest::new();
                    inner.read_requests.push_back(request.clone());
                    drop(inner);
                    call_pull_if_needed(&self.shared);
                    ReadFuture::waiting(&self.shared, request)
                }
            },
        }
    }

    /// Drain every queued chunk in one call.
    ///
    /// Resolves immediately when chunks are queued, with the whole queue and
    /// a size snapshot. On an empty readable stream it waits for the next
    /// chunk and batches whatever else arrived by then. Closed streams give
    /// `{value: [], size: 0, done: true}`; errored streams reject with the
    /// stored error.
    pub fn read_many(&self) -> ReadManyFuture<T> {
        if self.released {
            return ReadManyFuture::immediate(
                &self.shared,
                Err(StreamError::r#type("reader has been released")),
            );
        }

        let mut inner = self.shared.inner.lock();
        inner.disturbed = true;

        match inner.state.clone() {
            ReadableStreamState::Closed => {
                drop(inner);
                ReadManyFuture::immediate(&self.shared, Ok(ReadManyResult::done()))
            },
            ReadableStreamState::Errored(e) => {
                drop(inner);
                ReadManyFuture::immediate(&self.shared, Err(e))
            },
            ReadableStreamState::Readable => {
                if !inner.container.is_empty() {
                    // Snapshot the size, take every entry, reset the queue.
                    let size = inner.container.queue_total_size;
                    let value: Vec<T> = inner.container.dequeue_all().collect();
                    inner.container.reset_queue();

                    // One resume signal for the whole batch: either finish a
                    // requested close or let the source refill.
                    if inner.close_requested {
                        inner.strategy_size = None;
                        inner.readable_stream_close();
                        drop(inner);
                        *self.shared.source.lock() = None;
                    } else {
                        drop(inner);
                        call_pull_if_needed(&self.shared);
                    }

                    ReadManyFuture::immediate(
                        &self.shared,
                        Ok(ReadManyResult {
                            value,
                            size,
                            done: false,
                        }),
                    )
                } else {
                    let request = ReadRequest::new();
                    inner.read_requests.push_back(request.clone());
                    drop(inner);
                    call_pull_if_needed(&self.shared);
                    ReadManyFuture::waiting(&self.shared, request)
                }
            },
        }
    }

    /// https://streams.spec.whatwg.org/#generic-reader-cancel
    pub fn cancel(&self, reason: Option<String>) -> CancelFuture {
        if self.released {
            return CancelFuture::Ready(Some(Err(StreamError::r#type(
                "reader has been released",
            ))));
        }
        readable_stream_cancel(&self.shared, reason)
    }

    /// Resolves when the stream closes, rejects with the stored error when it
    /// errors.
    /// https://streams.spec.whatwg.org/#generic-reader-closed
    pub fn closed(&self) -> ClosedFuture<T> {
        ClosedFuture {
            shared: self.shared.clone(),
        }
    }
}

impl<T> ReadableStreamDefaultReader<T> {
    /// https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaultreaderrelease
    pub fn release_lock(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut inner = self.shared.inner.lock();
        inner.locked = false;
        // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e)
        // with a TypeError.
        let e = StreamError::r#type("reader was released before the read settled");
        error_read_requests(&mut inner.read_requests, &e);
    }
}

impl<T> Drop for ReadableStreamDefaultReader<T> {
    fn drop(&mut self) {
        self.release_lock();
    }
}

enum ReadState<T> {
    Immediate(Option<Result<ReadableStreamReadResult<T>, StreamError>>),
    Waiting(ReadRequest<T>),
}

/// Future returned by [`ReadableStreamDefaultReader::read`].
pub struct ReadFuture<T> {
    shared: Arc<DefaultShared<T>>,
    state: ReadState<T>,
}

impl<T> Unpin for ReadFuture<T> {}

impl<T> ReadFuture<T> {
    fn immediate(
        shared: &Arc<DefaultShared<T>>,
        result: Result<ReadableStreamReadResult<T>, StreamError>,
    ) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadState::Immediate(Some(result)),
        }
    }

    fn waiting(shared: &Arc<DefaultShared<T>>, request: ReadRequest<T>) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadState::Waiting(request),
        }
    }
}

impl<T: Send + 'static> Future for ReadFuture<T> {
    type Output = Result<ReadableStreamReadResult<T>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReadState::Immediate(result) => {
                Poll::Ready(result.take().expect("read future polled after completion"))
            },
            ReadState::Waiting(request) => {
                if let Some(result) = request.take_result() {
                    return Poll::Ready(result);
                }
                drive(&this.shared, cx);
                if let Some(result) = request.take_result() {
                    return Poll::Ready(result);
                }
                request.register(cx.waker());
                this.shared.inner.lock().wakers.register(cx.waker());
                Poll::Pending
            },
        }
    }
}

impl<T> Drop for ReadFuture<T> {
    fn drop(&mut self) {
        if let ReadState::Waiting(request) = &self.state {
            request.abandon();
        }
    }
}

enum ReadManyState<T> {
    Immediate(Option<Result<ReadManyResult<T>, StreamError>>),
    Waiting(ReadRequest<T>),
}

/// Future returned by [`ReadableStreamDefaultReader::read_many`].
pub struct ReadManyFuture<T> {
    shared: Arc<DefaultShared<T>>,
    state: ReadManyState<T>,
}

impl<T> Unpin for ReadManyFuture<T> {}

impl<T: Send + 'static> ReadManyFuture<T> {
    fn immediate(
        shared: &Arc<DefaultShared<T>>,
        result: Result<ReadManyResult<T>, StreamError>,
    ) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadManyState::Immediate(Some(result)),
        }
    }

    fn waiting(shared: &Arc<DefaultShared<T>>, request: ReadRequest<T>) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadManyState::Waiting(request),
        }
    }

    /// The single awaited chunk landed; batch it with whatever reached the
    /// queue since, then resume the stream once.
    fn finish(
        shared: &Arc<DefaultShared<T>>,
        first: T,
    ) -> Result<ReadManyResult<T>, StreamError> {
        let mut inner = shared.inner.lock();

        let first_size = inner
            .strategy_size
            .as_ref()
            .map(|size| size(&first))
            .unwrap_or_default();
        let extra_size = inner.container.queue_total_size;

        let mut value = vec![first];
        value.extend(inner.container.dequeue_all());
        inner.container.reset_queue();

        if inner.state.is_readable() {
            if inner.close_requested {
                inner.strategy_size = None;
                inner.readable_stream_close();
                drop(inner);
                *shared.source.lock() = None;
            } else {
                drop(inner);
                call_pull_if_needed(shared);
            }
        }

        Ok(ReadManyResult {
            value,
            size: first_size + extra_size,
            done: false,
        })
    }
}

impl<T: Send + 'static> Future for ReadManyFuture<T> {
    type Output = Result<ReadManyResult<T>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReadManyState::Immediate(result) => {
                Poll::Ready(result.take().expect("read_many future polled after completion"))
            },
            ReadManyState::Waiting(request) => {
                let settled = match request.take_result() {
                    Some(result) => Some(result),
                    None => {
                        drive(&this.shared, cx);
                        request.take_result()
                    },
                };
                match settled {
                    Some(Ok(ReadableStreamReadResult {
                        value: Some(first), ..
                    })) => Poll::Ready(ReadManyFuture::finish(&this.shared, first)),
                    Some(Ok(_)) => Poll::Ready(Ok(ReadManyResult::done())),
                    Some(Err(e)) => Poll::Ready(Err(e)),
                    None => {
                        request.register(cx.waker());
                        this.shared.inner.lock().wakers.register(cx.waker());
                        Poll::Pending
                    },
                }
            },
        }
    }
}

impl<T> Drop for ReadManyFuture<T> {
    fn drop(&mut self) {
        if let ReadManyState::Waiting(request) = &self.state {
            request.abandon();
        }
    }
}

/// Future returned by [`ReadableStreamDefaultReader::closed`].
pub struct ClosedFuture<T> {
    shared: Arc<DefaultShared<T>>,
}

impl<T> Unpin for ClosedFuture<T> {}

impl<T: Send + 'static> Future for ClosedFuture<T> {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        drive(&this.shared, cx);

        let mut inner = this.shared.inner.lock();
        match inner.state {
            ReadableStreamState::Closed => Poll::Ready(Ok(())),
            ReadableStreamState::Errored(ref e) => Poll::Ready(Err(e.clone())),
            ReadableStreamState::Readable => {
                inner.wakers.register(cx.waker());
                Poll::Pending
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::channel::oneshot;
    use parking_lot::Mutex;

    use crate::{
        queuing_strategy::CountQueuingStrategy, ReadableStream, ReadableStreamDefaultController,
        SourceResult, StreamError, UnderlyingSource,
    };

    /// Hands its controller out through a shared slot so tests can drive the
    /// stream from outside.
    #[derive(Default)]
    struct RemoteSource {
        controller: Arc<Mutex<Option<ReadableStreamDefaultController<u32>>>>,
        cancelled: Arc<Mutex<Option<Option<String>>>>,
    }

    impl UnderlyingSource<u32> for RemoteSource {
        fn start(&mut self, controller: ReadableStreamDefaultController<u32>) -> SourceResult {
            *self.controller.lock() = Some(controller);
            SourceResult::ok()
        }

        fn cancel(&mut self, reason: Option<String>) -> SourceResult {
            *self.cancelled.lock() = Some(reason);
            SourceResult::ok()
        }
    }

    fn remote() -> (
        ReadableStream<u32>,
        Arc<Mutex<Option<ReadableStreamDefaultController<u32>>>>,
        Arc<Mutex<Option<Option<String>>>>,
    ) {
        let source = RemoteSource::default();
        let controller = source.controller.clone();
        let cancelled = source.cancelled.clone();
        // High water mark 0: the stream never pulls on its own.
        let stream = ReadableStream::new(source, CountQueuingStrategy::new(0));
        (stream, controller, cancelled)
    }

    fn enqueue(slot: &Arc<Mutex<Option<ReadableStreamDefaultController<u32>>>>, chunk: u32) {
        let controller = slot.lock().clone().expect("controller captured in start");
        controller.enqueue(chunk).expect("enqueue while readable");
    }

    #[tokio::test]
    async fn reads_queued_chunks_in_order() {
        let (stream, controller, _) = remote();
        for chunk in [1, 2, 3] {
            enqueue(&controller, chunk);
        }
        controller.lock().clone().unwrap().close().unwrap();

        let reader = stream.get_reader().unwrap();
        for expected in [1, 2, 3] {
            let result = reader.read().await.unwrap();
            assert_eq!(result.value, Some(expected));
            assert!(!result.done);
        }

        let end = reader.read().await.unwrap();
        assert!(end.done);
        assert_eq!(end.value, None);
        reader.closed().await.unwrap();
    }

    #[tokio::test]
    async fn pending_read_resolved_by_later_enqueue() {
        let (stream, controller, _) = remote();
        let reader = stream.get_reader().unwrap();

        let read = reader.read();
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        enqueue(&controller, 7);
        let result = read.await.unwrap();
        assert_eq!(result.value, Some(7));
    }

    #[tokio::test]
    async fn dropped_read_future_does_not_swallow_chunks() {
        let (stream, controller, _) = remote();
        let reader = stream.get_reader().unwrap();

        // A read that gets dropped mid-wait, as under select! or a timeout.
        let mut first = reader.read();
        assert!(futures::poll!(&mut first).is_pending());
        drop(first);

        let second = reader.read();
        futures::pin_mut!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());

        // The chunk goes to the live read, not the dead slot ahead of it.
        enqueue(&controller, 11);
        assert_eq!(second.await.unwrap().value, Some(11));
    }

    #[tokio::test]
    async fn pull_readiness_wakes_every_parked_consumer() {
        use std::{
            future::Future,
            task::{Context, Poll},
        };

        struct Flag(Arc<AtomicUsize>);
        impl futures::task::ArcWake for Flag {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        struct GatedSource {
            gate: Option<oneshot::Receiver<()>>,
        }
        impl UnderlyingSource<u32> for GatedSource {
            fn pull(&mut self, controller: ReadableStreamDefaultController<u32>) -> SourceResult {
                match self.gate.take() {
                    Some(gate) => SourceResult::pending(async move {
                        gate.await.ok();
                        controller.enqueue(9)?;
                        Ok(())
                    }),
                    None => SourceResult::ok(),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let stream = ReadableStream::new(
            GatedSource { gate: Some(rx) },
            CountQueuingStrategy::new(0),
        );
        let reader = stream.get_reader().unwrap();

        let wakes = Arc::new(AtomicUsize::new(0));
        let waker = futures::task::waker(Arc::new(Flag(wakes.clone())));
        let mut cx = Context::from_waker(&waker);

        let read = reader.read();
        futures::pin_mut!(read);
        assert!(read.as_mut().poll(&mut cx).is_pending());

        // A second consumer drives the same in-flight pull, then goes away
        // without ever being polled again.
        let noop = futures::task::noop_waker();
        let mut noop_cx = Context::from_waker(&noop);
        let closed = reader.closed();
        futures::pin_mut!(closed);
        assert!(closed.as_mut().poll(&mut noop_cx).is_pending());

        // The pull settling must still wake the read.
        tx.send(()).unwrap();
        assert!(wakes.load(Ordering::SeqCst) > 0);
        match read.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(result)) => assert_eq!(result.value, Some(9)),
            other => panic!("read did not settle: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_reads_coalesce_into_one_pull() {
        struct CountingSource {
            pulls: Arc<AtomicUsize>,
            gate: Option<oneshot::Receiver<()>>,
        }

        impl UnderlyingSource<u32> for CountingSource {
            fn pull(&mut self, controller: ReadableStreamDefaultController<u32>) -> SourceResult {
                self.pulls.fetch_add(1, Ordering::SeqCst);
                match self.gate.take() {
                    Some(gate) => SourceResult::pending(async move {
                        gate.await.ok();
                        controller.enqueue(42)?;
                        Ok(())
                    }),
                    None => SourceResult::ok(),
                }
            }
        }

        let pulls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let stream = ReadableStream::new(
            CountingSource {
                pulls: pulls.clone(),
                gate: Some(rx),
            },
            CountQueuingStrategy::new(0),
        );
        let reader = stream.get_reader().unwrap();

        let first = reader.read();
        let second = reader.read();
        let third = reader.read();
        futures::pin_mut!(first, second, third);

        // All three reads are outstanding, but only one pull went out.
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());
        assert!(futures::poll!(third.as_mut()).is_pending());
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        let result = first.await.unwrap();
        assert_eq!(result.value, Some(42));

        // The pending pull settled and pullAgain triggered exactly one more.
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pulls_until_high_water_mark_reached() {
        struct EagerSource {
            pulls: Arc<AtomicUsize>,
        }

        impl UnderlyingSource<u32> for EagerSource {
            fn pull(&mut self, controller: ReadableStreamDefaultController<u32>) -> SourceResult {
                self.pulls.fetch_add(1, Ordering::SeqCst);
                controller.enqueue(0).expect("enqueue while readable");
                SourceResult::ok()
            }
        }

        let pulls = Arc::new(AtomicUsize::new(0));
        let stream = ReadableStream::new(
            EagerSource {
                pulls: pulls.clone(),
            },
            CountQueuingStrategy::new(2),
        );

        // Construction pulls until desiredSize reaches zero, then stops.
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
        let reader = stream.get_reader().unwrap();
        let result = reader.read().await.unwrap();
        assert_eq!(result.value, Some(0));
        // Consuming a chunk re-opens demand for exactly one more pull.
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn close_drains_queue_before_done() {
        let (stream, controller, _) = remote();
        enqueue(&controller, 1);
        enqueue(&controller, 2);
        let handle = controller.lock().clone().unwrap();
        handle.close().unwrap();

        // Close while chunks are queued must not throw, and a second close must.
        assert!(handle.close().is_err());

        let reader = stream.get_reader().unwrap();
        assert_eq!(reader.read().await.unwrap().value, Some(1));
        assert_eq!(reader.read().await.unwrap().value, Some(2));
        assert!(reader.read().await.unwrap().done);

        // Enqueue after close is a Type error.
        assert!(matches!(
            handle.enqueue(3),
            Err(StreamError::Type(_))
        ));
    }

    #[tokio::test]
    async fn error_rejects_pending_and_future_reads() {
        let (stream, controller, _) = remote();
        let reader = stream.get_reader().unwrap();

        let pending = reader.read();
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        let handle = controller.lock().clone().unwrap();
        handle.error("boom").unwrap();

        let first = pending.await.unwrap_err();
        let second = reader.read().await.unwrap_err();
        assert_eq!(first, second);
        assert_eq!(reader.closed().await.unwrap_err(), first);
        assert!(handle.desired_size().is_none());
    }

    #[tokio::test]
    async fn release_lock_fails_pending_reads_and_unlocks() {
        let (stream, _, _) = remote();
        let mut reader = stream.get_reader().unwrap();

        let pending = reader.read();
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        reader.release_lock();
        assert!(matches!(pending.await, Err(StreamError::Type(_))));
        assert!(matches!(reader.read().await, Err(StreamError::Type(_))));

        // The stream is free again.
        assert!(!stream.is_locked());
        stream.get_reader().unwrap();
    }

    #[tokio::test]
    async fn cancel_resolves_pending_reads_done() {
        let (stream, _, cancelled) = remote();
        let reader = stream.get_reader().unwrap();

        let pending = reader.read();
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        reader.cancel(Some("no longer needed".into())).await.unwrap();
        assert!(pending.await.unwrap().done);
        assert_eq!(
            cancelled.lock().clone(),
            Some(Some("no longer needed".to_string()))
        );
        reader.closed().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_of_unlocked_stream_goes_through_the_stream() {
        let (stream, _, cancelled) = remote();
        stream.cancel(None).await.unwrap();
        assert_eq!(cancelled.lock().clone(), Some(None));
        assert!(stream.is_disturbed());

        // Cancelling again is a no-op on a closed stream.
        stream.cancel(None).await.unwrap();
    }

    #[tokio::test]
    async fn read_many_drains_the_whole_queue() {
        let (stream, controller, _) = remote();
        for chunk in [1, 2, 3] {
            enqueue(&controller, chunk);
        }

        let reader = stream.get_reader().unwrap();
        let batch = reader.read_many().await.unwrap();
        assert_eq!(batch.value, vec![1, 2, 3]);
        assert_eq!(batch.size, 3);
        assert!(!batch.done);
    }

    #[tokio::test]
    async fn read_many_on_closed_stream_is_empty_done() {
        let (stream, controller, _) = remote();
        controller.lock().clone().unwrap().close().unwrap();

        let reader = stream.get_reader().unwrap();
        let batch = reader.read_many().await.unwrap();
        assert!(batch.value.is_empty());
        assert_eq!(batch.size, 0);
        assert!(batch.done);
    }

    #[tokio::test]
    async fn read_many_surfaces_stored_error() {
        let (stream, controller, _) = remote();
        controller.lock().clone().unwrap().error("bad").unwrap();

        let reader = stream.get_reader().unwrap();
        assert_eq!(
            reader.read_many().await.unwrap_err(),
            StreamError::from("bad")
        );
    }

    #[tokio::test]
    async fn read_many_batches_chunks_arriving_while_waiting() {
        let (stream, controller, _) = remote();
        let reader = stream.get_reader().unwrap();

        let batch = reader.read_many();
        futures::pin_mut!(batch);
        assert!(futures::poll!(batch.as_mut()).is_pending());

        // The first chunk lands in the waiting request, the second queues up.
        enqueue(&controller, 10);
        enqueue(&controller, 20);

        let result = batch.await.unwrap();
        assert_eq!(result.value, vec![10, 20]);
        assert_eq!(result.size, 2);
        assert!(!result.done);
    }

    #[tokio::test]
    async fn read_many_finishes_requested_close() {
        let (stream, controller, _) = remote();
        enqueue(&controller, 5);
        let handle = controller.lock().clone().unwrap();
        handle.close().unwrap();

        let reader = stream.get_reader().unwrap();
        let batch = reader.read_many().await.unwrap();
        assert_eq!(batch.value, vec![5]);
        assert!(!batch.done);

        // Draining the queue completed the close.
        reader.closed().await.unwrap();
        assert!(reader.read_many().await.unwrap().done);
    }

    #[tokio::test]
    async fn locking_is_exclusive() {
        let (stream, _, _) = remote();
        let reader = stream.get_reader().unwrap();
        assert!(stream.is_locked());
        assert!(matches!(stream.get_reader(), Err(StreamError::Type(_))));
        assert!(matches!(
            futures::poll!(Box::pin(stream.cancel(None))),
            std::task::Poll::Ready(Err(StreamError::Type(_)))
        ));
        drop(reader);
        assert!(!stream.is_locked());
    }
}
