use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;

use super::{
    byte_controller::{
        byte_call_pull_if_needed, byte_drive, byte_stream_cancel, handle_queue_drain, ByteShared,
    },
    error_read_requests,
    stream::ReadableStreamState,
    CancelFuture, ReadManyResult, ReadRequest, ReadableStreamReadResult,
};
use crate::error::StreamError;

/// Chunk-at-a-time reader for a byte stream.
///
/// When the source declares an `auto_allocate_chunk_size`, a read against an
/// empty queue puts up a freshly allocated pull-into descriptor, so the
/// source can fill consumer memory through the BYOB request even though the
/// consumer never supplied a buffer.
pub struct ReadableByteStreamReader {
    shared: Arc<ByteShared>,
    released: bool,
}

impl ReadableByteStreamReader {
    pub(super) fn new(shared: Arc<ByteShared>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// https://streams.spec.whatwg.org/#default-reader-read
    pub fn read(&self) -> ByteReadFuture {
        if self.released {
            return ByteReadFuture::immediate(
                &self.shared,
                Err(StreamError::r#type("reader has been released")),
            );
        }

        let mut inner = self.shared.inner.lock();
        inner.disturbed = true;

        match inner.state.clone() {
            ReadableStreamState::Closed => {
                drop(inner);
                ByteReadFuture::immediate(&self.shared, Ok(ReadableStreamReadResult::done()))
            },
            ReadableStreamState::Errored(e) => {
                drop(inner);
                ByteReadFuture::immediate(&self.shared, Err(e))
            },
            ReadableStreamState::Readable => {
                // pullSteps: if this.[[queueTotalSize]] > 0, dequeue and
                // resolve immediately.
                if inner.queue_total_size > 0 {
                    let entry = inner.queue.pop_front().expect("entries while queueTotalSize > 0");
                    inner.queue_total_size -= entry.len();
                    drop(inner);

                    // Perform ! ReadableByteStreamControllerHandleQueueDrain(this).
                    handle_queue_drain(&self.shared);
                    ByteReadFuture::immediate(
                        &self.shared,
                        Ok(ReadableStreamReadResult::chunk(entry)),
                    )
                } else {
                    // If autoAllocateChunkSize is not undefined, put up a
                    // descriptor backed by a new buffer of that size.
                    inner.push_auto_allocate_descriptor();

                    let request = ReadRequest::new();
                    inner.read_requests.push_back(request.clone());
                    drop(inner);
                    byte_call_pull_if_needed(&self.shared);
                    ByteReadFuture::waiting(&self.shared, request)
                }
            },
        }
    }

    /// Drain every queued chunk in one call; see
    /// [`ReadableStreamDefaultReader::read_many`](super::ReadableStreamDefaultReader::read_many).
    /// `size` is the summed byte length of the returned chunks.
    pub fn read_many(&self) -> ByteReadManyFuture {
        if self.released {
            return ByteReadManyFuture::immediate(
                &self.shared,
                Err(StreamError::r#type("reader has been released")),
            );
        }

        let mut inner = self.shared.inner.lock();
        inner.disturbed = true;

        match inner.state.clone() {
            ReadableStreamState::Closed => {
                drop(inner);
                ByteReadManyFuture::immediate(&self.shared, Ok(ReadManyResult::done()))
            },
            ReadableStreamState::Errored(e) => {
                drop(inner);
                ByteReadManyFuture::immediate(&self.shared, Err(e))
            },
            ReadableStreamState::Readable => {
                if inner.queue_total_size > 0 {
                    let size = inner.queue_total_size;
                    let value: Vec<Bytes> = inner.queue.drain(..).collect();
                    inner.queue_total_size = 0;

                    // One resume signal for the whole batch.
                    if inner.close_requested {
                        inner.readable_stream_close();
                        drop(inner);
                        *self.shared.source.lock() = None;
                    } else {
                        drop(inner);
                        byte_call_pull_if_needed(&self.shared);
                    }

                    ByteReadManyFuture::immediate(
                        &self.shared,
                        Ok(ReadManyResult {
                            value,
                            size,
                            done: false,
                        }),
                    )
                } else {
                    // Pair the waiting request with its own auto-allocated
                    // descriptor, exactly like a plain read. Requests and
                    // default-mode descriptors stay one-to-one.
                    inner.push_auto_allocate_descriptor();

                    let request = ReadRequest::new();
                    inner.read_requests.push_back(request.clone());
                    drop(inner);
                    byte_call_pull_if_needed(&self.shared);
                    ByteReadManyFuture::waiting(&self.shared, request)
                }
            },
        }
    }

    pub fn cancel(&self, reason: Option<String>) -> CancelFuture {
        if self.released {
            return CancelFuture::Ready(Some(Err(StreamError::r#type(
                "reader has been released",
            ))));
        }
        byte_stream_cancel(&self.shared, reason)
    }

    pub fn closed(&self) -> ByteClosedFuture {
        ByteClosedFuture {
            shared: self.shared.clone(),
        }
    }

    pub fn release_lock(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        release(&self.shared);
    }
}

impl Drop for ReadableByteStreamReader {
    fn drop(&mut self) {
        self.release_lock();
    }
}

/// Shared release steps for both byte reader flavors: free the lock, fail
/// whatever was outstanding, drop any pull-into descriptors.
pub(super) fn release(shared: &Arc<ByteShared>) {
    let mut inner = shared.inner.lock();
    inner.reader = None;

    let e = StreamError::r#type("reader was released before the read settled");
    error_read_requests(&mut inner.read_requests, &e);
    error_read_requests(&mut inner.read_into_requests, &e);

    inner.pending_pull_intos.clear();
    inner.invalidate_byob_request();
}

enum ByteReadState {
    Immediate(Option<Result<ReadableStreamReadResult<Bytes>, StreamError>>),
    Waiting(ReadRequest<Bytes>),
}

/// Future returned by [`ReadableByteStreamReader::read`].
pub struct ByteReadFuture {
    shared: Arc<ByteShared>,
    state: ByteReadState,
}

impl ByteReadFuture {
    fn immediate(
        shared: &Arc<ByteShared>,
        result: Result<ReadableStreamReadResult<Bytes>, StreamError>,
    ) -> Self {
        Self {
            shared: shared.clone(),
            state: ByteReadState::Immediate(Some(result)),
        }
    }

    fn waiting(shared: &Arc<ByteShared>, request: ReadRequest<Bytes>) -> Self {
        Self {
            shared: shared.clone(),
            state: ByteReadState::Waiting(request),
        }
    }
}

impl Future for ByteReadFuture {
    type Output = Result<ReadableStreamReadResult<Bytes>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ByteReadState::Immediate(result) => {
                Poll::Ready(result.take().expect("read future polled after completion"))
            },
            ByteReadState::Waiting(request) => {
                if let Some(result) = request.take_result() {
                    return Poll::Ready(result);
                }
                byte_drive(&this.shared, cx);
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

impl Drop for ByteReadFuture {
    fn drop(&mut self) {
        if let ByteReadState::Waiting(request) = &self.state {
            request.abandon();
        }
    }
}

enum ByteReadManyState {
    Immediate(Option<Result<ReadManyResult<Bytes>, StreamError>>),
    Waiting(ReadRequest<Bytes>),
}

/// Future returned by [`ReadableByteStreamReader::read_many`].
pub struct ByteReadManyFuture {
    shared: Arc<ByteShared>,
    state: ByteReadManyState,
}

impl ByteReadManyFuture {
    fn immediate(
        shared: &Arc<ByteShared>,
        result: Result<ReadManyResult<Bytes>, StreamError>,
    ) -> Self {
        Self {
            shared: shared.clone(),
            state: ByteReadManyState::Immediate(Some(result)),
        }
    }

    fn waiting(shared: &Arc<ByteShared>, request: ReadRequest<Bytes>) -> Self {
        Self {
            shared: shared.clone(),
            state: ByteReadManyState::Waiting(request),
        }
    }

    fn finish(shared: &Arc<ByteShared>, first: Bytes) -> Result<ReadManyResult<Bytes>, StreamError> {
        let mut inner = shared.inner.lock();

        let size = first.len() + inner.queue_total_size;
        let mut value = vec![first];
        value.extend(inner.queue.drain(..));
        inner.queue_total_size = 0;

        if inner.state.is_readable() {
            if inner.close_requested {
                inner.readable_stream_close();
                drop(inner);
                *shared.source.lock() = None;
            } else {
                drop(inner);
                byte_call_pull_if_needed(shared);
            }
        }

        Ok(ReadManyResult {
            value,
            size,
            done: false,
        })
    }
}

impl Future for ByteReadManyFuture {
    type Output = Result<ReadManyResult<Bytes>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ByteReadManyState::Immediate(result) => {
                Poll::Ready(result.take().expect("read_many future polled after completion"))
            },
            ByteReadManyState::Waiting(request) => {
                let settled = match request.take_result() {
                    Some(result) => Some(result),
                    None => {
                        byte_drive(&this.shared, cx);
                        request.take_result()
                    },
                };
                match settled {
                    Some(Ok(ReadableStreamReadResult {
                        value: Some(first), ..
                    })) => Poll::Ready(ByteReadManyFuture::finish(&this.shared, first)),
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

impl Drop for ByteReadManyFuture {
    fn drop(&mut self) {
        if let ByteReadManyState::Waiting(request) = &self.state {
            request.abandon();
        }
    }
}

/// Future that settles when the byte stream closes or errors.
pub struct ByteClosedFuture {
    shared: Arc<ByteShared>,
}

impl ByteClosedFuture {
    pub(super) fn new(shared: Arc<ByteShared>) -> Self {
        Self { shared }
    }
}

impl Future for ByteClosedFuture {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        byte_drive(&this.shared, cx);

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
