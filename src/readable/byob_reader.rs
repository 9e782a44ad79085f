use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;

use super::{
    byte_controller::{
        byte_call_pull_if_needed, byte_controller_error, byte_drive, byte_stream_cancel,
        handle_queue_drain, ByteInner, ByteShared, PullIntoDescriptor, ReaderKind,
    },
    byte_reader::{release, ByteClosedFuture},
    stream::ReadableStreamState,
    CancelFuture, ReadRequest, ReadableStreamReadResult,
};
use crate::error::StreamError;

/// A caller-owned buffer region handed to [`ReadableStreamBYOBReader::read_into`].
///
/// `element_size` plays the role of the view's element type: reads only
/// complete on whole-element boundaries, and partially assembled elements
/// stay buffered until the remaining bytes arrive.
pub struct BufferView {
    pub(super) buffer: Vec<u8>,
    pub(super) byte_offset: usize,
    pub(super) byte_length: usize,
    pub(super) element_size: usize,
}

impl BufferView {
    /// A view over the whole buffer with single-byte elements.
    pub fn new(buffer: Vec<u8>) -> Result<Self, StreamError> {
        let byte_length = buffer.len();
        Self::with_layout(buffer, 0, byte_length, 1)
    }

    pub fn with_layout(
        buffer: Vec<u8>,
        byte_offset: usize,
        byte_length: usize,
        element_size: usize,
    ) -> Result<Self, StreamError> {
        if element_size == 0 {
            return Err(StreamError::range("elementSize must be greater than zero"));
        }
        // If view.[[ByteLength]] is 0, throw a TypeError.
        if byte_length == 0 {
            return Err(StreamError::r#type("view must have a non-zero byteLength"));
        }
        if byte_length % element_size != 0 {
            return Err(StreamError::range(
                "byteLength must be a multiple of elementSize",
            ));
        }
        if byte_offset
            .checked_add(byte_length)
            .map_or(true, |end| end > buffer.len())
        {
            return Err(StreamError::range("view does not fit within its buffer"));
        }
        Ok(Self {
            buffer,
            byte_offset,
            byte_length,
            element_size,
        })
    }
}

/// The filled counterpart of a [`BufferView`], returned once a read settles.
/// Owns the original allocation, so the buffer round-trips back to the
/// caller even for empty end-of-stream reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledView {
    buffer: Vec<u8>,
    byte_offset: usize,
    byte_length: usize,
}

impl FilledView {
    pub(super) fn new(buffer: Vec<u8>, byte_offset: usize, byte_length: usize) -> Self {
        Self {
            buffer,
            byte_offset,
            byte_length,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.byte_offset..self.byte_offset + self.byte_length]
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    /// Reclaim the backing buffer, e.g. to issue the next `read_into`.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bring-your-own-buffer reader over a [`ReadableByteStream`](super::ReadableByteStream).
/// https://streams.spec.whatwg.org/#byob-reader-class
pub struct ReadableStreamBYOBReader {
    shared: Arc<ByteShared>,
    released: bool,
}

impl ReadableStreamBYOBReader {
    pub(super) fn new(shared: Arc<ByteShared>) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// https://streams.spec.whatwg.org/#byob-reader-read
    ///
    /// Resolves once at least one whole element has been written into the
    /// view, the stream closes, or the stream errors. The view's buffer
    /// travels with the request and comes back in the result.
    pub fn read_into(&self, view: BufferView) -> ReadIntoFuture {
        if self.released {
            return ReadIntoFuture::immediate(
                &self.shared,
                Err(StreamError::r#type("reader has been released")),
            );
        }

        let mut inner = self.shared.inner.lock();
        inner.disturbed = true;

        // If stream.[[state]] is "errored", perform readIntoRequest’s error
        // steps given stream.[[storedError]].
        if let ReadableStreamState::Errored(e) = inner.state.clone() {
            drop(inner);
            return ReadIntoFuture::immediate(&self.shared, Err(e));
        }

        // Let pullIntoDescriptor be a new pull-into descriptor.
        let mut desc = PullIntoDescriptor {
            buffer: view.buffer,
            byte_offset: view.byte_offset,
            byte_length: view.byte_length,
            bytes_filled: 0,
            element_size: view.element_size,
            reader_type: ReaderKind::Byob,
        };

        // Reads dropped mid-wait must not hold the queue hostage.
        inner.discard_abandoned_read_intos();

        // If controller.[[pendingPullIntos]] is not empty, append
        // pullIntoDescriptor and wait behind the queue of buffers.
        if !inner.pending_pull_intos.is_empty() {
            inner.pending_pull_intos.push_back(desc);
            let request = ReadRequest::new();
            inner.read_into_requests.push_back(request.clone());
            return ReadIntoFuture::waiting(&self.shared, request);
        }

        // If stream.[[state]] is "closed", resolve with an empty view.
        if matches!(inner.state, ReadableStreamState::Closed) {
            let empty = FilledView::new(desc.buffer, desc.byte_offset, 0);
            drop(inner);
            return ReadIntoFuture::immediate(
                &self.shared,
                Ok(ReadableStreamReadResult {
                    value: Some(empty),
                    done: true,
                }),
            );
        }

        if inner.queue_total_size > 0 {
            // If ! ReadableByteStreamControllerFillPullIntoDescriptorFromQueue(...)
            // is true, resolve immediately with the filled view.
            if inner.fill_pull_into_descriptor_from_queue(&mut desc) {
                let filled = FilledView::new(desc.buffer, desc.byte_offset, desc.bytes_filled);
                drop(inner);
                handle_queue_drain(&self.shared);
                return ReadIntoFuture::immediate(
                    &self.shared,
                    Ok(ReadableStreamReadResult {
                        value: Some(filled),
                        done: false,
                    }),
                );
            }

            // If controller.[[closeRequested]] is true: the queue can never
            // complete another element, so the stream errors.
            if inner.close_requested {
                let e = StreamError::r#type(
                    "insufficient bytes remain in the draining stream to fill the view",
                );
                drop(inner);
                byte_controller_error(&self.shared, e.clone());
                return ReadIntoFuture::immediate(&self.shared, Err(e));
            }
        }

        // Append pullIntoDescriptor, add the read-into request and perform
        // ! ReadableByteStreamControllerCallPullIfNeeded(controller).
        inner.pending_pull_intos.push_back(desc);
        let request = ReadRequest::new();
        inner.read_into_requests.push_back(request.clone());
        drop(inner);
        byte_call_pull_if_needed(&self.shared);
        ReadIntoFuture::waiting(&self.shared, request)
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
        ByteClosedFuture::new(self.shared.clone())
    }

    pub fn release_lock(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        release(&self.shared);
    }
}

impl Drop for ReadableStreamBYOBReader {
    fn drop(&mut self) {
        self.release_lock();
    }
}

enum ReadIntoState {
    Immediate(Option<Result<ReadableStreamReadResult<FilledView>, StreamError>>),
    Waiting(ReadRequest<FilledView>),
}

/// Future returned by [`ReadableStreamBYOBReader::read_into`].
pub struct ReadIntoFuture {
    shared: Arc<ByteShared>,
    state: ReadIntoState,
}

impl ReadIntoFuture {
    fn immediate(
        shared: &Arc<ByteShared>,
        result: Result<ReadableStreamReadResult<FilledView>, StreamError>,
    ) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadIntoState::Immediate(Some(result)),
        }
    }

    fn waiting(shared: &Arc<ByteShared>, request: ReadRequest<FilledView>) -> Self {
        Self {
            shared: shared.clone(),
            state: ReadIntoState::Waiting(request),
        }
    }
}

impl Future for ReadIntoFuture {
    type Output = Result<ReadableStreamReadResult<FilledView>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReadIntoState::Immediate(result) => {
                Poll::Ready(result.take().expect("read_into future polled after completion"))
            },
            ReadIntoState::Waiting(request) => {
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

impl Drop for ReadIntoFuture {
    fn drop(&mut self) {
        if let ReadIntoState::Waiting(request) = &self.state {
            request.abandon();
        }
    }
}

/// Write-side handle to the buffer at the head of the pull-into queue.
/// https://streams.spec.whatwg.org/#rs-byob-request-class
///
/// Handles are invalidated when their descriptor commits, is shifted, or the
/// stream tears down; every method then reports a `Type` error.
pub struct ReadableStreamBYOBRequest {
    shared: Arc<ByteShared>,
    gen: u64,
}

impl ReadableStreamBYOBRequest {
    pub(super) fn new(shared: Arc<ByteShared>, gen: u64) -> Self {
        Self { shared, gen }
    }

    fn check(&self, inner: &ByteInner) -> Result<(), StreamError> {
        if inner.byob_request_gen == Some(self.gen) {
            Ok(())
        } else {
            Err(StreamError::r#type("this BYOB request has been invalidated"))
        }
    }

    /// Bytes still unfilled in the underlying view.
    pub fn remaining(&self) -> Result<usize, StreamError> {
        let inner = self.shared.inner.lock();
        self.check(&inner)?;
        let head = inner
            .pending_pull_intos
            .front()
            .expect("valid BYOB request implies a pending descriptor");
        Ok(head.byte_length - head.bytes_filled)
    }

    /// Run `f` over the unfilled region of the view. Pair with
    /// [`respond`](Self::respond) to publish however many bytes were written.
    pub fn with_view<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, StreamError> {
        let mut inner = self.shared.inner.lock();
        self.check(&inner)?;
        let head = inner
            .pending_pull_intos
            .front_mut()
            .expect("valid BYOB request implies a pending descriptor");
        let start = head.byte_offset + head.bytes_filled;
        let end = head.byte_offset + head.byte_length;
        Ok(f(&mut head.buffer[start..end]))
    }

    /// https://streams.spec.whatwg.org/#rs-byob-request-respond
    pub fn respond(&self, bytes_written: usize) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            self.check(&inner)?;
            respond_internal(&mut inner, bytes_written)?;
        }
        // Perform ! ReadableByteStreamControllerCallPullIfNeeded(controller).
        byte_call_pull_if_needed(&self.shared);
        Ok(())
    }

    /// Copy `data` into the view and respond in one step.
    pub fn respond_with(&self, data: &[u8]) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            self.check(&inner)?;
            let head = inner
                .pending_pull_intos
                .front_mut()
                .expect("valid BYOB request implies a pending descriptor");
            if data.len() > head.byte_length - head.bytes_filled {
                return Err(StreamError::range(
                    "data does not fit in the remaining view capacity",
                ));
            }
            let start = head.byte_offset + head.bytes_filled;
            head.buffer[start..start + data.len()].copy_from_slice(data);
            respond_internal(&mut inner, data.len())?;
        }
        byte_call_pull_if_needed(&self.shared);
        Ok(())
    }
}

/// https://streams.spec.whatwg.org/#readable-byte-stream-controller-respond-internal
fn respond_internal(inner: &mut ByteInner, bytes_written: usize) -> Result<(), StreamError> {
    match inner.state {
        // Closing and erroring both flush or discard every outstanding
        // descriptor and invalidate the vended request, so `check` already
        // rejects any handle by the time the state is not "readable".
        ReadableStreamState::Closed | ReadableStreamState::Errored(_) => {
            Err(StreamError::r#type(
                "cannot respond to a BYOB request on a stream that is not readable",
            ))
        },
        ReadableStreamState::Readable => {
            // If bytesWritten is 0, throw a TypeError.
            if bytes_written == 0 {
                return Err(StreamError::r#type(
                    "bytesWritten must be greater than 0 while the stream is readable",
                ));
            }

            let head = inner
                .pending_pull_intos
                .front_mut()
                .expect("valid BYOB request implies a pending descriptor");
            // If bytesFilled + bytesWritten > byteLength, throw a RangeError.
            if head.bytes_filled + bytes_written > head.byte_length {
                return Err(StreamError::range(
                    "bytesWritten exceeds the remaining length of the view",
                ));
            }
            head.bytes_filled += bytes_written;
            let (bytes_filled, element_size) = (head.bytes_filled, head.element_size);
            inner.invalidate_byob_request();

            // If bytesFilled < elementSize, keep accumulating.
            if bytes_filled < element_size {
                return Ok(());
            }

            let mut desc = inner.shift_pending_pull_into();
            // Re-queue the trailing partial element so the next descriptor
            // picks it up.
            let remainder = desc.bytes_filled % desc.element_size;
            if remainder > 0 {
                let end = desc.byte_offset + desc.bytes_filled;
                let tail = Bytes::copy_from_slice(&desc.buffer[end - remainder..end]);
                desc.bytes_filled -= remainder;
                inner.enqueue_chunk_to_queue(tail);
            }

            inner.commit_pull_into_descriptor(desc);
            inner.process_pull_into_descriptors_using_queue();
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::BufferView;
    use crate::{
        ReadableByteStream, ReadableByteStreamController, SourceResult, StreamError,
        UnderlyingByteSource,
    };

    #[derive(Default)]
    struct RemoteByteSource {
        controller: Arc<Mutex<Option<ReadableByteStreamController>>>,
    }

    impl UnderlyingByteSource for RemoteByteSource {
        fn start(&mut self, controller: ReadableByteStreamController) -> SourceResult {
            *self.controller.lock() = Some(controller);
            SourceResult::ok()
        }
    }

    fn remote() -> (
        ReadableByteStream,
        Arc<Mutex<Option<ReadableByteStreamController>>>,
    ) {
        let source = RemoteByteSource::default();
        let slot = source.controller.clone();
        let stream = ReadableByteStream::new(source, 0).unwrap();
        (stream, slot)
    }

    fn handle(
        slot: &Arc<Mutex<Option<ReadableByteStreamController>>>,
    ) -> ReadableByteStreamController {
        slot.lock().clone().expect("controller captured in start")
    }

    #[tokio::test]
    async fn buffer_view_layout_is_validated() {
        assert!(matches!(
            BufferView::new(Vec::new()),
            Err(StreamError::Type(_))
        ));
        assert!(matches!(
            BufferView::with_layout(vec![0; 8], 0, 8, 0),
            Err(StreamError::Range(_))
        ));
        assert!(matches!(
            BufferView::with_layout(vec![0; 8], 0, 6, 4),
            Err(StreamError::Range(_))
        ));
        assert!(matches!(
            BufferView::with_layout(vec![0; 8], 4, 8, 1),
            Err(StreamError::Range(_))
        ));
    }

    #[tokio::test]
    async fn read_into_fills_from_queued_bytes() {
        let (stream, slot) = remote();
        handle(&slot).enqueue(Bytes::from_static(b"hello")).unwrap();

        let reader = stream.get_byob_reader().unwrap();
        let result = reader
            .read_into(BufferView::new(vec![0; 3]).unwrap())
            .await
            .unwrap();
        assert!(!result.done);
        assert_eq!(result.value.as_ref().unwrap().as_slice(), b"hel");

        // The unread remainder stays queued for the next read.
        let result = reader
            .read_into(BufferView::new(vec![0; 8]).unwrap())
            .await
            .unwrap();
        assert_eq!(result.value.unwrap().as_slice(), b"lo");
    }

    #[tokio::test]
    async fn pending_read_filled_through_byob_request() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 10]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let controller = handle(&slot);
        let request = controller.byob_request().expect("descriptor outstanding");
        assert_eq!(request.remaining().unwrap(), 10);

        request.with_view(|view| view[..4].copy_from_slice(b"data")).unwrap();
        request.respond(4).unwrap();

        let result = read.await.unwrap();
        assert!(!result.done);
        assert_eq!(result.value.unwrap().as_slice(), b"data");
    }

    #[tokio::test]
    async fn close_commits_partial_fill_as_short_read() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        // Element size 4: two responded bytes are not yet a whole element.
        let view = BufferView::with_layout(vec![0; 8], 0, 8, 4).unwrap();
        let read = reader.read_into(view);
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let controller = handle(&slot);
        controller.byob_request().unwrap().respond_with(b"hi").unwrap();
        assert!(futures::poll!(read.as_mut()).is_pending());

        // Closing delivers the two buffered bytes instead of discarding them.
        controller.close().unwrap();
        let result = read.await.unwrap();
        assert!(!result.done);
        assert_eq!(result.value.unwrap().as_slice(), b"hi");

        // The stream is now cleanly closed.
        let end = reader
            .read_into(BufferView::new(vec![0; 4]).unwrap())
            .await
            .unwrap();
        assert!(end.done);
        assert!(end.value.unwrap().is_empty());
        reader.closed().await.unwrap();
    }

    #[tokio::test]
    async fn partial_enqueue_then_close_yields_short_read() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        // Ask for 10 bytes, supply only 4, then close.
        let read = reader.read_into(BufferView::new(vec![0; 10]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let controller = handle(&slot);
        controller.enqueue(Bytes::from_static(b"1234")).unwrap();
        controller.close().unwrap();

        let result = read.await.unwrap();
        assert!(!result.done);
        assert_eq!(result.value.unwrap().as_slice(), b"1234");
        reader.closed().await.unwrap();
    }

    #[tokio::test]
    async fn respond_validates_its_argument() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let request = handle(&slot).byob_request().unwrap();
        assert!(matches!(request.respond(0), Err(StreamError::Type(_))));
        assert!(matches!(request.respond(5), Err(StreamError::Range(_))));
        assert!(matches!(
            request.respond_with(b"toolong"),
            Err(StreamError::Range(_))
        ));

        request.respond_with(b"ok").unwrap();
        assert_eq!(read.await.unwrap().value.unwrap().as_slice(), b"ok");
    }

    #[tokio::test]
    async fn byob_request_is_invalidated_by_commit() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let controller = handle(&slot);
        let first = controller.byob_request().unwrap();
        // Until something changes, the getter represents the same request.
        let second = controller.byob_request().unwrap();
        second.respond_with(b"full").unwrap();

        assert!(matches!(first.remaining(), Err(StreamError::Type(_))));
        assert!(matches!(first.respond(1), Err(StreamError::Type(_))));
        // No descriptor is outstanding anymore.
        assert!(controller.byob_request().is_none());

        read.await.unwrap();
    }

    #[tokio::test]
    async fn respond_after_close_is_rejected() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        let controller = handle(&slot);
        let request = controller.byob_request().unwrap();

        // Close flushes the zero-filled descriptor as a done read and
        // invalidates the request; responding afterwards fails.
        controller.close().unwrap();
        let result = read.await.unwrap();
        assert!(result.done);
        assert!(result.value.unwrap().is_empty());

        assert!(matches!(request.respond(0), Err(StreamError::Type(_))));
        assert!(matches!(request.respond(1), Err(StreamError::Type(_))));
    }

    #[tokio::test]
    async fn dropped_read_into_does_not_block_later_reads() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let mut first = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        assert!(futures::poll!(&mut first).is_pending());
        drop(first);

        let second = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());

        // Bytes land in the live read's buffer, not the abandoned one.
        handle(&slot).enqueue(Bytes::from_static(b"live")).unwrap();
        assert_eq!(second.await.unwrap().value.unwrap().as_slice(), b"live");
    }

    #[tokio::test]
    async fn element_split_across_enqueues_is_assembled() {
        let (stream, slot) = remote();
        let controller = handle(&slot);
        controller.enqueue(Bytes::from_static(b"abcdef")).unwrap();

        let reader = stream.get_byob_reader().unwrap();
        // Six queued bytes fill exactly one 4-byte element.
        let result = reader
            .read_into(BufferView::with_layout(vec![0; 8], 0, 8, 4).unwrap())
            .await
            .unwrap();
        assert_eq!(result.value.unwrap().as_slice(), b"abcd");

        // The leftover two bytes wait for two more before committing.
        let read = reader.read_into(BufferView::with_layout(vec![0; 4], 0, 4, 4).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        controller.enqueue(Bytes::from_static(b"gh")).unwrap();
        assert_eq!(read.await.unwrap().value.unwrap().as_slice(), b"efgh");
    }

    #[tokio::test]
    async fn queued_reads_commit_in_order_from_one_enqueue() {
        let (stream, slot) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let first = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        let second = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(first, second);
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());

        handle(&slot).enqueue(Bytes::from_static(b"12345678")).unwrap();

        assert_eq!(first.await.unwrap().value.unwrap().as_slice(), b"1234");
        assert_eq!(second.await.unwrap().value.unwrap().as_slice(), b"5678");
    }

    #[tokio::test]
    async fn draining_stream_errors_unsatisfiable_read() {
        let (stream, slot) = remote();
        let controller = handle(&slot);
        controller.enqueue(Bytes::from_static(b"xy")).unwrap();
        controller.close().unwrap();

        let reader = stream.get_byob_reader().unwrap();
        // Two queued bytes can never complete a 4-byte element.
        let err = reader
            .read_into(BufferView::with_layout(vec![0; 4], 0, 4, 4).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Type(_)));
        assert_eq!(reader.closed().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn cancel_returns_buffer_with_empty_done_view() {
        let (stream, _) = remote();
        let reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 10]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        reader.cancel(None).await.unwrap();
        let result = read.await.unwrap();
        assert!(result.done);
        let view = result.value.unwrap();
        assert!(view.is_empty());
        assert_eq!(view.into_buffer().len(), 10);
    }

    #[tokio::test]
    async fn release_lock_rejects_pending_read_intos() {
        let (stream, _) = remote();
        let mut reader = stream.get_byob_reader().unwrap();

        let read = reader.read_into(BufferView::new(vec![0; 4]).unwrap());
        futures::pin_mut!(read);
        assert!(futures::poll!(read.as_mut()).is_pending());

        reader.release_lock();
        assert!(matches!(read.await, Err(StreamError::Type(_))));
        assert!(!stream.is_locked());
    }
}
