use std::{cmp, collections::VecDeque, future::Future, sync::Arc, task::Context};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tracing::trace;

use super::{
    byob_reader::{FilledView, ReadableStreamBYOBReader, ReadableStreamBYOBRequest},
    byte_reader::ReadableByteStreamReader,
    close_read_requests, error_read_requests, fanout_waker,
    source::{SourceResult, UnderlyingByteSource},
    stream::ReadableStreamState,
    CancelFuture, InFlight, ReadRequest, WakerSet,
};
use crate::error::StreamError;

/// Which flavor of reader currently holds the stream's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReaderKind {
    Default,
    Byob,
}

/// https://streams.spec.whatwg.org/#pull-into-descriptor
///
/// One outstanding consumer buffer being filled from the byte queue. The
/// buffer is owned here until the descriptor commits, at which point it is
/// handed back through the paired read(-into) request.
pub(super) struct PullIntoDescriptor {
    pub(super) buffer: Vec<u8>,
    pub(super) byte_offset: usize,
    pub(super) byte_length: usize,
    pub(super) bytes_filled: usize,
    pub(super) element_size: usize,
    pub(super) reader_type: ReaderKind,
}

pub(super) struct ByteShared {
    pub(super) inner: Mutex<ByteInner>,
    pub(super) source: Mutex<Option<Box<dyn UnderlyingByteSource>>>,
}

pub(super) struct ByteInner {
    pub(super) state: ReadableStreamState,
    pub(super) disturbed: bool,
    pub(super) reader: Option<ReaderKind>,
    /// Byte queue: flat chunks, with the total byte count tracked alongside.
    pub(super) queue: VecDeque<Bytes>,
    pub(super) queue_total_size: usize,
    pub(super) close_requested: bool,
    pub(super) started: bool,
    pub(super) pulling: bool,
    pub(super) pull_again: bool,
    pub(super) strategy_hwm: usize,
    pub(super) auto_allocate_chunk_size: Option<usize>,
    pub(super) pending_pull_intos: VecDeque<PullIntoDescriptor>,
    /// Generation of the BYOB request currently vended for the head
    /// descriptor, if any. Bumping past it invalidates outstanding handles.
    pub(super) byob_request_gen: Option<u64>,
    pub(super) next_gen: u64,
    pub(super) read_requests: VecDeque<ReadRequest<Bytes>>,
    pub(super) read_into_requests: VecDeque<ReadRequest<FilledView>>,
    pub(super) in_flight: Option<InFlight>,
    pub(super) wakers: Arc<WakerSet>,
}

impl ByteInner {
    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-get-desired-size
    pub(super) fn desired_size(&self) -> Option<isize> {
        match self.state {
            ReadableStreamState::Errored(_) => None,
            ReadableStreamState::Closed => Some(0),
            ReadableStreamState::Readable => {
                Some(self.strategy_hwm as isize - self.queue_total_size as isize)
            },
        }
    }

    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-should-call-pull
    fn should_call_pull(&self) -> bool {
        if !self.state.is_readable() || self.close_requested {
            return false;
        }
        if !self.started {
            return false;
        }
        // If ! ReadableStreamHasDefaultReader(stream) is true and
        // ! ReadableStreamGetNumReadRequests(stream) > 0, return true.
        if self.reader == Some(ReaderKind::Default) && !self.read_requests.is_empty() {
            return true;
        }
        // If ! ReadableStreamHasBYOBReader(stream) is true and
        // ! ReadableStreamGetNumReadIntoRequests(stream) > 0, return true.
        if self.reader == Some(ReaderKind::Byob) && !self.read_into_requests.is_empty() {
            return true;
        }
        self.desired_size().expect("desiredSize of readable stream") > 0
    }

    pub(super) fn enqueue_chunk_to_queue(&mut self, chunk: Bytes) {
        self.queue_total_size += chunk.len();
        self.queue.push_back(chunk);
    }

    /// autoAllocateChunkSize: back the next default-mode read request with a
    /// freshly allocated descriptor the source can fill through the BYOB
    /// request. Every waiting default-mode request gets exactly one.
    pub(super) fn push_auto_allocate_descriptor(&mut self) {
        if let Some(size) = self.auto_allocate_chunk_size {
            self.pending_pull_intos.push_back(PullIntoDescriptor {
                buffer: vec![0; size],
                byte_offset: 0,
                byte_length: size,
                bytes_filled: 0,
                element_size: 1,
                reader_type: ReaderKind::Default,
            });
        }
    }

    /// Bytes already copied into a discarded descriptor go back to the front
    /// of the queue, so the next descriptor in line picks them up.
    fn requeue_filled_prefix(&mut self, desc: PullIntoDescriptor) {
        if desc.bytes_filled > 0 {
            let filled = Bytes::copy_from_slice(
                &desc.buffer[desc.byte_offset..desc.byte_offset + desc.bytes_filled],
            );
            self.queue_total_size += filled.len();
            self.queue.push_front(filled);
        }
    }

    /// Drops leading default-mode read requests whose consumer future is
    /// gone, along with their auto-allocated descriptors.
    pub(super) fn discard_abandoned_reads(&mut self) {
        while self
            .read_requests
            .front()
            .is_some_and(|request| request.is_abandoned())
        {
            self.read_requests.pop_front();
            if !self.pending_pull_intos.is_empty() {
                let desc = self.shift_pending_pull_into();
                self.requeue_filled_prefix(desc);
            }
        }
    }

    /// Drops leading read-into requests whose consumer future is gone,
    /// along with their descriptors, so queued bytes reach the next live
    /// read instead of being copied into a dead buffer.
    pub(super) fn discard_abandoned_read_intos(&mut self) {
        while self
            .read_into_requests
            .front()
            .is_some_and(|request| request.is_abandoned())
        {
            self.read_into_requests.pop_front();
            let desc = self.shift_pending_pull_into();
            self.requeue_filled_prefix(desc);
        }
    }

    pub(super) fn invalidate_byob_request(&mut self) {
        self.byob_request_gen = None;
    }

    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-shift-pending-pull-into
    pub(super) fn shift_pending_pull_into(&mut self) -> PullIntoDescriptor {
        self.invalidate_byob_request();
        self.pending_pull_intos
            .pop_front()
            .expect("shiftPendingPullInto with no pending descriptors")
    }

    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-fill-pull-into-descriptor-from-queue
    ///
    /// Copies queued bytes into the descriptor, element-size aligned. Returns
    /// true once the descriptor holds at least one element beyond its current
    /// aligned fill, i.e. it is ready to commit.
    pub(super) fn fill_pull_into_descriptor_from_queue(
        &mut self,
        desc: &mut PullIntoDescriptor,
    ) -> bool {
        // Let maxBytesToCopy be min(queueTotalSize, byteLength − bytesFilled).
        let max_bytes_to_copy = cmp::min(
            self.queue_total_size,
            desc.byte_length - desc.bytes_filled,
        );
        let max_bytes_filled = desc.bytes_filled + max_bytes_to_copy;
        let max_aligned_bytes = max_bytes_filled - (max_bytes_filled % desc.element_size);
        let current_aligned_bytes = desc.bytes_filled - (desc.bytes_filled % desc.element_size);

        let mut total_bytes_to_copy_remaining = max_bytes_to_copy;
        let mut ready = false;
        if max_aligned_bytes > current_aligned_bytes {
            total_bytes_to_copy_remaining = max_aligned_bytes - desc.bytes_filled;
            ready = true;
        }

        while total_bytes_to_copy_remaining > 0 {
            let head = self
                .queue
                .front_mut()
                .expect("queue entries while queueTotalSize > 0");
            let bytes_to_copy = cmp::min(total_bytes_to_copy_remaining, head.len());

            let dest_start = desc.byte_offset + desc.bytes_filled;
            desc.buffer[dest_start..dest_start + bytes_to_copy]
                .copy_from_slice(&head[..bytes_to_copy]);

            if head.len() == bytes_to_copy {
                self.queue.pop_front();
            } else {
                head.advance(bytes_to_copy);
            }
            self.queue_total_size -= bytes_to_copy;
            desc.bytes_filled += bytes_to_copy;
            total_bytes_to_copy_remaining -= bytes_to_copy;
        }

        if !ready {
            debug_assert_eq!(self.queue_total_size, 0);
            debug_assert!(desc.bytes_filled < desc.element_size + current_aligned_bytes);
        }
        ready
    }

    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-commit-pull-into-descriptor
    pub(super) fn commit_pull_into_descriptor(&mut self, desc: PullIntoDescriptor) {
        let done = matches!(self.state, ReadableStreamState::Closed);
        if done {
            debug_assert_eq!(desc.bytes_filled, 0);
        }

        match desc.reader_type {
            ReaderKind::Default => {
                let request = self
                    .read_requests
                    .pop_front()
                    .expect("read request paired with default-type descriptor");
                if done {
                    request.close_steps();
                } else {
                    // The descriptor's backing allocation becomes the chunk,
                    // without a copy.
                    let chunk = Bytes::from(desc.buffer)
                        .slice(desc.byte_offset..desc.byte_offset + desc.bytes_filled);
                    request.chunk_steps(chunk);
                }
            },
            ReaderKind::Byob => {
                let request = self
                    .read_into_requests
                    .pop_front()
                    .expect("read-into request paired with BYOB descriptor");
                let view = FilledView::new(desc.buffer, desc.byte_offset, desc.bytes_filled);
                request.fulfill(Ok(super::ReadableStreamReadResult {
                    value: Some(view),
                    done,
                }));
            },
        }
    }

    /// https://streams.spec.whatwg.org/#readable-byte-stream-controller-process-pull-into-descriptors-using-queue
    pub(super) fn process_pull_into_descriptors_using_queue(&mut self) {
        debug_assert!(!self.close_requested);
        loop {
            self.discard_abandoned_read_intos();
            self.discard_abandoned_reads();
            if self.queue_total_size == 0 || self.pending_pull_intos.is_empty() {
                return;
            }
            let mut desc = self
                .pending_pull_intos
                .pop_front()
                .expect("descriptor checked non-empty");
            if self.fill_pull_into_descriptor_from_queue(&mut desc) {
                self.invalidate_byob_request();
                self.commit_pull_into_descriptor(desc);
            } else {
                self.pending_pull_intos.push_front(desc);
                return;
            }
        }
    }

    /// https://streams.spec.whatwg.org/#readable-stream-close
    pub(super) fn readable_stream_close(&mut self) {
        self.state = ReadableStreamState::Closed;
        self.in_flight = None;

        close_read_requests(&mut self.read_requests);

        // Hand outstanding BYOB buffers back as empty, done views.
        while let Some(request) = self.read_into_requests.pop_front() {
            match self.pending_pull_intos.pop_front() {
                Some(desc) => {
                    let view = FilledView::new(desc.buffer, desc.byte_offset, 0);
                    request.fulfill(Ok(super::ReadableStreamReadResult {
                        value: Some(view),
                        done: true,
                    }));
                },
                None => request.close_steps(),
            }
        }

        self.pending_pull_intos.clear();
        self.invalidate_byob_request();
        self.wakers.wake_all();
    }
}

/// https://streams.spec.whatwg.org/#readable-byte-stream-controller-error
pub(super) fn byte_controller_error(shared: &Arc<ByteShared>, e: StreamError) {
    {
        let mut inner = shared.inner.lock();
        if !inner.state.is_readable() {
            return;
        }

        trace!(error = %e, "erroring byte stream");

        // Perform ! ReadableByteStreamControllerClearPendingPullIntos(controller).
        inner.pending_pull_intos.clear();
        inner.invalidate_byob_request();

        // Perform ! ResetQueue(controller).
        inner.queue.clear();
        inner.queue_total_size = 0;
        inner.in_flight = None;

        // Perform ! ReadableStreamError(stream, e).
        inner.state = ReadableStreamState::Errored(e.clone());
        error_read_requests(&mut inner.read_requests, &e);
        error_read_requests(&mut inner.read_into_requests, &e);
        inner.wakers.wake_all();
    }

    *shared.source.lock() = None;
}

/// https://streams.spec.whatwg.org/#readable-byte-stream-controller-handle-queue-drain
pub(super) fn handle_queue_drain(shared: &Arc<ByteShared>) {
    let mut inner = shared.inner.lock();
    if !inner.state.is_readable() {
        return;
    }

    // If controller.[[queueTotalSize]] is 0 and controller.[[closeRequested]]
    // is true, perform ! ReadableStreamClose(stream).
    if inner.queue_total_size == 0 && inner.close_requested {
        inner.readable_stream_close();
        drop(inner);
        *shared.source.lock() = None;
    } else {
        // Otherwise, perform ! ReadableByteStreamControllerCallPullIfNeeded(controller).
        drop(inner);
        byte_call_pull_if_needed(shared);
    }
}

/// https://streams.spec.whatwg.org/#readable-byte-stream-controller-call-pull-if-needed
pub(super) fn byte_call_pull_if_needed(shared: &Arc<ByteShared>) {
    loop {
        {
            let mut inner = shared.inner.lock();
            if !inner.should_call_pull() {
                return;
            }
            if inner.pulling {
                trace!("pull in flight, coalescing");
                inner.pull_again = true;
                return;
            }
            inner.pulling = true;
        }

        trace!("invoking pull");
        let mut source = shared.source.lock().take();
        let result = match source.as_mut() {
            Some(source) => source.pull(ReadableByteStreamController::new(shared.clone())),
            None => SourceResult::ok(),
        };
        if shared.inner.lock().state.is_readable() {
            *shared.source.lock() = source;
        }

        match result {
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
            SourceResult::Ready(Err(e)) => {
                byte_controller_error(shared, e);
                return;
            },
            SourceResult::Pending(fut) => {
                let mut inner = shared.inner.lock();
                if !inner.state.is_readable() {
                    return;
                }
                inner.in_flight = Some(InFlight::Pull(fut));
                inner.wakers.wake_all();
                return;
            },
        }
    }
}

/// Polls the in-flight start/pull future on behalf of whichever consumer is
/// being polled. Polling goes through the stream's waker set so readiness
/// reaches every parked consumer, not only the last driver.
pub(super) fn byte_drive(shared: &Arc<ByteShared>, cx: &mut Context<'_>) {
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
                std::task::Poll::Ready(Ok(())) => {
                    shared.inner.lock().started = true;
                    byte_call_pull_if_needed(shared);
                },
                std::task::Poll::Ready(Err(e)) => {
                    byte_controller_error(shared, e);
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
                        byte_call_pull_if_needed(shared);
                    }
                },
                std::task::Poll::Ready(Err(e)) => {
                    byte_controller_error(shared, e);
                    return;
                },
            },
        }
    }
}

/// https://streams.spec.whatwg.org/#readable-stream-cancel
pub(super) fn byte_stream_cancel(shared: &Arc<ByteShared>, reason: Option<String>) -> CancelFuture {
    {
        let mut inner = shared.inner.lock();
        inner.disturbed = true;

        match inner.state {
            ReadableStreamState::Closed => return CancelFuture::Ready(Some(Ok(()))),
            ReadableStreamState::Errored(ref e) => {
                return CancelFuture::Ready(Some(Err(e.clone())));
            },
            ReadableStreamState::Readable => {},
        }

        // cancelSteps: if pendingPullIntos is not empty, set the first
        // descriptor's bytes filled to 0.
        if let Some(head) = inner.pending_pull_intos.front_mut() {
            head.bytes_filled = 0;
        }

        // Perform ! ResetQueue(controller).
        inner.queue.clear();
        inner.queue_total_size = 0;

        // Perform ! ReadableStreamClose(stream).
        inner.readable_stream_close();
    }

    match shared.source.lock().take() {
        None => CancelFuture::Ready(Some(Ok(()))),
        Some(mut source) => match source.cancel(reason) {
            SourceResult::Ready(result) => CancelFuture::Ready(Some(result)),
            SourceResult::Pending(fut) => CancelFuture::Pending(fut),
        },
    }
}

/// A readable stream of byte chunks, with zero-copy handoff into
/// consumer-provided buffers.
/// https://streams.spec.whatwg.org/#readablebytestreamcontroller
pub struct ReadableByteStream {
    pub(super) shared: Arc<ByteShared>,
}

impl ReadableByteStream {
    /// Construction runs the source's `start`; pulls begin once it settles
    /// and demand exists. `high_water_mark` is in bytes.
    pub fn new(
        source: impl UnderlyingByteSource,
        high_water_mark: usize,
    ) -> Result<Self, StreamError> {
        let auto_allocate_chunk_size = source.auto_allocate_chunk_size();
        // If autoAllocateChunkSize is 0, throw a TypeError.
        if auto_allocate_chunk_size == Some(0) {
            return Err(StreamError::r#type(
                "autoAllocateChunkSize must be greater than zero",
            ));
        }

        let shared = Arc::new(ByteShared {
            inner: Mutex::new(ByteInner {
                state: ReadableStreamState::Readable,
                disturbed: false,
                reader: None,
                queue: VecDeque::new(),
                queue_total_size: 0,
                close_requested: false,
                started: false,
                pulling: false,
                pull_again: false,
                strategy_hwm: high_water_mark,
                auto_allocate_chunk_size,
                pending_pull_intos: VecDeque::new(),
                byob_request_gen: None,
                next_gen: 0,
                read_requests: VecDeque::new(),
                read_into_requests: VecDeque::new(),
                in_flight: None,
                wakers: WakerSet::new(),
            }),
            source: Mutex::new(Some(Box::new(source))),
        });

        let mut source = shared.source.lock().take();
        let result = match source.as_mut() {
            Some(source) => source.start(ReadableByteStreamController::new(shared.clone())),
            None => SourceResult::ok(),
        };
        if shared.inner.lock().state.is_readable() {
            *shared.source.lock() = source;
        }

        match result {
            SourceResult::Ready(Ok(())) => {
                shared.inner.lock().started = true;
                byte_call_pull_if_needed(&shared);
            },
            SourceResult::Ready(Err(e)) => byte_controller_error(&shared, e),
            SourceResult::Pending(fut) => {
                shared.inner.lock().in_flight = Some(InFlight::Start(fut));
            },
        }

        Ok(Self { shared })
    }

    pub fn is_locked(&self) -> bool {
        self.shared.inner.lock().reader.is_some()
    }

    pub fn is_disturbed(&self) -> bool {
        self.shared.inner.lock().disturbed
    }

    pub fn state(&self) -> ReadableStreamState {
        self.shared.inner.lock().state.clone()
    }

    /// Acquire a default (chunk at a time) reader.
    pub fn get_reader(&self) -> Result<ReadableByteStreamReader, StreamError> {
        let mut inner = self.shared.inner.lock();
        if inner.reader.is_some() {
            return Err(StreamError::r#type("ReadableStream is locked to a reader"));
        }
        inner.reader = Some(ReaderKind::Default);
        Ok(ReadableByteStreamReader::new(self.shared.clone()))
    }

    /// Acquire a bring-your-own-buffer reader.
    /// https://streams.spec.whatwg.org/#byob-reader-class
    pub fn get_byob_reader(&self) -> Result<ReadableStreamBYOBReader, StreamError> {
        let mut inner = self.shared.inner.lock();
        if inner.reader.is_some() {
            return Err(StreamError::r#type("ReadableStream is locked to a reader"));
        }
        inner.reader = Some(ReaderKind::Byob);
        Ok(ReadableStreamBYOBReader::new(self.shared.clone()))
    }

    pub fn cancel(&self, reason: Option<String>) -> CancelFuture {
        if self.shared.inner.lock().reader.is_some() {
            return CancelFuture::Ready(Some(Err(StreamError::r#type(
                "cannot cancel a stream locked to a reader",
            ))));
        }
        byte_stream_cancel(&self.shared, reason)
    }
}

/// Handle through which an underlying byte source feeds the stream.
/// https://streams.spec.whatwg.org/#rbs-controller-class
#[derive(Clone)]
pub struct ReadableByteStreamController {
    shared: Arc<ByteShared>,
}

impl ReadableByteStreamController {
    pub(super) fn new(shared: Arc<ByteShared>) -> Self {
        Self { shared }
    }

    /// https://streams.spec.whatwg.org/#rbs-controller-enqueue
    pub fn enqueue(&self, chunk: Bytes) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();

            // If chunk.[[ByteLength]] is 0, throw a TypeError.
            if chunk.is_empty() {
                return Err(StreamError::r#type("chunk must have a non-zero byteLength"));
            }
            // If this.[[closeRequested]] is true, throw a TypeError.
            if inner.close_requested {
                return Err(StreamError::r#type("stream is draining, chunk rejected"));
            }
            // If stream.[[state]] is not "readable", throw a TypeError.
            if !inner.state.is_readable() {
                return Err(StreamError::r#type(
                    "cannot enqueue to a stream that is not readable",
                ));
            }

            match inner.reader {
                Some(ReaderKind::Default) => {
                    inner.discard_abandoned_reads();
                    if let Some(request) = inner.read_requests.pop_front() {
                        // The request's auto-allocated descriptor, if any, is
                        // superseded by the chunk itself.
                        if !inner.pending_pull_intos.is_empty() {
                            let _ = inner.shift_pending_pull_into();
                        }
                        request.chunk_steps(chunk);
                    } else {
                        inner.enqueue_chunk_to_queue(chunk);
                    }
                },
                Some(ReaderKind::Byob) => {
                    // Perform ! ReadableByteStreamControllerEnqueueChunkToQueue(...),
                    // then ! ReadableByteStreamControllerProcessPullIntoDescriptorsUsingQueue(controller).
                    inner.enqueue_chunk_to_queue(chunk);
                    inner.process_pull_into_descriptors_using_queue();
                },
                None => inner.enqueue_chunk_to_queue(chunk),
            }
        }

        byte_call_pull_if_needed(&self.shared);
        Ok(())
    }

    /// https://streams.spec.whatwg.org/#rbs-controller-close
    ///
    /// With chunks still queued, the close is recorded and happens once the
    /// queue drains. A partially filled outstanding BYOB descriptor is
    /// committed as a short read before the stream closes.
    pub fn close(&self) -> Result<(), StreamError> {
        let mut inner = self.shared.inner.lock();

        if inner.close_requested {
            return Err(StreamError::r#type(
                "cannot close an already closing stream",
            ));
        }
        if !inner.state.is_readable() {
            return Err(StreamError::r#type(
                "cannot close a stream that is not readable",
            ));
        }

        trace!("close requested");

        // If controller.[[queueTotalSize]] > 0, set controller.[[closeRequested]]
        // to true and return.
        if inner.queue_total_size > 0 {
            inner.close_requested = true;
            return Ok(());
        }

        // A consumer buffer with bytes already written gets those bytes now,
        // as a not-done read, rather than being thrown away.
        if inner
            .pending_pull_intos
            .front()
            .is_some_and(|head| head.bytes_filled > 0)
        {
            let desc = inner.shift_pending_pull_into();
            inner.commit_pull_into_descriptor(desc);
        }

        inner.readable_stream_close();
        drop(inner);
        *self.shared.source.lock() = None;
        Ok(())
    }

    /// https://streams.spec.whatwg.org/#rbs-controller-error
    pub fn error(&self, e: impl Into<StreamError>) -> Result<(), StreamError> {
        if !self.shared.inner.lock().state.is_readable() {
            return Err(StreamError::r#type(
                "cannot error a stream that is not readable",
            ));
        }
        byte_controller_error(&self.shared, e.into());
        Ok(())
    }

    /// https://streams.spec.whatwg.org/#rbs-controller-desired-size
    pub fn desired_size(&self) -> Option<isize> {
        self.shared.inner.lock().desired_size()
    }

    /// The request for the buffer at the head of the pull-into queue, if any.
    /// The same handle is represented until it is invalidated by a respond,
    /// commit or teardown.
    /// https://streams.spec.whatwg.org/#rbs-controller-byob-request
    pub fn byob_request(&self) -> Option<ReadableStreamBYOBRequest> {
        let mut inner = self.shared.inner.lock();
        if inner.byob_request_gen.is_none() && !inner.pending_pull_intos.is_empty() {
            inner.next_gen += 1;
            inner.byob_request_gen = Some(inner.next_gen);
        }
        inner
            .byob_request_gen
            .map(|gen| ReadableStreamBYOBRequest::new(self.shared.clone(), gen))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use bytes::Bytes;
    use parking_lot::Mutex;

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
    async fn empty_chunks_are_rejected() {
        let (_stream, slot) = remote();
        assert!(matches!(
            handle(&slot).enqueue(Bytes::new()),
            Err(StreamError::Type(_))
        ));
    }

    #[tokio::test]
    async fn enqueue_after_close_requested_is_rejected() {
        let (_stream, slot) = remote();
        let controller = handle(&slot);
        controller.enqueue(Bytes::from_static(b"abc")).unwrap();
        controller.close().unwrap();

        assert!(matches!(
            controller.enqueue(Bytes::from_static(b"more")),
            Err(StreamError::Type(_))
        ));
        assert!(matches!(controller.close(), Err(StreamError::Type(_))));
    }

    #[tokio::test]
    async fn desired_size_tracks_queue_in_bytes() {
        let source = Arc::new(Mutex::new(None));
        let stream = ReadableByteStream::new(
            RemoteByteSource {
                controller: source.clone(),
            },
            16,
        )
        .unwrap();
        let controller = source.lock().clone().unwrap();

        assert_eq!(controller.desired_size(), Some(16));
        controller.enqueue(Bytes::from_static(b"0123456789")).unwrap();
        assert_eq!(controller.desired_size(), Some(6));
        controller.enqueue(Bytes::from_static(b"0123456789")).unwrap();
        assert_eq!(controller.desired_size(), Some(-4));

        controller.error("done with this").unwrap();
        assert_eq!(controller.desired_size(), None);
        drop(stream);
    }

    #[tokio::test]
    async fn start_error_puts_stream_in_errored_state() {
        struct FailingStart;
        impl UnderlyingByteSource for FailingStart {
            fn start(&mut self, _controller: ReadableByteStreamController) -> SourceResult {
                SourceResult::err("no backing file")
            }
        }

        let stream = ReadableByteStream::new(FailingStart, 0).unwrap();
        let reader = stream.get_reader().unwrap();
        assert_eq!(
            reader.read().await.unwrap_err(),
            StreamError::from("no backing file")
        );
    }

    #[tokio::test]
    async fn pull_is_not_reentered_while_pending() {
        struct SlowSource {
            pulls: Arc<AtomicUsize>,
            gate: Option<futures::channel::oneshot::Receiver<()>>,
        }

        impl UnderlyingByteSource for SlowSource {
            fn pull(&mut self, controller: ReadableByteStreamController) -> SourceResult {
                self.pulls.fetch_add(1, Ordering::SeqCst);
                match self.gate.take() {
                    Some(gate) => SourceResult::pending(async move {
                        gate.await.ok();
                        controller.enqueue(Bytes::from_static(b"data"))?;
                        Ok(())
                    }),
                    None => SourceResult::ok(),
                }
            }
        }

        let pulls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = futures::channel::oneshot::channel();
        let stream = ReadableByteStream::new(
            SlowSource {
                pulls: pulls.clone(),
                gate: Some(rx),
            },
            0,
        )
        .unwrap();
        let reader = stream.get_reader().unwrap();

        let first = reader.read();
        let second = reader.read();
        futures::pin_mut!(first, second);
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        let result = first.await.unwrap();
        assert_eq!(result.value, Some(Bytes::from_static(b"data")));
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_auto_allocate_chunk_size_is_rejected() {
        struct ZeroAlloc;
        impl UnderlyingByteSource for ZeroAlloc {
            fn auto_allocate_chunk_size(&self) -> Option<usize> {
                Some(0)
            }
        }

        assert!(matches!(
            ReadableByteStream::new(ZeroAlloc, 0),
            Err(StreamError::Type(_))
        ));
    }
}
