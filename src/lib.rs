//! Readable streams in the WHATWG model: a default flavor carrying arbitrary
//! chunks under a queuing strategy, and a byte flavor with BYOB reads that
//! fill caller-provided buffers. Both support `read_many`, which drains the
//! whole queue in one call and signals the source once per batch.

mod error;
mod queuing_strategy;
mod readable;
mod utils;

pub use error::StreamError;
pub use queuing_strategy::{ByteLengthQueuingStrategy, CountQueuingStrategy, QueuingStrategy};
pub use readable::{
    BufferView, ByteClosedFuture, ByteReadFuture, ByteReadManyFuture, CancelFuture, ClosedFuture,
    FilledView, ReadFuture, ReadIntoFuture, ReadManyFuture, ReadManyResult, ReadableByteStream,
    ReadableByteStreamController, ReadableByteStreamReader, ReadableStream,
    ReadableStreamBYOBReader, ReadableStreamBYOBRequest, ReadableStreamDefaultController,
    ReadableStreamDefaultReader, ReadableStreamReadResult, ReadableStreamState, SourceResult,
    UnderlyingByteSource, UnderlyingSource,
};
