/// QueuingStrategy describes how backpressure should be signalled: how large a
/// chunk counts as, and how much the queue may hold before `desired_size`
/// reports no demand.
/// https://streams.spec.whatwg.org/#qs-api
pub trait QueuingStrategy<T>: Send + 'static {
    /// The size of a single chunk, in whatever unit the strategy measures.
    fn size(&self, chunk: &T) -> usize;

    /// The queue total size at which the stream stops signalling demand.
    fn high_water_mark(&self) -> usize;
}

/// Counts every chunk as 1, the default strategy.
/// https://streams.spec.whatwg.org/#blqs-class
#[derive(Debug, Clone, Copy)]
pub struct CountQueuingStrategy {
    high_water_mark: usize,
}

impl CountQueuingStrategy {
    pub const fn new(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl Default for CountQueuingStrategy {
    fn default() -> Self {
        // If strategy["highWaterMark"] does not exist, return defaultHWM.
        Self::new(1)
    }
}

impl<T: Send + 'static> QueuingStrategy<T> for CountQueuingStrategy {
    fn size(&self, _chunk: &T) -> usize {
        1
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

/// Measures chunks by their byte length.
/// https://streams.spec.whatwg.org/#cqs-class
#[derive(Debug, Clone, Copy)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: usize,
}

impl ByteLengthQueuingStrategy {
    pub const fn new(high_water_mark: usize) -> Self {
        Self { high_water_mark }
    }
}

impl<T: AsRef<[u8]> + Send + 'static> QueuingStrategy<T> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &T) -> usize {
        chunk.as_ref().len()
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}
