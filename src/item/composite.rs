use crate::{
    BatchError,
    core::item::{ItemProcessor, ItemProcessorResult, ItemWriter, ItemWriterResult},
};

/// Runs processors one after the other, each one receiving the output of the
/// previous one.
///
/// The chain stops at the first delegate that filters the item or fails.
pub struct CompositeItemProcessor<'a, T> {
    delegates: Vec<&'a dyn ItemProcessor<T, T>>,
}

impl<'a, T> CompositeItemProcessor<'a, T> {
    pub fn new(delegates: Vec<&'a dyn ItemProcessor<T, T>>) -> Self {
        Self { delegates }
    }

    pub fn add(mut self, delegate: &'a dyn ItemProcessor<T, T>) -> Self {
        self.delegates.push(delegate);
        self
    }
}

impl<T: Clone + Send + Sync> ItemProcessor<T, T> for CompositeItemProcessor<'_, T> {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        let mut current: Option<T> = None;

        for delegate in &self.delegates {
            let input = current.as_ref().unwrap_or(item);
            match delegate.process(input)? {
                Some(output) => current = Some(output),
                None => return Ok(None),
            }
        }

        Ok(Some(current.unwrap_or_else(|| item.clone())))
    }
}

/// Two processors of different types run in sequence.
pub struct ChainedItemProcessor<'a, I, M, O> {
    first: &'a dyn ItemProcessor<I, M>,
    second: &'a dyn ItemProcessor<M, O>,
}

/// Chains `first` into `second`; a filter or error from `first` skips `second`.
pub fn chain<'a, I, M, O>(
    first: &'a dyn ItemProcessor<I, M>,
    second: &'a dyn ItemProcessor<M, O>,
) -> ChainedItemProcessor<'a, I, M, O> {
    ChainedItemProcessor { first, second }
}

impl<I, M, O> ItemProcessor<I, O> for ChainedItemProcessor<'_, I, M, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        match self.first.process(item)? {
            Some(intermediate) => self.second.process(&intermediate),
            None => Ok(None),
        }
    }
}

/// Hands every chunk to each delegate writer in declared order.
///
/// A failing delegate aborts the chunk: the delegates after it never see it.
pub struct CompositeItemWriter<'a, T> {
    delegates: Vec<&'a dyn ItemWriter<T>>,
}

impl<'a, T> CompositeItemWriter<'a, T> {
    pub fn new(delegates: Vec<&'a dyn ItemWriter<T>>) -> Self {
        Self { delegates }
    }

    pub fn add(mut self, delegate: &'a dyn ItemWriter<T>) -> Self {
        self.delegates.push(delegate);
        self
    }
}

impl<T> ItemWriter<T> for CompositeItemWriter<'_, T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.delegates
            .iter()
            .try_for_each(|delegate| delegate.write(items))
    }

    fn flush(&self) -> ItemWriterResult {
        self.delegates.iter().try_for_each(|delegate| delegate.flush())
    }

    fn open(&self) -> ItemWriterResult {
        self.delegates.iter().try_for_each(|delegate| delegate.open())
    }

    /// Closes every delegate, even after a failure, and reports the first
    /// error.
    fn close(&self) -> ItemWriterResult {
        let mut first_error: Option<BatchError> = None;
        for delegate in &self.delegates {
            if let Err(error) = delegate.close() {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
