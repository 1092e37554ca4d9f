use crate::error::BatchError;

/// Represents the result of reading an item from the reader.
///
/// - `Ok(Some(item))` when an item was read
/// - `Ok(None)` when the source is exhausted (end-of-sequence, not an error)
/// - `Err(BatchError)` when the underlying source failed
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Represents the result of processing an item by the processor.
///
/// `Ok(None)` means the item was filtered out and must not reach the writer.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Represents the result of writing items by the writer.
pub type ItemWriterResult = Result<(), BatchError>;

/// A trait for reading items one at a time.
///
/// Readers are pull-based and finite. Implementations use interior mutability
/// (a mutex or atomics) so that a reader can be shared by the workers of a
/// multi-threaded step.
///
/// # Example
///
/// ```
/// use chunk_batch::core::item::ItemReader;
/// use chunk_batch::item::list::ListItemReader;
///
/// let reader = ListItemReader::new(vec![1, 2, 3]);
/// reader.restart_from(1).unwrap();
///
/// assert_eq!(reader.read().unwrap(), Some(2));
/// assert_eq!(reader.read().unwrap(), Some(3));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub trait ItemReader<I>: Send + Sync {
    /// Reads the next item.
    fn read(&self) -> ItemReaderResult<I>;

    /// Positions a freshly opened reader so that the next `read` returns the
    /// item at `offset`.
    ///
    /// The default implementation discards `offset` items. Readers that can
    /// seek (pages, in-memory lists) override it.
    fn restart_from(&self, offset: usize) -> Result<(), BatchError> {
        for _ in 0..offset {
            if self.read()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// A trait for transforming one item into zero or one output item.
pub trait ItemProcessor<I, O>: Send + Sync {
    /// Processes an item.
    ///
    /// Returns `Ok(None)` to filter the item out of the chunk.
    fn process(&self, item: &I) -> ItemProcessorResult<O>;

    /// Processes every item of a chunk and returns the results in chunk order.
    ///
    /// The default runs [`ItemProcessor::process`] sequentially. Pooled
    /// implementations override it to fan the items out to worker threads.
    fn process_chunk(&self, items: &[I]) -> Vec<ItemProcessorResult<O>> {
        items.iter().map(|item| self.process(item)).collect()
    }
}

/// A trait for writing a chunk of items as one unit.
pub trait ItemWriter<O>: Send + Sync {
    /// Writes the items of one chunk.
    fn write(&self, items: &[O]) -> ItemWriterResult;

    /// Flushes any buffered data. Called once per successfully written chunk.
    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Opens the writer before the first chunk of a step.
    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Closes the writer after the last chunk of a step.
    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// A processor that passes every item through unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone + Send + Sync> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

/// An [`ItemProcessor`] backed by a closure. Built with [`processor_fn`].
pub struct FnItemProcessor<F> {
    function: F,
}

impl<I, O, F> ItemProcessor<I, O> for FnItemProcessor<F>
where
    F: Fn(&I) -> ItemProcessorResult<O> + Send + Sync,
{
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        (self.function)(item)
    }
}

/// Wraps a closure into an [`ItemProcessor`].
///
/// ```
/// use chunk_batch::core::item::{processor_fn, ItemProcessor};
///
/// let even_only = processor_fn(|id: &u32| Ok(if id % 2 == 0 { Some(*id) } else { None }));
///
/// let process = |id: u32| ItemProcessor::<u32, u32>::process(&even_only, &id).unwrap();
/// assert_eq!(process(4), Some(4));
/// assert_eq!(process(5), None);
/// ```
pub fn processor_fn<I, O, F>(function: F) -> FnItemProcessor<F>
where
    F: Fn(&I) -> ItemProcessorResult<O> + Send + Sync,
{
    FnItemProcessor { function }
}

/// An [`ItemWriter`] backed by a closure. Built with [`writer_fn`].
pub struct FnItemWriter<F> {
    function: F,
}

impl<O, F> ItemWriter<O> for FnItemWriter<F>
where
    F: Fn(&[O]) -> ItemWriterResult + Send + Sync,
{
    fn write(&self, items: &[O]) -> ItemWriterResult {
        (self.function)(items)
    }
}

/// Wraps a closure into an [`ItemWriter`].
pub fn writer_fn<O, F>(function: F) -> FnItemWriter<F>
where
    F: Fn(&[O]) -> ItemWriterResult + Send + Sync,
{
    FnItemWriter { function }
}
