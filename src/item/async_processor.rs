use log::debug;

use crate::core::{
    item::{ItemProcessor, ItemProcessorResult},
    task_executor::TaskExecutor,
};

/// Fans the items of a chunk out to a worker pool and hands the results back
/// in chunk order.
///
/// Meant for CPU-heavy transforms that are independent per item. The writer
/// still receives the chunk only once every item has been processed.
pub struct AsyncItemProcessor<'a, I, O> {
    delegate: &'a dyn ItemProcessor<I, O>,
    executor: TaskExecutor,
}

impl<'a, I, O> AsyncItemProcessor<'a, I, O> {
    pub fn new(delegate: &'a dyn ItemProcessor<I, O>, executor: TaskExecutor) -> Self {
        Self { delegate, executor }
    }
}

impl<I: Sync, O: Send> ItemProcessor<I, O> for AsyncItemProcessor<'_, I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        self.delegate.process(item)
    }

    fn process_chunk(&self, items: &[I]) -> Vec<ItemProcessorResult<O>> {
        debug!(
            "Processing {} items on {} workers",
            items.len(),
            self.executor.concurrency()
        );
        self.executor
            .map_ordered(items, |item| self.delegate.process(item))
    }
}
