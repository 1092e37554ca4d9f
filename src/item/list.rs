use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{
    BatchError,
    core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
};

/// Reads items from an in-memory list, front to back.
///
/// Safe to share between the workers of a multi-threaded step.
pub struct ListItemReader<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }

    /// Number of items not read yet.
    pub fn remaining(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T: Send> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        Ok(self.items.lock().pop_front())
    }

    fn restart_from(&self, offset: usize) -> Result<(), BatchError> {
        let mut items = self.items.lock();
        let skipped = offset.min(items.len());
        items.drain(..skipped);
        Ok(())
    }
}

/// Collects written chunks in memory.
pub struct ListItemWriter<T> {
    chunks: Mutex<Vec<Vec<T>>>,
}

impl<T> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of every chunk received, in arrival order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().iter().map(Vec::len).collect()
    }

    pub fn write_count(&self) -> usize {
        self.chunks.lock().iter().map(Vec::len).sum()
    }
}

impl<T: Clone> ListItemWriter<T> {
    /// Every item written so far, in arrival order.
    pub fn items(&self) -> Vec<T> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }
}

impl<T: Clone + Send> ItemWriter<T> for ListItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.chunks.lock().push(items.to_vec());
        Ok(())
    }
}
