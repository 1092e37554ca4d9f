use std::{collections::VecDeque, fmt, str::FromStr};

use log::debug;
use parking_lot::Mutex;

use crate::{
    BatchError,
    core::{
        item::{ItemReader, ItemReaderResult},
        parameters::JobParameters,
    },
};

/// Parameter selecting the source strategy of a job.
pub const READER: &str = "reader";

/// How a job pulls rows from its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    /// Fetch a page of rows, hand them out, fetch the next page.
    Paging,
    /// Stream one row at a time from an open cursor.
    Cursor,
}

impl ReaderKind {
    /// Reads the `reader` parameter, defaulting to [`ReaderKind::Paging`].
    pub fn from_parameters(parameters: &JobParameters) -> Result<Self, BatchError> {
        parameters
            .get_non_empty(READER)
            .map_or(Ok(ReaderKind::Paging), str::parse::<ReaderKind>)
    }
}

impl FromStr for ReaderKind {
    type Err = BatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paging" => Ok(ReaderKind::Paging),
            "cursor" => Ok(ReaderKind::Cursor),
            other => Err(BatchError::Configuration(format!(
                "unknown reader kind '{other}', expected 'paging' or 'cursor'"
            ))),
        }
    }
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderKind::Paging => f.write_str("paging"),
            ReaderKind::Cursor => f.write_str("cursor"),
        }
    }
}

type PageFn<'a, T> = Box<dyn Fn(usize, usize) -> Result<Vec<T>, BatchError> + Send + Sync + 'a>;

struct PageState<T> {
    next_offset: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
}

/// Reads rows page by page through a fetch function `(offset, limit) -> rows`.
///
/// A page shorter than the page size marks the end of the data.
///
/// ```
/// use chunk_batch::core::item::ItemReader;
/// use chunk_batch::item::paging::PagingItemReader;
///
/// let rows: Vec<u32> = (0..5).collect();
/// let reader = PagingItemReader::new(2, |offset, limit| {
///     Ok(rows.iter().skip(offset).take(limit).copied().collect())
/// })
/// .unwrap();
///
/// let mut read = Vec::new();
/// while let Some(row) = reader.read().unwrap() {
///     read.push(row);
/// }
/// assert_eq!(read, rows);
/// ```
pub struct PagingItemReader<'a, T> {
    fetch: PageFn<'a, T>,
    page_size: usize,
    state: Mutex<PageState<T>>,
}

impl<'a, T> PagingItemReader<'a, T> {
    pub fn new<F>(page_size: usize, fetch: F) -> Result<Self, BatchError>
    where
        F: Fn(usize, usize) -> Result<Vec<T>, BatchError> + Send + Sync + 'a,
    {
        if page_size == 0 {
            return Err(BatchError::Configuration(
                "page size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            fetch: Box::new(fetch),
            page_size,
            state: Mutex::new(PageState {
                next_offset: 0,
                buffer: VecDeque::new(),
                exhausted: false,
            }),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl<T: Send> ItemReader<T> for PagingItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut state = self.state.lock();

        if state.buffer.is_empty() && !state.exhausted {
            let page = (self.fetch)(state.next_offset, self.page_size)?;
            debug!(
                "Fetched page at offset {} with {} rows",
                state.next_offset,
                page.len()
            );
            state.exhausted = page.len() < self.page_size;
            state.next_offset += page.len();
            state.buffer.extend(page);
        }

        Ok(state.buffer.pop_front())
    }

    fn restart_from(&self, offset: usize) -> Result<(), BatchError> {
        let mut state = self.state.lock();
        state.next_offset = offset;
        state.buffer.clear();
        state.exhausted = false;
        Ok(())
    }
}

type Cursor<'a, T> = Box<dyn Iterator<Item = Result<T, BatchError>> + Send + 'a>;

/// Streams rows one at a time from an open cursor.
pub struct CursorItemReader<'a, T> {
    cursor: Mutex<Cursor<'a, T>>,
}

impl<'a, T> CursorItemReader<'a, T> {
    pub fn new<C>(cursor: C) -> Self
    where
        C: IntoIterator<Item = Result<T, BatchError>>,
        C::IntoIter: Send + 'a,
    {
        Self {
            cursor: Mutex::new(Box::new(cursor.into_iter())),
        }
    }

    /// A cursor over rows that cannot fail.
    pub fn from_rows<C>(rows: C) -> Self
    where
        C: IntoIterator<Item = T>,
        C::IntoIter: Send + 'a,
        T: 'a,
    {
        Self::new(rows.into_iter().map(Ok))
    }
}

impl<T> ItemReader<T> for CursorItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        self.cursor.lock().next().transpose()
    }
}
