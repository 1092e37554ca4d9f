/// Runs a transform on a worker pool, one item per task.
pub mod async_processor;

/// Processors and writers that delegate to an ordered list of components.
pub mod composite;

pub mod duplicate;

/// In-memory reader and writer.
pub mod list;

/// Page-at-a-time and row-at-a-time readers.
pub mod paging;

pub mod retry;

#[cfg(feature = "csv")]
/// Delimited flat file writer with header and footer lines.
pub mod file;

#[cfg(feature = "logger")]
/// A writer that logs every item, useful for debugging purposes.
pub mod logger;
