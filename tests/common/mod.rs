#![allow(dead_code)]

mod mocks;

#[allow(unused_imports)]
pub use mocks::{MockFile, failing_file};

use chunk_batch::core::{item::ItemReader, partition::IdRange, step::StepExecution};
use chunk_batch::item::list::ListItemReader;
use chunk_batch::BatchError;

/// Reader over every id of the partition stored in the execution context.
pub fn partition_reader<'r>(
    execution: &StepExecution,
) -> Result<Box<dyn ItemReader<i64> + 'r>, BatchError> {
    let range = IdRange::from_context(&execution.execution_context)?;
    let ids = if range.is_empty() {
        Vec::new()
    } else {
        (range.min_id..=range.max_id).collect()
    };
    Ok(Box::new(ListItemReader::new(ids)))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
