#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Chunk Batch

 A chunk-oriented batch execution engine: bounded read, transform and write
 jobs run in fixed-size chunks, each chunk being one commit unit, with skip
 and retry fault tolerance and partitioned parallel steps.

 ## Core Concepts

- **Job:** the whole batch process, a flow of steps, decisions and splits launched with immutable `JobParameters`.
- **Step:** one independent phase of a job, either chunk oriented or a single repeatable `Tasklet`.
- **ItemReader:** pulls the input of a step one item at a time, `Ok(None)` meaning the input is exhausted.
- **ItemProcessor:** transforms one item into zero or one output item, `Ok(None)` filtering it out.
- **ItemWriter:** receives the output of a step one chunk at a time.
- **Partitioner:** splits the id domain of a step into disjoint ranges, each one run by a worker thread.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables the delimited `FlatFileItemWriter`                    |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available item implementations                    |
| cli           | Builds the `chunk-batch` launcher binary (with `full`)        |

 ## Getting Started

```rust
use chunk_batch::{
    BatchError,
    core::{
        item::processor_fn,
        job::{Job, JobBuilder},
        parameters::{CHUNK_SIZE, DEFAULT_CHUNK_SIZE, JobParameters},
        step::{ExitStatus, StepBuilder},
    },
    error::ErrorKind,
    item::list::{ListItemReader, ListItemWriter},
};

fn main() -> Result<(), BatchError> {
    let parameters = JobParameters::builder().add(CHUNK_SIZE, "4").build();
    let chunk_size = parameters.get_usize_or(CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;

    let reader = ListItemReader::new((1..=20).collect::<Vec<u32>>());
    let processor = processor_fn(|id: &u32| match *id {
        13 => Err(BatchError::Validation(format!("unlucky id {id}"))),
        even if even % 2 == 0 => Ok(Some(format!("{even} String Batch"))),
        _ => Ok(None),
    });
    let writer = ListItemWriter::new();

    let step = StepBuilder::new("chunkBaseStep")
        .chunk::<u32, String>(chunk_size)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .skip(ErrorKind::Validation)
        .skip_limit(1)
        .build()?;

    let job = JobBuilder::new().name("chunkProcessJob").start(&step).build()?;
    let execution = job.run(parameters)?;

    assert_eq!(execution.status, ExitStatus::Completed);
    assert_eq!(writer.write_count(), 10);
    assert_eq!(execution.skip_count(), 1);
    assert_eq!(writer.chunk_sizes(), vec![2, 2, 2, 2, 2]);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Reusable readers, processors and writers
pub mod item;

/// Task-style steps
pub mod tasklet;
