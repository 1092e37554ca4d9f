use std::fmt::Debug;

use log::info;

use crate::{BatchError, core::item::ItemWriter};

/// Logs every item of a chunk at info level.
///
/// Typically the last delegate of a composite writer, after the writer that
/// persists the chunk.
#[derive(Default)]
pub struct LoggerWriter {
    label: Option<String>,
}

impl LoggerWriter {
    pub fn new(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
        }
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        match &self.label {
            Some(label) => items
                .iter()
                .for_each(|item| info!("{}: {:?}", label, item)),
            None => items.iter().for_each(|item| info!("Record:{:?}", item)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_never_fails_the_chunk() {
        let writer = LoggerWriter::new("level-up");
        assert!(writer.write(&["ada", "grace"]).is_ok());
        assert!(ItemWriter::<u8>::write(&LoggerWriter::default(), &[]).is_ok());
    }
}
