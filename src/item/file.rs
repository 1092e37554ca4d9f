use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    mem,
    path::Path,
};

use chrono::{Datelike, NaiveDate};
use csv::{Writer, WriterBuilder};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

/// Builds the `{year}_{month}_{label}.csv` name of a monthly output file from
/// a `YYYY-MM` date. The month is not zero-padded.
///
/// ```
/// use chunk_batch::item::file::dated_file_name;
///
/// assert_eq!(dated_file_name("2024-03", "statistics").unwrap(), "2024_3_statistics.csv");
/// assert!(dated_file_name("March 2024", "statistics").is_err());
/// ```
pub fn dated_file_name(date: &str, label: &str) -> Result<String, BatchError> {
    let first_day = NaiveDate::parse_from_str(&format!("{date}-01"), "%Y-%m-%d")
        .map_err(|error| BatchError::Configuration(format!("invalid date '{date}': {error}")))?;

    Ok(format!("{}_{}_{label}.csv", first_day.year(), first_day.month()))
}

enum Target<W: Write> {
    Records(Writer<W>),
    Closed(W),
    Poisoned,
}

/// Writes items as delimited lines, one line per item, with the columns
/// selected and ordered by field name.
///
/// Items are converted with `serde_json`, so any `Serialize` struct works.
/// Strings are written verbatim, `null` as an empty column and every other
/// value in its JSON form. A literal header line is written when the target
/// is opened and the footer line when the writer is closed.
pub struct FlatFileItemWriter<W: Write> {
    target: Mutex<Target<W>>,
    fields: Vec<String>,
    footer: Option<String>,
}

impl<W: Write> FlatFileItemWriter<W> {
    fn record<T: Serialize>(&self, item: &T) -> Result<Vec<String>, BatchError> {
        let value = serde_json::to_value(item)
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;

        self.fields
            .iter()
            .map(|field| match value.get(field) {
                Some(Value::String(text)) => Ok(text.clone()),
                Some(Value::Null) => Ok(String::new()),
                Some(other) => Ok(other.to_string()),
                None => Err(BatchError::ItemWriter(format!("item has no field '{field}'"))),
            })
            .collect()
    }

    /// Closes the writer and hands back the underlying target.
    pub fn into_inner(self) -> Result<W, BatchError> {
        self.finish()?;
        match self.target.into_inner() {
            Target::Closed(inner) => Ok(inner),
            _ => Err(BatchError::ItemWriter("writer is in a failed state".to_string())),
        }
    }

    fn finish(&self) -> ItemWriterResult {
        let mut target = self.target.lock();

        let records = match mem::replace(&mut *target, Target::Poisoned) {
            Target::Records(records) => records,
            Target::Closed(inner) => {
                *target = Target::Closed(inner);
                return Ok(());
            }
            Target::Poisoned => {
                return Err(BatchError::ItemWriter("writer is in a failed state".to_string()));
            }
        };

        let mut inner = records
            .into_inner()
            .map_err(|error| BatchError::ItemWriter(error.error().to_string()))?;
        if let Some(footer) = &self.footer {
            writeln!(inner, "{footer}").map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }
        inner
            .flush()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;

        *target = Target::Closed(inner);
        Ok(())
    }
}

impl<W, T> ItemWriter<T> for FlatFileItemWriter<W>
where
    W: Write + Send,
    T: Serialize,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let records = items
            .iter()
            .map(|item| self.record(item))
            .collect::<Result<Vec<_>, _>>()?;

        let mut target = self.target.lock();
        let Target::Records(writer) = &mut *target else {
            return Err(BatchError::ItemWriter("writer is closed".to_string()));
        };

        for record in &records {
            writer
                .write_record(record)
                .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }
        debug!("Wrote {} lines", records.len());
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        match &mut *self.target.lock() {
            Target::Records(writer) => writer
                .flush()
                .map_err(|error| BatchError::ItemWriter(error.to_string())),
            _ => Ok(()),
        }
    }

    /// Writes the footer and flushes the target. Closing twice is a no-op.
    fn close(&self) -> ItemWriterResult {
        self.finish()
    }
}

/// Configures a [`FlatFileItemWriter`].
///
/// ```
/// use chunk_batch::core::item::ItemWriter;
/// use chunk_batch::item::file::FlatFileItemWriterBuilder;
///
/// #[derive(serde::Serialize)]
/// struct Level {
///     name: String,
///     level: u8,
/// }
///
/// let writer = FlatFileItemWriterBuilder::new()
///     .fields(&["level", "name"])
///     .header("level,name")
///     .footer("# end")
///     .from_writer(Vec::new())
///     .unwrap();
///
/// writer.write(&[Level { name: "ada".to_string(), level: 3 }]).unwrap();
///
/// let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
/// assert_eq!(text, "level,name\n3,ada\n# end\n");
/// ```
pub struct FlatFileItemWriterBuilder {
    fields: Vec<String>,
    header: Option<String>,
    footer: Option<String>,
    delimiter: u8,
    append: bool,
}

impl Default for FlatFileItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatFileItemWriterBuilder {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            header: None,
            footer: None,
            delimiter: b',',
            append: false,
        }
    }

    /// Field names, in column order.
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    pub fn header(mut self, header: &str) -> Self {
        self.header = Some(header.to_string());
        self
    }

    pub fn footer(mut self, footer: &str) -> Self {
        self.footer = Some(footer.to_string());
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Appends to an existing file instead of truncating it. The header is
    /// then only written when the file is empty.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Opens `path`, creating it and its parent directories when missing.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<FlatFileItemWriter<File>, BatchError> {
        let path = path.as_ref();
        let io_error = |error: std::io::Error| {
            BatchError::Configuration(format!("cannot open {}: {}", path.display(), error))
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(path)
            .map_err(io_error)?;
        let empty = file.metadata().map_err(io_error)?.len() == 0;

        info!("Writing to {} (append: {})", path.display(), self.append);
        self.build(file, empty)
    }

    /// Wraps any `Write` target, which is treated as empty.
    pub fn from_writer<W: Write>(self, writer: W) -> Result<FlatFileItemWriter<W>, BatchError> {
        self.build(writer, true)
    }

    fn build<W: Write>(self, mut inner: W, empty: bool) -> Result<FlatFileItemWriter<W>, BatchError> {
        if self.fields.is_empty() {
            return Err(BatchError::Configuration(
                "a flat file writer needs at least one field".to_string(),
            ));
        }

        if let Some(header) = self.header.as_ref().filter(|_| empty) {
            writeln!(inner, "{header}").map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }

        let records = WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(false)
            .from_writer(inner);

        Ok(FlatFileItemWriter {
            target: Mutex::new(Target::Records(records)),
            fields: self.fields,
            footer: self.footer,
        })
    }
}
