//! Mock write target standing in for `std::fs::File`.
use mockall::mock;

use std::io::{self, Write};

mock! {
    pub File {}
    impl Write for File {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
        fn flush(&mut self) -> io::Result<()>;
    }
}

/// A target whose every write fails with `kind`.
pub fn failing_file(kind: io::ErrorKind) -> MockFile {
    let mut file = MockFile::default();
    file.expect_write()
        .returning(move |_buf| Err(io::Error::from(kind)));
    file.expect_flush().returning(|| Ok(()));
    file
}
