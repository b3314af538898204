//! Sorted runs stored on file system.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::input::{ReadError, RecordReader};
use crate::record::Record;

/// Identifier of a run persisted on file system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunId {
    index: usize,
    path: PathBuf,
    len: u64,
}

impl RunId {
    /// Position of the run in the run set. Used as a merge tie-breaker.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records stored in the run.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Ordered collection of runs produced by a single sort call.
pub type RunSet = Vec<RunId>;

/// Run file error.
#[derive(Debug)]
pub enum ExternalRunError<S: Error> {
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization or deserialization error.
    SerializationError(S),
}

impl<S: Error> From<io::Error> for ExternalRunError<S> {
    fn from(err: io::Error) -> Self {
        ExternalRunError::IO(err)
    }
}

impl<S: Error + 'static> Error for ExternalRunError<S> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            ExternalRunError::IO(err) => err,
            ExternalRunError::SerializationError(err) => err,
        })
    }
}

impl<S: Error> fmt::Display for ExternalRunError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ExternalRunError::IO(err) => write!(f, "run I/O operation failed: {}", err),
            ExternalRunError::SerializationError(err) => write!(f, "run data malformed: {}", err),
        }
    }
}

/// External run interface. Provides methods for persisting a sorted run on file system and reading it back
/// one record at a time. An opened run is a forward-only cursor over its records.
pub trait ExternalRun<T>: Sized + Iterator<Item = Result<T, Self::DeserializationError>> {
    /// Run file extension.
    const EXTENSION: &'static str;

    type SerializationError: Error + Send + Sync + 'static;
    type DeserializationError: Error + Send + Sync + 'static;

    /// Persists sorted items as the `index`-th run inside `dir`.
    /// Fails if a file with the same identifier already exists.
    fn persist(
        dir: &Path,
        index: usize,
        items: impl IntoIterator<Item = T>,
        buf_size: Option<usize>,
    ) -> Result<RunId, ExternalRunError<Self::SerializationError>> {
        let path = dir.join(format!("run-{:06}.{}", index, Self::EXTENSION));
        let run_file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;

        let mut run_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, run_file),
            None => io::BufWriter::new(run_file),
        };

        let len = Self::dump(&mut run_writer, items).map_err(ExternalRunError::SerializationError)?;
        run_writer.flush()?;

        return Ok(RunId { index, path, len });
    }

    /// Opens a persisted run for sequential reading.
    fn open(run: &RunId, buf_size: Option<usize>) -> io::Result<Self> {
        let run_file = fs::File::open(run.path())?;
        let file_len = run_file.metadata()?.len();

        let run_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, run_file),
            None => io::BufReader::new(run_file),
        };

        return Ok(Self::new(run_reader.take(file_len)));
    }

    /// Creates an instance of an external run.
    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self;

    /// Dumps items to an external file. Returns the number of items written.
    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<u64, Self::SerializationError>;

    /// Tells a failed read of the run file apart from malformed run data.
    fn read_error(err: Self::DeserializationError) -> ExternalRunError<Self::DeserializationError>;
}

/// Text external run implementation. Stores one record per line.
pub struct TextRun<T> {
    records: RecordReader<io::Take<io::BufReader<fs::File>>, T>,
}

impl<T: Record> ExternalRun<T> for TextRun<T> {
    const EXTENSION: &'static str = "txt";

    type SerializationError = io::Error;
    type DeserializationError = ReadError;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        TextRun {
            records: RecordReader::new(reader),
        }
    }

    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<u64, Self::SerializationError> {
        let mut len = 0;
        for item in items {
            writeln!(run_writer, "{}", item)?;
            len += 1;
        }

        return Ok(len);
    }

    fn read_error(err: ReadError) -> ExternalRunError<ReadError> {
        match err {
            ReadError::IO(err) => ExternalRunError::IO(err),
            err => ExternalRunError::SerializationError(err),
        }
    }
}

impl<T: Record> Iterator for TextRun<T> {
    type Item = Result<T, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

/// RMP (Rust MessagePack) external run implementation.
/// It uses MessagePack as a data serialization format.
/// For more information see https://msgpack.org/.
pub struct RmpRun<T> {
    reader: io::Take<io::BufReader<fs::File>>,

    item_type: PhantomData<T>,
}

impl<T> ExternalRun<T> for RmpRun<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    const EXTENSION: &'static str = "rmp";

    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        RmpRun {
            reader,
            item_type: PhantomData,
        }
    }

    fn dump(
        mut run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<u64, Self::SerializationError> {
        let mut len = 0;
        for item in items.into_iter() {
            rmp_serde::encode::write(&mut run_writer, &item)?;
            len += 1;
        }

        return Ok(len);
    }

    fn read_error(err: rmp_serde::decode::Error) -> ExternalRunError<rmp_serde::decode::Error> {
        use rmp_serde::decode::Error::{InvalidDataRead, InvalidMarkerRead};

        // a run cut short is malformed data, any other read failure comes from the file system
        match err {
            InvalidMarkerRead(err) | InvalidDataRead(err) if err.kind() != io::ErrorKind::UnexpectedEof => {
                ExternalRunError::IO(err)
            }
            err => ExternalRunError::SerializationError(err),
        }
    }
}

impl<T> Iterator for RmpRun<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type Item = Result<T, rmp_serde::decode::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            None
        } else {
            Some(rmp_serde::decode::from_read(&mut self.reader))
        }
    }
}
