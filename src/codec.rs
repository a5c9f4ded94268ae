use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::trace;

use crate::{
    error::{EfResult, Error},
    iter::{LazyIter, Source},
};

/// Writes a record stream to a destination path.
///
/// The output is a self-describing textual form, one record per line. The
/// serialized length of a single record is also exposed so that external
/// sorting can estimate run sizes by sampling.
pub trait Serializer<T>: Send + Sync {
    /// Writes all records to `path`, returning the record count.
    fn write(&self, records: &mut LazyIter<T>, path: &Path) -> EfResult<u64>;

    /// Length in bytes of one record's serialized form.
    fn encoded_len(&self, record: &T) -> usize;
}

/// Produces a lazy record stream from a path or from raw slurped contents.
pub trait Deserializer<T>: Send + Sync {
    /// Opens the file at `path` as a lazy record stream. The underlying
    /// file is closed on exhaustion, on error, and on explicit `close`.
    fn open(&self, path: &Path) -> EfResult<LazyIter<T>>;

    /// Parses raw file contents without touching the filesystem. `origin`
    /// is the path the contents were slurped from, used in error positions.
    fn parse(&self, raw: Arc<str>, origin: &Path) -> EfResult<LazyIter<T>>;
}

/// The line-level contract of the textual record format.
///
/// The first data line may carry a header of `field=value` tokens; later
/// lines carry positional values in the column order the first line
/// establishes. Decoding a later line therefore receives the first decoded
/// record as context.
pub trait LineFormat: Send + Sync + 'static {
    type Record: Clone + 'static;

    /// Lines matching the guard are skipped entirely (e.g. lines starting
    /// with `track` in genome annotation tracks).
    fn is_guard(&self, line: &str) -> bool {
        let _ = line;
        false
    }

    /// Encodes the first record of a file. May emit `field=value` pairs.
    fn encode_first(&self, record: &Self::Record) -> String;

    /// Encodes any later record: values only, in header column order.
    fn encode_rest(&self, record: &Self::Record) -> String;

    fn decode_first(&self, line: &str) -> Result<Self::Record, String>;

    fn decode_rest(&self, line: &str, first: &Self::Record) -> Result<Self::Record, String>;
}

/// [`Serializer`] and [`Deserializer`] over a [`LineFormat`].
pub struct LineCodec<F> {
    format: Arc<F>,
}

impl<F> LineCodec<F> {
    pub fn new(format: F) -> LineCodec<F> {
        LineCodec {
            format: Arc::new(format),
        }
    }
}

impl<F: LineFormat> Serializer<F::Record> for LineCodec<F> {
    fn write(&self, records: &mut LazyIter<F::Record>, path: &Path) -> EfResult<u64> {
        let mut out = BufWriter::new(File::create(path)?);
        let mut count = 0u64;
        while let Some(record) = records.try_next()? {
            let line = if count == 0 {
                self.format.encode_first(&record)
            } else {
                self.format.encode_rest(&record)
            };
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            count += 1;
        }
        out.flush()?;
        trace!(path = %path.display(), count, "wrote record stream");
        Ok(count)
    }

    fn encoded_len(&self, record: &F::Record) -> usize {
        self.format.encode_rest(record).len() + 1
    }
}

impl<F: LineFormat> Deserializer<F::Record> for LineCodec<F> {
    fn open(&self, path: &Path) -> EfResult<LazyIter<F::Record>> {
        let file = File::open(path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                error.into()
            }
        })?;
        Ok(LazyIter::from_source(LineSource {
            format: Arc::clone(&self.format),
            input: LineInput::File(BufReader::new(file)),
            path: path.to_path_buf(),
            line_no: 0,
            first: None,
        }))
    }

    fn parse(&self, raw: Arc<str>, origin: &Path) -> EfResult<LazyIter<F::Record>> {
        Ok(LazyIter::from_source(LineSource {
            format: Arc::clone(&self.format),
            input: LineInput::Raw { raw, pos: 0 },
            path: origin.to_path_buf(),
            line_no: 0,
            first: None,
        }))
    }
}

enum LineInput {
    File(BufReader<File>),
    Raw { raw: Arc<str>, pos: usize },
    Closed,
}

struct LineSource<F: LineFormat> {
    format: Arc<F>,
    input: LineInput,
    path: PathBuf,
    line_no: u64,
    first: Option<F::Record>,
}

impl<F: LineFormat> LineSource<F> {
    /// Reads the next physical line, or `None` at end of input.
    fn next_line(&mut self) -> EfResult<Option<String>> {
        match &mut self.input {
            LineInput::File(reader) => {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            LineInput::Raw { raw, pos } => {
                if *pos >= raw.len() {
                    return Ok(None);
                }
                let rest = &raw[*pos..];
                let (line, advance) = match rest.find('\n') {
                    Some(i) => (&rest[..i], i + 1),
                    None => (rest, rest.len()),
                };
                *pos += advance;
                Ok(Some(line.trim_end_matches('\r').to_string()))
            }
            LineInput::Closed => Ok(None),
        }
    }

    fn decode(&mut self, line: &str) -> EfResult<F::Record> {
        let decoded = match &self.first {
            None => self.format.decode_first(line),
            Some(first) => self.format.decode_rest(line, first),
        };
        match decoded {
            Ok(record) => {
                if self.first.is_none() {
                    self.first = Some(record.clone());
                }
                Ok(record)
            }
            Err(msg) => Err(Error::Parse {
                path: self.path.display().to_string(),
                line: self.line_no,
                msg,
            }),
        }
    }
}

impl<F: LineFormat> Source<F::Record> for LineSource<F> {
    fn pull(&mut self) -> EfResult<Option<F::Record>> {
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.close();
                    return Ok(None);
                }
                Err(error) => {
                    self.close();
                    return Err(error);
                }
            };
            self.line_no += 1;

            if line.is_empty() || self.format.is_guard(&line) {
                continue;
            }

            match self.decode(&line) {
                Ok(record) => return Ok(Some(record)),
                Err(error) => {
                    self.close();
                    return Err(error);
                }
            }
        }
    }

    fn close(&mut self) {
        self.input = LineInput::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `k=v` header on the first line, bare values afterwards.
    struct PairFormat;

    impl LineFormat for PairFormat {
        type Record = (String, i64);

        fn is_guard(&self, line: &str) -> bool {
            line.starts_with('#')
        }

        fn encode_first(&self, record: &Self::Record) -> String {
            format!("{}={}", record.0, record.1)
        }

        fn encode_rest(&self, record: &Self::Record) -> String {
            record.1.to_string()
        }

        fn decode_first(&self, line: &str) -> Result<Self::Record, String> {
            let (key, value) = line.split_once('=').ok_or("missing header")?;
            let value = value.parse().map_err(|_| format!("bad value {value:?}"))?;
            Ok((key.to_string(), value))
        }

        fn decode_rest(&self, line: &str, first: &Self::Record) -> Result<Self::Record, String> {
            let value = line.parse().map_err(|_| format!("bad value {line:?}"))?;
            Ok((first.0.clone(), value))
        }
    }

    #[test]
    fn header_establishes_column_context() {
        let codec = LineCodec::new(PairFormat);
        let raw: Arc<str> = "# guard\nscore=1\n2\n3\n".into();
        let mut it = codec.parse(raw, Path::new("mem")).unwrap();
        assert_eq!(it.next().unwrap(), ("score".into(), 1));
        assert_eq!(it.next().unwrap(), ("score".into(), 2));
        assert_eq!(it.next().unwrap(), ("score".into(), 3));
        assert!(!it.has_next().unwrap());
    }

    #[test]
    fn parse_error_carries_line_position() {
        let codec = LineCodec::new(PairFormat);
        let raw: Arc<str> = "score=1\noops\n".into();
        let mut it = codec.parse(raw, Path::new("mem")).unwrap();
        it.next().unwrap();
        match it.next() {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let codec = LineCodec::new(PairFormat);
        assert!(matches!(
            codec.open(Path::new("/definitely/not/here.bed")),
            Err(Error::FileNotFound(_))
        ));
    }
}
