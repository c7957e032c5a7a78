//! CSV result stores, one file per record kind.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collaborators::{BoxError, RecordKind, ResultStore, StoreOpener};
use crate::run_id::RunId;

/// Opens [`CsvStore`]s under `<records_dir>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct CsvStoreOpener {
    records_dir: PathBuf,
}

impl CsvStoreOpener {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
        }
    }

    /// Directory holding the records of `run_id`.
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.records_dir.join(run_id.as_str())
    }
}

impl StoreOpener for CsvStoreOpener {
    fn open(&self, kind: RecordKind, run_id: &RunId) -> Result<Box<dyn ResultStore>, BoxError> {
        let dir = std::path::absolute(self.run_dir(run_id))?;
        fs::create_dir_all(&dir)?;
        Ok(Box::new(CsvStore::open(&dir, kind)?))
    }
}

/// Records of one kind written to `<KIND>.csv`.
#[derive(Debug)]
pub struct CsvStore {
    kind: RecordKind,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvStore {
    /// Opens (creating if needed) the file for `kind` in `dir`.
    ///
    /// Existing content is kept until [`init`](ResultStore::init).
    pub fn open(dir: &Path, kind: RecordKind) -> std::io::Result<Self> {
        let path = dir.join(format!("{}.csv", kind.as_str()));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        Ok(Self {
            kind,
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, BoxError> {
        self.writer
            .as_mut()
            .ok_or_else(|| format!("{} store is closed", self.kind).into())
    }
}

impl ResultStore for CsvStore {
    /// Truncates the file and writes the header row.
    fn init(&mut self) -> Result<(), BoxError> {
        let kind = self.kind;
        debug!(path = %self.path.display(), "Initializing record file");

        let writer = self.writer()?;
        writer.flush()?;
        writer.get_mut().set_len(0)?;
        writer.seek(SeekFrom::Start(0))?;
        write_row(writer, kind.headers().iter().copied())?;
        writer.flush()?;
        Ok(())
    }

    fn write(&mut self, record: &[String]) -> Result<(), BoxError> {
        let columns = self.kind.headers().len();
        if record.len() != columns {
            return Err(format!(
                "{} record has {} fields, expected {}",
                self.kind,
                record.len(),
                columns
            )
            .into());
        }

        write_row(self.writer()?, record.iter().map(String::as_str))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

fn write_row<'a>(
    writer: &mut impl Write,
    fields: impl Iterator<Item = &'a str>,
) -> std::io::Result<()> {
    for (index, field) in fields.enumerate() {
        if index > 0 {
            writer.write_all(b",")?;
        }
        if field.contains([',', '"', '\n', '\r']) {
            write!(writer, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            writer.write_all(field.as_bytes())?;
        }
    }
    writer.write_all(b"\n")
}

/// Reads a record file back as its header row and data rows.
pub fn read_records(path: &Path) -> std::io::Result<(Vec<String>, Vec<Vec<String>>)> {
    let content = fs::read_to_string(path)?;
    let mut rows = parse_rows(&content).into_iter();
    let headers = rows.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} holds no header row", path.display()),
        )
    })?;

    Ok((headers, rows.collect()))
}

fn parse_rows(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (c, _) => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::RunSettings;
    use tempfile::tempdir;

    fn run_id() -> RunId {
        RunId::compute(&RunSettings::default(), b"vehicle", b"motor").unwrap()
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_init_writes_headers_and_truncates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("MOTION.csv"), "stale,data\n1,2\n").unwrap();

        let mut store = CsvStore::open(dir.path(), RecordKind::Motion).unwrap();
        store.init().unwrap();
        store.write(&row(&["0.1", "12.5", "30", "9.8", "128"])).unwrap();
        store.close().unwrap();

        let (headers, rows) = read_records(store.path()).unwrap();
        assert_eq!(headers, RecordKind::Motion.headers());
        assert_eq!(rows, vec![row(&["0.1", "12.5", "30", "9.8", "128"])]);
    }

    #[test]
    fn test_write_checks_field_count() {
        let dir = tempdir().unwrap();
        let mut store = CsvStore::open(dir.path(), RecordKind::Events).unwrap();
        store.init().unwrap();

        let err = store.write(&row(&["0.0", "LIFTOFF"])).unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn test_fields_are_quoted() {
        let dir = tempdir().unwrap();
        let mut store = CsvStore::open(dir.path(), RecordKind::Events).unwrap();
        store.init().unwrap();
        store
            .write(&row(&["1.5", "APOGEE", "burnt, out", "say \"deploy\""]))
            .unwrap();
        store.close().unwrap();

        let (_, rows) = read_records(store.path()).unwrap();
        assert_eq!(rows[0][2], "burnt, out");
        assert_eq!(rows[0][3], "say \"deploy\"");
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let dir = tempdir().unwrap();
        let mut store = CsvStore::open(dir.path(), RecordKind::Motion).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.write(&row(&["0", "0", "0", "0", "0"])).is_err());
    }

    #[test]
    fn test_opener_uses_run_directory() {
        let dir = tempdir().unwrap();
        let opener = CsvStoreOpener::new(dir.path());
        let run_id = run_id();

        let mut store = opener.open(RecordKind::Dynamics, &run_id).unwrap();
        store.init().unwrap();
        store.close().unwrap();

        let path = opener.run_dir(&run_id).join("DYNAMICS.csv");
        let (headers, rows) = read_records(&path).unwrap();
        assert_eq!(headers.len(), 14);
        assert!(rows.is_empty());
    }
}
