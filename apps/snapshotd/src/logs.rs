use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Log destination shared by every writer the subscriber creates: a
/// size-rotated file, optionally mirrored to stdout.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<RotatingFile>>,
    echo_stdout: bool,
}

struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl LogSink {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile::open(path, max_bytes, backups)?)),
            echo_stdout: true,
        })
    }

    pub fn without_stdout(mut self) -> Self {
        self.echo_stdout = false;
        self
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The stdout mirror gets every line, whatever happened to the file.
    fn push_line(&self, line: &[u8]) -> io::Result<()> {
        let written = self.lock().write_line(line);
        if self.echo_stdout {
            io::stdout().write_all(line)?;
        }
        written
    }
}

impl RotatingFile {
    fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes: max_bytes.max(1),
            backups,
        })
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.written > 0 && self.written + line.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line)?;
        self.written += line.len() as u64;
        Ok(())
    }

    /// `log` → `log.1` → … → `log.N`; the oldest generation falls off.
    ///
    /// A failed rename (the file was moved or deleted behind our back) still
    /// ends with a fresh file at `path`, and the failure is noted in it.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        let shifted = if self.backups > 0 {
            self.shift_generations()
        } else {
            Ok(())
        };

        ensure_parent(&self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;

        if let Err(err) = shifted {
            let note = format!(
                "{}  WARN snapshotd::logs: log rotation failed: {err}\n",
                Local::now().format(TIMESTAMP_FORMAT)
            );
            self.file.write_all(note.as_bytes())?;
            self.written = note.len() as u64;
        }
        Ok(())
    }

    fn shift_generations(&self) -> io::Result<()> {
        for index in (1..self.backups).rev() {
            let from = generation_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, generation_path(&self.path, index + 1))?;
            }
        }
        fs::rename(&self.path, generation_path(&self.path, 1))
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn generation_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{index}"));
    path.with_file_name(name)
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            sink: self.clone(),
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted record and hands complete lines to the sink, so a
/// record never straddles a rotation.
pub struct LogWriter {
    sink: LogSink,
    buffer: Vec<u8>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.sink.push_line(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            line.push(b'\n');
            self.sink.push_line(&line)?;
        }
        self.sink.lock().file.flush()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Local wall-clock timestamps, e.g. `19.10.2026 14:03:59`.
pub struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format(TIMESTAMP_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::{LogSink, generation_path};
    use std::io::Write;
    use std::path::Path;
    use tracing_subscriber::fmt::MakeWriter;

    fn write_record(sink: &LogSink, text: &str) {
        let mut writer = sink.make_writer();
        writer.write_all(text.as_bytes()).expect("write record");
    }

    #[test]
    fn generations_are_numbered_after_the_file_name() {
        assert_eq!(
            generation_path(Path::new("/var/log/snapshotd.log"), 2),
            Path::new("/var/log/snapshotd.log.2")
        );
    }

    #[test]
    fn records_are_appended_line_by_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("snapshotd.log");
        let sink = LogSink::open(&path, 1024, 3).expect("open sink").without_stdout();

        write_record(&sink, "first\n");
        write_record(&sink, "second\nthird");

        assert_eq!(
            std::fs::read_to_string(&path).expect("read log"),
            "first\nsecond\nthird\n"
        );
    }

    #[test]
    fn rotation_keeps_a_bounded_number_of_generations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshotd.log");
        let sink = LogSink::open(&path, 10, 2).expect("open sink").without_stdout();

        for record in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            write_record(&sink, record);
        }

        let read = |p: &Path| std::fs::read_to_string(p).expect("read generation");
        assert_eq!(read(&path), "dddddddd\n");
        assert_eq!(read(&generation_path(&path, 1)), "cccccccc\n");
        assert_eq!(read(&generation_path(&path, 2)), "bbbbbbbb\n");
        assert!(!generation_path(&path, 3).exists());
    }

    #[test]
    fn deleted_log_file_is_recreated_instead_of_failing_every_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshotd.log");
        let sink = LogSink::open(&path, 10, 2).expect("open sink").without_stdout();

        write_record(&sink, "aaaaaaaa\n");
        std::fs::remove_file(&path).expect("remove log");

        for record in ["bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            write_record(&sink, record);
        }

        let read = |p: &Path| std::fs::read_to_string(p).expect("read generation");
        assert_eq!(read(&path), "dddddddd\n");
        assert_eq!(read(&generation_path(&path, 1)), "cccccccc\n");
        let recovered = read(&generation_path(&path, 2));
        assert!(recovered.contains("log rotation failed"), "{recovered}");
        assert!(recovered.ends_with("bbbbbbbb\n"));
    }

    #[test]
    fn reopening_continues_the_size_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshotd.log");
        std::fs::write(&path, "0123456789\n").expect("seed log");

        let sink = LogSink::open(&path, 12, 1).expect("open sink").without_stdout();
        write_record(&sink, "next\n");

        assert_eq!(std::fs::read_to_string(&path).expect("read"), "next\n");
        assert_eq!(
            std::fs::read_to_string(generation_path(&path, 1)).expect("read backup"),
            "0123456789\n"
        );
    }
}
