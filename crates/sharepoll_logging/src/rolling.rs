//! Size-rotated log file writer.
//!
//! `<base>.log` is the live file; backups are `<base>.log.1` (newest) up to
//! `<base>.log.<max_files - 1>`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How many files to keep and how large each may grow.
#[derive(Debug, Clone, Copy)]
struct Rotation {
    max_files: usize,
    max_bytes: u64,
}

struct RotatingLog {
    live: PathBuf,
    rotation: Rotation,
    file: File,
    written: u64,
}

impl RotatingLog {
    fn open(dir: &Path, base_name: &str, rotation: Rotation) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let live = dir.join(format!("{}.log", sanitize_name(base_name)));
        let (file, written) = open_append(&live)?;
        let mut log = Self {
            live,
            rotation,
            file,
            written,
        };
        if log.written > log.rotation.max_bytes {
            log.roll()?;
        }
        Ok(log)
    }

    fn backup(&self, index: usize) -> PathBuf {
        let mut name = self.live.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /// Move every backup one slot older and start an empty live file.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let keep = self.rotation.max_files.saturating_sub(1);
        if keep == 0 {
            self.file = File::create(&self.live)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.backup(keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..keep).rev() {
            let from = self.backup(index);
            if from.exists() {
                fs::rename(&from, self.backup(index + 1))?;
            }
        }
        fs::rename(&self.live, self.backup(1))?;

        let (file, written) = open_append(&self.live)?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.written > 0 && self.written + incoming > self.rotation.max_bytes {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// `MakeWriter` sharing one rotating log between subscriber layers.
#[derive(Clone)]
pub struct SharedRollingWriter {
    log: Arc<Mutex<RotatingLog>>,
}

impl SharedRollingWriter {
    pub fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        let rotation = Rotation {
            max_files: max_files.max(1),
            max_bytes: max_size,
        };
        let log = RotatingLog::open(&dir, base_name, rotation)?;
        Ok(Self {
            log: Arc::new(Mutex::new(log)),
        })
    }
}

/// Holds the log lock for one formatted event.
pub struct RollingWriterLock<'a> {
    log: MutexGuard<'a, RotatingLog>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = RollingWriterLock<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriterLock {
            log: self.log.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Write for RollingWriterLock<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}
