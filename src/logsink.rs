//! Per-pool log sink: spec.md §6's `logfile`/`dateformat` options. Modeled
//! as a small sink a pool writes its events through (an `EventListener`),
//! rather than as global logger reconfiguration — a process can host many
//! named pools at once, each wanting its own file and timestamp format, and
//! the `log` facade has only one global destination.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;

use crate::events::{EventListener, PoolEvent};

/// `strftime`-style format used when a pool doesn't configure its own.
const DEFAULT_DATEFORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Appends one timestamped line per [`PoolEvent`] to a file.
pub struct FileLogSink {
    file: Mutex<File>,
    dateformat: String,
}

impl FileLogSink {
    /// Open (creating if absent, appending otherwise) the file at `path`.
    /// `dateformat` is a `chrono::format::strftime` pattern; `None` falls
    /// back to [`DEFAULT_DATEFORMAT`].
    pub fn open(path: impl AsRef<Path>, dateformat: Option<&str>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileLogSink {
            file: Mutex::new(file),
            dateformat: dateformat.unwrap_or(DEFAULT_DATEFORMAT).to_string(),
        })
    }
}

impl EventListener for FileLogSink {
    fn on_event(&self, event: &PoolEvent) {
        let stamp = Local::now().format(&self.dateformat);
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{stamp} {event}") {
            log::warn!("log sink: failed to write pool event to file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_one_line_per_event() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = FileLogSink::open(file.path(), Some("%Y")).unwrap();

        sink.on_event(&PoolEvent::Checkout { pool: "demo".into() });
        sink.on_event(&PoolEvent::Checkin { pool: "demo".into() });

        let mut contents = String::new();
        File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[demo] checkout"));
        assert!(lines[1].ends_with("[demo] checkin"));
        let year = Local::now().format("%Y").to_string();
        assert!(lines[0].starts_with(&year));
    }

    #[test]
    fn appends_across_multiple_opens() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let sink = FileLogSink::open(file.path(), None).unwrap();
            sink.on_event(&PoolEvent::PoolReleased { pool: "a".into() });
        }
        {
            let sink = FileLogSink::open(file.path(), None).unwrap();
            sink.on_event(&PoolEvent::PoolReleased { pool: "b".into() });
        }
        let mut contents = String::new();
        File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
