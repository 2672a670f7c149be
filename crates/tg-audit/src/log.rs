// log.rs — Append-only JSONL audit log.
//
// One JSON object per line. Each event carries the SHA-256 of the raw line
// before it in `previous_hash`; the first event carries none. Editing,
// dropping or reordering any line breaks the link on the line after it.
//
// A line is written whole or not at all: a failed write is cut back to the
// last committed length. If even that fails, the log refuses further
// appends rather than chain onto a torn line.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;

/// Result of walking a log's hash chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    /// Number of events in the log.
    pub events: usize,
    /// Hash of the last line; the `previous_hash` the next event will carry.
    pub head: Option<String>,
}

/// An append-only audit log backed by a JSONL file.
pub struct AuditLog {
    file: File,
    path: PathBuf,
    head: Option<String>,
    appended: usize,
    /// File length after the last whole line.
    committed: u64,
    poisoned: bool,
}

impl AuditLog {
    /// Open (or create) the log, resuming the chain from an existing file.
    ///
    /// An existing file is verified first; a broken chain is an error rather
    /// than something new events quietly extend.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let open_failed = |source| AuditError::OpenFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_failed)?;
        }

        let summary = if path.exists() {
            Self::verify_chain(&path)?
        } else {
            ChainSummary::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_failed)?;
        let committed = file.metadata().map_err(open_failed)?.len();

        tracing::debug!(path = %path.display(), events = summary.events, "audit log opened");
        Ok(Self {
            file,
            path,
            head: summary.head,
            appended: summary.events,
            committed,
            poisoned: false,
        })
    }

    /// Link `event` to the chain head and write it as one flushed line.
    pub fn append(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        if self.poisoned {
            return Err(AuditError::Poisoned {
                path: self.path.clone(),
            });
        }
        event.previous_hash = self.head.clone();
        let line = serde_json::to_string(event)?;

        match write_line(&mut self.file, self.committed, &line) {
            Ok(committed) => self.committed = committed,
            Err(LineError::RolledBack(e)) => return Err(AuditError::WriteFailed(e)),
            Err(LineError::Torn(e)) => {
                tracing::error!(path = %self.path.display(), error = %e, "audit log left with a partial line");
                self.poisoned = true;
                return Err(AuditError::WriteFailed(e));
            }
        }

        // The head only moves once the line is written.
        self.head = Some(hasher::hash_str(&line));
        self.appended += 1;
        Ok(())
    }

    /// Read all events from a log file, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Vec::new();
        for_each_line(path.as_ref(), |_, line| {
            events.push(serde_json::from_str(line)?);
            Ok(())
        })?;
        Ok(events)
    }

    /// Walk the chain, failing with `IntegrityViolation` at the first line
    /// whose `previous_hash` does not match the raw line before it.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainSummary, AuditError> {
        let mut summary = ChainSummary::default();
        for_each_line(path.as_ref(), |line_no, line| {
            let event: AuditEvent = serde_json::from_str(line)?;
            if event.previous_hash != summary.head {
                let show = |h: Option<String>| h.unwrap_or_else(|| "None".to_string());
                return Err(AuditError::IntegrityViolation {
                    line: line_no,
                    expected: show(summary.head.take()),
                    actual: show(event.previous_hash),
                });
            }
            // Raw line, not a re-serialization: field order is part of the hash.
            summary.head = Some(hasher::hash_str(line));
            summary.events += 1;
            Ok(())
        })?;
        Ok(summary)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events in the file, including those present before it was opened.
    pub fn len(&self) -> usize {
        self.appended
    }

    pub fn is_empty(&self) -> bool {
        self.appended == 0
    }

    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

/// Somewhere log lines go that can be cut back to a known length.
trait LineSink: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LineSink for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

#[derive(Debug)]
enum LineError {
    /// Nothing of the line remains.
    RolledBack(io::Error),
    /// Part of the line may remain.
    Torn(io::Error),
}

/// Write `line` and a newline in one call. Returns the new committed length.
fn write_line(out: &mut impl LineSink, committed: u64, line: &str) -> Result<u64, LineError> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');

    match out.write_all(&bytes).and_then(|()| out.flush()) {
        Ok(()) => Ok(committed + bytes.len() as u64),
        Err(e) => match out.truncate_to(committed) {
            Ok(()) => Err(LineError::RolledBack(e)),
            Err(_) => Err(LineError::Torn(e)),
        },
    }
}

/// Call `f` with the 1-based line number and text of every non-blank line.
fn for_each_line(
    path: &Path,
    mut f: impl FnMut(usize, &str) -> Result<(), AuditError>,
) -> Result<(), AuditError> {
    let file = File::open(path).map_err(|source| AuditError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            f(idx + 1, &line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditAction;
    use tempfile::tempdir;

    #[test]
    fn append_links_each_event_to_the_previous_line() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("audit.jsonl");

        let head = {
            let mut log = AuditLog::open(&log_path).unwrap();
            let mut e1 = AuditEvent::new("s1", AuditAction::Decision);
            let mut e2 = AuditEvent::new("s1", AuditAction::StateTransition);
            log.append(&mut e1).unwrap();
            log.append(&mut e2).unwrap();
            assert_eq!(log.len(), 2);
            log.head().map(str::to_string)
        };

        let events = AuditLog::read_all(&log_path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Decision);
        assert!(events[0].previous_hash.is_none());
        assert_eq!(events[1].action, AuditAction::StateTransition);

        let first_line = std::fs::read_to_string(&log_path)
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .to_string();
        assert_eq!(events[1].previous_hash, Some(hasher::hash_str(&first_line)));
        assert_eq!(AuditLog::verify_chain(&log_path).unwrap().head, head);
    }

    #[test]
    fn reopen_log_continues_chain() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("nested").join("audit.jsonl");

        for _ in 0..2 {
            let mut log = AuditLog::open(&log_path).unwrap();
            let mut event = AuditEvent::new("s1", AuditAction::Decision);
            log.append(&mut event).unwrap();
        }

        let reopened = AuditLog::open(&log_path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(AuditLog::verify_chain(&log_path).unwrap().events, 2);
    }

    /// Accepts `budget` bytes, then fails every write.
    struct ShortDisk {
        data: Vec<u8>,
        budget: usize,
        truncate_fails: bool,
    }

    impl Write for ShortDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LineSink for ShortDisk {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_write_leaves_no_partial_line() {
        let mut disk = ShortDisk {
            data: Vec::new(),
            budget: 12,
            truncate_fails: false,
        };
        let committed = write_line(&mut disk, 0, "{\"a\":1}").unwrap();
        assert_eq!(committed, 8);

        let err = write_line(&mut disk, committed, "{\"b\":2}").unwrap_err();
        assert!(matches!(err, LineError::RolledBack(_)));
        assert_eq!(disk.data, b"{\"a\":1}\n");

        disk.budget = 64;
        let committed = write_line(&mut disk, committed, "{\"c\":3}").unwrap();
        assert_eq!(committed, 16);
        assert_eq!(disk.data, b"{\"a\":1}\n{\"c\":3}\n");
    }

    #[test]
    fn torn_write_is_reported() {
        let mut disk = ShortDisk {
            data: Vec::new(),
            budget: 3,
            truncate_fails: true,
        };
        assert!(matches!(
            write_line(&mut disk, 0, "{\"a\":1}"),
            Err(LineError::Torn(_))
        ));
    }

    #[test]
    fn tampering_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&log_path).unwrap();
            for session in ["s1", "s2", "s3"] {
                let mut event = AuditEvent::new(session, AuditAction::Decision);
                log.append(&mut event).unwrap();
            }
        }

        // Rewrite the first record's session: the second line's link no longer matches.
        let content = std::fs::read_to_string(&log_path).unwrap();
        std::fs::write(&log_path, content.replacen("\"s1\"", "\"s9\"", 1)).unwrap();

        match AuditLog::verify_chain(&log_path) {
            Err(AuditError::IntegrityViolation { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected IntegrityViolation, got {:?}", other),
        }
        assert!(matches!(
            AuditLog::open(&log_path),
            Err(AuditError::IntegrityViolation { .. })
        ));
    }
}
