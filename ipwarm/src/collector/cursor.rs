//! Incremental reader for the accounting file.
//!
//! Remembers the byte offset and header strategy between reads. Only complete
//! lines are consumed; a partially written last line is left for the next read.
//! A file shorter than the saved offset is treated as rotated and re-read from
//! the start with a fresh parser.
//!
//! Reading does not move the cursor. The caller persists what a chunk produced
//! and then hands the chunk back to [`AccountingCursor::commit`]; a chunk that
//! is dropped instead is read again next time.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use pmta_accounting::{AccountingParser, AccountingRecord, ParserStrategy};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

use crate::Result;

/// Upper bound on bytes consumed per read (default: 8 MiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
pub struct AccountingCursor {
    path: PathBuf,
    offset: u64,
    parser: AccountingParser,
    max_read_bytes: u64,
    restored: bool,
}

/// Records read from one span of the file, not yet committed.
#[derive(Debug)]
pub struct AccountingChunk {
    pub records: Vec<AccountingRecord>,
    start: u64,
    end: u64,
    parser: AccountingParser,
}

impl AccountingChunk {
    /// Offset of the first consumed byte; 0 after a rotation.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Offset just past the last consumed line.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Column strategy in effect at `end`.
    pub fn strategy(&self) -> &ParserStrategy {
        self.parser.strategy()
    }
}

impl AccountingCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            parser: AccountingParser::new(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            restored: false,
        }
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether a saved position has been applied, see [`AccountingCursor::restore`].
    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Continue from a position saved by an earlier process.
    pub fn restore(&mut self, offset: u64, strategy: ParserStrategy) {
        self.offset = offset;
        self.parser = AccountingParser::with_strategy(strategy);
        self.restored = true;
    }

    /// Mark the cursor as restored with nothing saved: start of file.
    pub fn restore_fresh(&mut self) {
        self.restore(0, ParserStrategy::Positional);
    }

    /// Move past `chunk`. Call only once whatever it produced is stored.
    pub fn commit(&mut self, chunk: AccountingChunk) {
        self.offset = chunk.end;
        self.parser = chunk.parser;
    }

    /// Complete lines appended since the committed offset, at most
    /// `max_read_bytes` of them unless a single line is longer.
    /// Returns `None` when there is nothing new or the file is missing.
    pub async fn read_chunk(&self) -> Result<Option<AccountingChunk>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Accounting file not present yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (start, mut parser) = if len < self.offset {
            info!(
                path = %self.path.display(),
                previous_offset = self.offset,
                len,
                "Accounting file truncated or rotated; reading from start"
            );
            (0, AccountingParser::new())
        } else {
            (self.offset, self.parser.clone())
        };
        if len == start {
            return Ok(None);
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut reader = BufReader::new(file);

        let mut buf = Vec::new();
        (&mut reader)
            .take(self.max_read_bytes)
            .read_to_end(&mut buf)
            .await?;
        if buf.len() as u64 == self.max_read_bytes && !buf.contains(&b'\n') {
            // A single line longer than the cap is read to its end.
            reader.read_until(b'\n', &mut buf).await?;
        }

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(None);
        };
        let complete = &buf[..=last_newline];

        let records = match parser.parse_reader(complete) {
            Ok(records) => records,
            Err(partial) => {
                warn!(error = %partial, "Accounting read interrupted");
                partial.records
            }
        };
        let end = start + complete.len() as u64;

        debug!(
            path = %self.path.display(),
            start,
            end,
            len,
            records = records.len(),
            "Read accounting records"
        );
        Ok(Some(AccountingChunk {
            records,
            start,
            end,
            parser,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    const HEADER: &str = "#type,timeLogged,orig,rcpt,dlvSourceIp,vmta\n";

    async fn read_and_commit(cursor: &mut AccountingCursor) -> Vec<AccountingRecord> {
        match cursor.read_chunk().await.unwrap() {
            Some(mut chunk) => {
                let records = std::mem::take(&mut chunk.records);
                cursor.commit(chunk);
                records
            }
            None => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_incremental_reads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{HEADER}d,2024-03-01 10:00:00,a@x.com,b@gmail.com,203.0.113.10,vmta-01\n"
        )
        .unwrap();
        file.flush().unwrap();

        let mut cursor = AccountingCursor::new(file.path());
        let first = read_and_commit(&mut cursor).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source_ip, "203.0.113.10");

        assert!(cursor.read_chunk().await.unwrap().is_none());

        // Partial line is held back until its newline arrives.
        write!(file, "b,2024-03-01 10:05:00,a@x.com,c@yahoo.com,203.0.113.10").unwrap();
        file.flush().unwrap();
        assert!(cursor.read_chunk().await.unwrap().is_none());

        write!(file, ",vmta-01\n").unwrap();
        file.flush().unwrap();
        let second = read_and_commit(&mut cursor).await;
        assert_eq!(second.len(), 1);
        // Header strategy survives across reads.
        assert_eq!(second[0].vmta, "vmta-01");
        assert_eq!(second[0].domain, "yahoo.com");
    }

    #[tokio::test]
    async fn test_uncommitted_chunk_is_read_again() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{HEADER}d,2024-03-01 10:00:00,a@x.com,b@gmail.com,203.0.113.10,vmta-01\n"
        )
        .unwrap();
        file.flush().unwrap();

        let cursor = AccountingCursor::new(file.path());
        let dropped = cursor.read_chunk().await.unwrap().unwrap();
        assert_eq!(dropped.records.len(), 1);
        drop(dropped);

        assert_eq!(cursor.offset(), 0);
        let again = cursor.read_chunk().await.unwrap().unwrap();
        assert_eq!(again.records.len(), 1);
        assert_eq!(again.end(), std::fs::metadata(file.path()).unwrap().len());
        assert!(again.strategy().is_named());
    }

    #[tokio::test]
    async fn test_reads_are_capped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(file, "d,2024-03-01 10:00:0{i},,a@x.com,u{i}@gmail.com").unwrap();
        }
        file.flush().unwrap();
        let line_len = "d,2024-03-01 10:00:00,,a@x.com,u0@gmail.com\n".len() as u64;

        // Room for three lines plus part of a fourth.
        let mut cursor = AccountingCursor::new(file.path()).with_max_read_bytes(line_len * 3 + 5);
        let first = read_and_commit(&mut cursor).await;
        assert_eq!(first.len(), 3);
        assert_eq!(cursor.offset(), line_len * 3);

        let mut total = first.len();
        while cursor.offset() < line_len * 10 {
            total += read_and_commit(&mut cursor).await.len();
        }
        assert_eq!(total, 10);
        assert!(cursor.read_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_longer_than_cap_is_read_whole() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "b,2024-03-01 10:00:00,,a@x.com,b@gmail.com,{}\n",
            "x".repeat(200)
        )
        .unwrap();
        file.flush().unwrap();

        let mut cursor = AccountingCursor::new(file.path()).with_max_read_bytes(16);
        let records = read_and_commit(&mut cursor).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rcpt, "b@gmail.com");
        assert_eq!(
            cursor.offset(),
            std::fs::metadata(file.path()).unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_restore_resumes_with_saved_strategy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{HEADER}").unwrap();
        file.flush().unwrap();
        let header_len = HEADER.len() as u64;
        write!(
            file,
            "d,2024-03-01 10:00:00,a@x.com,b@gmail.com,203.0.113.10,vmta-01\n"
        )
        .unwrap();
        file.flush().unwrap();

        let mut cursor = AccountingCursor::new(file.path());
        assert!(!cursor.is_restored());
        cursor.restore(header_len, ParserStrategy::from_header(HEADER.trim_end()));
        assert!(cursor.is_restored());

        let records = read_and_commit(&mut cursor).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_ip, "203.0.113.10");
    }

    #[tokio::test]
    async fn test_truncation_restarts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "d,2024-03-01 10:00:00,,a@x.com,b@gmail.com\nd,2024-03-01 10:00:01,,a@x.com,c@gmail.com\n"
        )
        .unwrap();
        file.flush().unwrap();

        let mut cursor = AccountingCursor::new(file.path());
        assert_eq!(read_and_commit(&mut cursor).await.len(), 2);

        file.as_file().set_len(0).unwrap();
        file.rewind().unwrap();
        write!(file, "b,2024-03-02 09:00:00,,a@x.com,d@gmail.com\n").unwrap();
        file.flush().unwrap();

        let chunk = cursor.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.start(), 0);
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.records[0].rcpt, "d@gmail.com");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = AccountingCursor::new(dir.path().join("acct.csv"));
        assert!(cursor.read_chunk().await.unwrap().is_none());
        assert_eq!(cursor.offset(), 0);
    }
}
