//! Accounting log parser.
//!
//! PowerMTA writes one CSV row per delivery, bounce or complaint. A file may start
//! with a `#type,<col>,<col>,...` header describing the column order; when present
//! the parser switches to header-driven lookup for the rest of the stream.
//!
//! Parsing is tolerant: a malformed line is skipped, never fatal. Only I/O errors on
//! the underlying reader are reported, together with the records read so far.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{AccountingError, PartialParse};
use crate::record::{AccountingRecord, RecordType, recipient_domain};

/// Minimum number of comma-separated fields for a data row.
pub const MIN_FIELDS: usize = 5;

/// Prefix of the self-describing header line.
const HEADER_PREFIX: &str = "#type,";

/// Timestamp layout used by `timeLogged`.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Same layout with a trailing numeric UTC offset (`-0700`).
const TIME_FORMAT_WITH_OFFSET: &str = "%Y-%m-%d %H:%M:%S%z";

// Positional fallback follows the default PowerMTA column order:
// type, timeLogged, timeQueued, orig, rcpt, ...
const POS_TYPE: usize = 0;
const POS_TIME_LOGGED: usize = 1;
const POS_ORIG: usize = 3;
const POS_RCPT: usize = 4;

/// How columns are located in a data row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserStrategy {
    /// No header seen: fixed positions, only type/time/sender/recipient.
    #[default]
    Positional,
    /// Header seen: column name to index.
    Named(HashMap<String, usize>),
}

impl ParserStrategy {
    /// Build a named strategy from a `#type,...` header line.
    pub fn from_header(line: &str) -> Self {
        let columns = split_fields(line)
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let name = name.trim();
                let name = name.strip_prefix('#').unwrap_or(name);
                (name.to_string(), idx)
            })
            .collect();
        Self::Named(columns)
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

/// Counters for a parsing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: u64,
    pub records: u64,
    pub skipped: u64,
}

/// Stateful accounting parser.
///
/// The strategy survives across calls to [`AccountingParser::parse_reader`], so a
/// caller reading a file incrementally keeps header-driven lookup after the header
/// line has been consumed.
#[derive(Debug, Clone, Default)]
pub struct AccountingParser {
    strategy: ParserStrategy,
    stats: ParseStats,
}

impl AccountingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with a strategy learned from an earlier part of the stream.
    pub fn with_strategy(strategy: ParserStrategy) -> Self {
        Self {
            strategy,
            stats: ParseStats::default(),
        }
    }

    pub fn strategy(&self) -> &ParserStrategy {
        &self.strategy
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Forget the header strategy, e.g. after the file was rotated.
    pub fn reset(&mut self) {
        self.strategy = ParserStrategy::Positional;
        self.stats = ParseStats::default();
    }

    /// Parse a single line. Returns `None` for headers, comments, blanks and
    /// rows with too few fields.
    pub fn parse_line(&mut self, line: &str) -> Option<AccountingRecord> {
        self.stats.lines += 1;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            return None;
        }
        if line.starts_with(HEADER_PREFIX) {
            self.strategy = ParserStrategy::from_header(line);
            debug!(strategy = ?self.strategy, "Accounting header detected");
            return None;
        }
        if line.starts_with('#') {
            return None;
        }

        let fields = split_fields(line);
        if fields.len() < MIN_FIELDS {
            trace!(fields = fields.len(), "Skipping short accounting line");
            self.stats.skipped += 1;
            return None;
        }

        let record = match &self.strategy {
            ParserStrategy::Named(columns) => named_record(columns, &fields),
            ParserStrategy::Positional => positional_record(&fields),
        };
        self.stats.records += 1;
        Some(record)
    }

    /// Parse every line of `reader`.
    pub fn parse_reader<R: BufRead>(
        &mut self,
        mut reader: R,
    ) -> std::result::Result<Vec<AccountingRecord>, PartialParse> {
        let mut records = Vec::new();
        let mut buf = Vec::with_capacity(512);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if let Some(record) = self.parse_line(&line) {
                        records.push(record);
                    }
                }
                Err(source) => return Err(PartialParse { records, source }),
            }
        }

        Ok(records)
    }
}

/// Parse an accounting stream with a fresh parser.
pub fn parse_reader<R: BufRead>(
    reader: R,
) -> std::result::Result<Vec<AccountingRecord>, PartialParse> {
    AccountingParser::new().parse_reader(reader)
}

/// Parse an accounting file with a fresh parser.
pub fn parse_file(path: impl AsRef<Path>) -> crate::Result<Vec<AccountingRecord>> {
    let path = path.as_ref();
    let file =
        File::open(path).map_err(|e| AccountingError::open(path.display().to_string(), e))?;

    let mut parser = AccountingParser::new();
    let records = parser.parse_reader(BufReader::new(file))?;
    let stats = parser.stats();
    debug!(
        path = %path.display(),
        lines = stats.lines,
        records = stats.records,
        skipped = stats.skipped,
        "Parsed accounting file"
    );
    Ok(records)
}

fn named_record(columns: &HashMap<String, usize>, fields: &[String]) -> AccountingRecord {
    let get = |name| named_field(columns, fields, name);

    let rcpt = get("rcpt").to_string();
    AccountingRecord {
        record_type: RecordType::parse(get("type")),
        time_logged: parse_time_logged(get("timeLogged")),
        orig: get("orig").to_string(),
        domain: recipient_domain(&rcpt),
        rcpt,
        source_ip: get("dlvSourceIp").to_string(),
        vmta: get("vmta").to_string(),
        job_id: get("jobId").to_string(),
        bounce_code: get("dsnStatus").to_string(),
        dsn_diag: get("dsnDiag").to_string(),
        bounce_cat: get("bounceCat").to_string(),
        message_id: get("header_Message-ID").to_string(),
        dkim_result: get("dkimResult").to_string(),
    }
}

fn named_field<'a>(columns: &HashMap<String, usize>, fields: &'a [String], name: &str) -> &'a str {
    columns
        .get(name)
        .and_then(|&idx| fields.get(idx))
        .map(|s| s.trim())
        .unwrap_or("")
}

fn positional_record(fields: &[String]) -> AccountingRecord {
    let get = |idx: usize| fields.get(idx).map(|s| s.trim()).unwrap_or("");
    AccountingRecord::new(
        RecordType::parse(get(POS_TYPE)),
        parse_time_logged(get(POS_TIME_LOGGED)),
        get(POS_ORIG),
        get(POS_RCPT),
    )
}

/// Parse `timeLogged`, substituting the current time when it is unreadable.
pub fn parse_time_logged(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, TIME_FORMAT_WITH_OFFSET) {
        return dt.with_timezone(&Utc);
    }
    match NaiveDateTime::parse_from_str(raw, TIME_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(_) => Utc::now(),
    }
}

/// Split a CSV line, honouring double-quoted fields and `""` escapes.
///
/// Unterminated quotes swallow the remainder of the line into one field.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::{Cursor, Read};

    const HEADER: &str = "#type,timeLogged,timeQueued,orig,rcpt,orcpt,dsnAction,dsnStatus,dsnDiag,dsnMta,bounceCat,srcType,srcMta,dlvType,dlvSourceIp,dlvDestinationIp,dlvEsmtpAvailable,dlvSize,vmta,jobId,envId,queue,vmtaPool,header_Message-ID,dkimResult";

    #[test]
    fn test_split_fields_quoted() {
        let fields = split_fields(r#"b,"550 5.1.1 user unknown, try later","say ""hi""",x"#);
        assert_eq!(
            fields,
            vec![
                "b".to_string(),
                "550 5.1.1 user unknown, try later".to_string(),
                r#"say "hi""#.to_string(),
                "x".to_string(),
            ]
        );
    }

    #[test]
    fn test_positional_fallback() {
        let input = "d,2024-03-01 10:15:00,2024-03-01 10:14:58,sender@brand.com,Jane@Gmail.com\n";
        let records = parse_reader(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.record_type, RecordType::Delivered);
        assert_eq!(r.orig, "sender@brand.com");
        assert_eq!(r.rcpt, "Jane@Gmail.com");
        assert_eq!(r.domain, "gmail.com");
        assert_eq!(
            r.time_logged,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
        assert!(r.source_ip.is_empty());
    }

    #[test]
    fn test_named_fields_after_header() {
        let input = format!(
            "{HEADER}\nb,2024-03-01 10:15:00,2024-03-01 10:14:58,news@brand.com,bob@yahoo.com,,failed,5.1.1,\"smtp;550 5.1.1 no such user, sorry\",mx.yahoo.com,bad-mailbox,smtp,,smtp,203.0.113.10,98.136.96.1,,2048,vmta-10,job-42,,yahoo.com/vmta-10,pool-a,<abc@brand.com>,pass\n"
        );
        let mut parser = AccountingParser::new();
        let records = parser.parse_reader(Cursor::new(input)).unwrap();
        assert!(parser.strategy().is_named());
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.record_type, RecordType::Bounced);
        assert_eq!(r.source_ip, "203.0.113.10");
        assert_eq!(r.vmta, "vmta-10");
        assert_eq!(r.job_id, "job-42");
        assert_eq!(r.bounce_code, "5.1.1");
        assert_eq!(r.dsn_diag, "smtp;550 5.1.1 no such user, sorry");
        assert_eq!(r.bounce_cat, "bad-mailbox");
        assert_eq!(r.message_id, "<abc@brand.com>");
        assert_eq!(r.dkim_result, "pass");
        assert_eq!(r.domain, "yahoo.com");
    }

    #[test]
    fn test_named_strategy_handles_reordered_columns() {
        let input = "#type,rcpt,dlvSourceIp,timeLogged,orig\nf,user@aol.com,192.0.2.7,2024-03-02 00:00:01,a@b.com\n";
        let records = parse_reader(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::Complaint);
        assert_eq!(records[0].rcpt, "user@aol.com");
        assert_eq!(records[0].source_ip, "192.0.2.7");
        assert_eq!(records[0].orig, "a@b.com");
    }

    #[test]
    fn test_skips_comments_blanks_and_short_lines() {
        let input = "# comment line\n\n   \nd,2024-01-01 00:00:00,x\nd,2024-01-01 00:00:00,q,a@b.com,c@d.com\n";
        let mut parser = AccountingParser::new();
        let records = parser.parse_reader(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(parser.stats().skipped, 1);
        assert!(!parser.strategy().is_named());
    }

    #[test]
    fn test_bad_timestamp_substitutes_now() {
        let before = Utc::now();
        let input = "d,not-a-time,q,a@b.com,c@d.com\n";
        let records = parse_reader(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].time_logged >= before);
    }

    #[test]
    fn test_timestamp_with_offset() {
        let ts = parse_time_logged("2024-03-01 10:15:00-0200");
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 12, 15, 0).unwrap());
    }

    #[test]
    fn test_invalid_utf8_does_not_abort() {
        let mut input = b"d,2024-01-01 00:00:00,q,a@b.com,c@d.com\n".to_vec();
        input.extend_from_slice(b"d,2024-01-01 00:00:00,q,\xff\xfe@b.com,e@f.com\n");
        let records = parse_reader(Cursor::new(input)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].domain, "f.com");
    }

    #[test]
    fn test_strategy_persists_across_reads() {
        let mut parser = AccountingParser::new();
        parser
            .parse_reader(Cursor::new("#type,timeLogged,orig,rcpt,dlvSourceIp\n"))
            .unwrap();
        let records = parser
            .parse_reader(Cursor::new(
                "d,2024-01-01 00:00:00,a@b.com,c@d.com,198.51.100.1\n",
            ))
            .unwrap();
        assert_eq!(records[0].source_ip, "198.51.100.1");

        parser.reset();
        assert!(!parser.strategy().is_named());
    }

    #[test]
    fn test_with_strategy_resumes_mid_stream() {
        let strategy = ParserStrategy::from_header("#type,timeLogged,orig,rcpt,vmta,dlvSourceIp");
        let mut parser = AccountingParser::with_strategy(strategy.clone());
        let records = parser
            .parse_reader(Cursor::new(
                "b,2024-01-01 00:00:00,a@b.com,c@d.com,vmta-02,198.51.100.2\n",
            ))
            .unwrap();
        assert_eq!(records[0].source_ip, "198.51.100.2");
        assert_eq!(records[0].vmta, "vmta-02");
        assert_eq!(parser.strategy(), &strategy);
    }

    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(std::io::Error::other("disk went away"));
            }
            Ok(n)
        }
    }

    #[test]
    fn test_io_error_returns_partial_records() {
        let reader = FailingReader {
            data: Cursor::new(b"d,2024-01-01 00:00:00,q,a@b.com,c@d.com\n".to_vec()),
        };
        let err = parse_reader(BufReader::new(reader)).unwrap_err();
        assert_eq!(err.records.len(), 1);
        assert!(err.to_string().contains("disk went away"));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acct.csv");
        std::fs::write(
            &path,
            "#type,timeLogged,orig,rcpt,dlvSourceIp\nd,2024-01-01 00:00:00,a@b.com,c@d.com,198.51.100.1\n",
        )
        .unwrap();

        let records = parse_file(&path).unwrap();
        assert_eq!(records.len(), 1);

        let missing = parse_file(dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(missing, AccountingError::Open { .. }));
    }
}
