//! Producer for tape archive listings.
//!
//! The archive is listed with `<program> -P <namespace> dmls -aniR -- <path>`,
//! which prints one block per directory:
//!
//! ```text
//! saw562:
//! total 4
//! 1511828541626 drwxrwsr-x   5 5424    5608             119 2019-01-24 11:43 (REG) .
//! 1578400487646 drwxrws---  11 0       5608             163 2019-02-04 10:30 (REG) ..
//! 1511828760656 -rw-r--r--   1 5424    5608       315973404 2016-06-22 14:23 (OFL) data.nc
//!
//! ```
//!
//! The `.` entry describes the directory itself and is emitted, named after
//! the block header, once `..` has supplied its parent. Every other entry
//! takes the `.` inode as its parent.

use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use compact_str::CompactString;
use regex::{Captures, Regex};
use strum::IntoStaticStr;
use tracing::{debug, warn};

use inodb_core::{InodeInfo, Locator, Record, ScanError, Scheme};

use crate::mode::parse_mode;
use crate::producer::{Producer, RecordStream};

struct Patterns {
    header: Regex,
    count: Regex,
    entry: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        header: Regex::new(r"^(?:.*/)?(?P<name>.*):$").expect("header pattern is valid"),
        count: Regex::new(r"^total (?P<count>\d+)$").expect("count pattern is valid"),
        entry: Regex::new(concat!(
            r"^(?P<inode>\d+)\s+(?P<mode>\S{10})\+?\s+(?P<links>\d+)\s+",
            r"(?P<uid>\d+)\s+(?P<gid>\d+)\s+(?P<size>\d+)\s+",
            r"(?P<date>\S{10})\s+(?P<time>\S{5})\s+\((?P<state>.{3})\)\s+",
            r"(?P<name>.*)$",
        ))
        .expect("entry pattern is valid"),
    })
}

/// Stable device number for all records of a tape namespace (FNV-1a).
pub fn namespace_device(namespace: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    namespace
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
enum ParseState {
    #[strum(serialize = "expecting directory header")]
    ExpectHeader,
    #[strum(serialize = "expecting entry count")]
    ExpectCount,
    #[strum(serialize = "consuming entries")]
    Entries,
}

/// Line-at-a-time parser for `dmls -aniR` output.
#[derive(Debug)]
pub struct ListingParser {
    state: ParseState,
    header: CompactString,
    /// The current block's `.` entry, held until `..` is seen.
    dir: Option<Record>,
    dir_inode: Option<u64>,
    device: u64,
    scan_time: f64,
    line_no: usize,
}

impl ListingParser {
    pub fn new(device: u64, scan_time: f64) -> Self {
        Self {
            state: ParseState::ExpectHeader,
            header: CompactString::default(),
            dir: None,
            dir_inode: None,
            device,
            scan_time,
            line_no: 0,
        }
    }

    /// Feed one line, returning a record when one is complete.
    pub fn feed(&mut self, line: &str) -> Result<Option<Record>, ScanError> {
        self.line_no += 1;
        let line = line.trim();

        match self.state {
            ParseState::ExpectHeader => {
                if line.is_empty() {
                    return Ok(None);
                }
                let caps = self.matches(&patterns().header, line)?;
                self.header = CompactString::new(&caps["name"]);
                self.dir = None;
                self.dir_inode = None;
                self.state = ParseState::ExpectCount;
                Ok(None)
            }
            ParseState::ExpectCount => {
                self.matches(&patterns().count, line)?;
                self.state = ParseState::Entries;
                Ok(None)
            }
            ParseState::Entries => {
                if line.is_empty() {
                    if self.dir.is_some() {
                        warn!(directory = %self.header, "Listing block ended without `..` entry");
                    }
                    self.state = ParseState::ExpectHeader;
                    return Ok(None);
                }
                self.entry(line)
            }
        }
    }

    fn entry(&mut self, line: &str) -> Result<Option<Record>, ScanError> {
        let caps = self.matches(&patterns().entry, line)?;
        let mut record = self.record_from(&caps, line)?;

        match &caps["name"] {
            "." => {
                record.basename = self.header.clone();
                self.dir_inode = Some(record.inode);
                self.dir = Some(record);
                Ok(None)
            }
            ".." => {
                let mut dir = self.dir.take().ok_or_else(|| self.error(line))?;
                dir.parent_inode = record.inode;
                dir.parent_device = self.device;
                Ok(Some(dir))
            }
            _ => {
                record.parent_inode = self.dir_inode.ok_or_else(|| self.error(line))?;
                record.parent_device = self.device;
                Ok(Some(record))
            }
        }
    }

    fn record_from(&self, caps: &Captures<'_>, line: &str) -> Result<Record, ScanError> {
        let number = |group: &str| -> Result<u64, ScanError> {
            caps[group].parse().map_err(|_| self.error(line))
        };

        let inode = number("inode")?;
        let timestamp = format!("{} {}", &caps["date"], &caps["time"]);
        let mtime = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M")
            .map_err(|_| self.error(line))?
            .and_utc()
            .timestamp();

        let mut record = Record::new(
            &caps["name"],
            InodeInfo::new(inode, self.device),
            InodeInfo::new(0, self.device),
            self.scan_time,
        );
        record.mode = Some(parse_mode(&caps["mode"]).ok_or_else(|| self.error(line))?);
        record.links = Some(number("links")?);
        record.uid = Some(u32::try_from(number("uid")?).map_err(|_| self.error(line))?);
        record.gid = Some(u32::try_from(number("gid")?).map_err(|_| self.error(line))?);
        record.size = Some(number("size")?);
        record.mtime = Some(mtime as f64);
        Ok(record)
    }

    fn matches<'l>(&self, pattern: &Regex, line: &'l str) -> Result<Captures<'l>, ScanError> {
        pattern.captures(line).ok_or_else(|| self.error(line))
    }

    fn error(&self, line: &str) -> ScanError {
        ScanError::Parse {
            line_no: self.line_no,
            state: self.state.into(),
            line: line.to_string(),
        }
    }
}

/// Producer for `tape://<namespace>/<path>` locators.
#[derive(Debug, Clone)]
pub struct TapeProducer {
    program: PathBuf,
}

impl TapeProducer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, locator: &Locator, flags: &str) -> Result<Command, ScanError> {
        let namespace = locator.namespace().ok_or_else(|| ScanError::InvalidLocator {
            locator: locator.to_string(),
            reason: "missing tape namespace".to_string(),
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.args(["-P", namespace, "dmls", flags, "--", locator.path()]);
        Ok(cmd)
    }

    fn command_error(&self, status: impl ToString) -> ScanError {
        ScanError::Command {
            program: self.program.display().to_string(),
            status: status.to_string(),
        }
    }
}

impl Producer for TapeProducer {
    fn scheme(&self) -> Scheme {
        Scheme::Tape
    }

    fn root_identity(&self, locator: &Locator) -> Result<Option<InodeInfo>, ScanError> {
        let output = self
            .command(locator, "-anid")?
            .stderr(Stdio::null())
            .output()
            .map_err(|e| self.command_error(e))?;

        if !output.status.success() {
            debug!(locator = %locator, status = %output.status, "Tape root lookup failed");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let device = namespace_device(locator.namespace().unwrap_or_default());
        Ok(patterns()
            .entry
            .captures(stdout.trim())
            .and_then(|caps| caps["inode"].parse().ok())
            .map(|inode| InodeInfo::new(inode, device)))
    }

    fn produce(&self, locator: &Locator, scan_time: f64) -> Result<RecordStream, ScanError> {
        let mut child = self
            .command(locator, "-aniR")?
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| self.command_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.command_error("stdout not captured"))?;

        let device = namespace_device(locator.namespace().unwrap_or_default());
        Ok(Box::new(TapeListing {
            producer: self.clone(),
            child,
            lines: BufReader::new(stdout).lines(),
            parser: ListingParser::new(device, scan_time),
            finished: false,
        }))
    }
}

/// Streaming state of one listing command.
struct TapeListing {
    producer: TapeProducer,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    parser: ListingParser,
    finished: bool,
}

impl TapeListing {
    fn fail(&mut self, err: ScanError) -> Option<Result<Record, ScanError>> {
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
        Some(Err(err))
    }
}

impl Iterator for TapeListing {
    type Item = Result<Record, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.lines.next() {
                Some(Ok(line)) => match self.parser.feed(&line) {
                    Ok(Some(record)) => return Some(Ok(record)),
                    Ok(None) => continue,
                    Err(err) => return self.fail(err),
                },
                Some(Err(e)) => {
                    let err = ScanError::Io {
                        path: self.producer.program.clone(),
                        source: e,
                    };
                    return self.fail(err);
                }
                None => {
                    self.finished = true;
                    return match self.child.wait() {
                        Ok(status) if status.success() => None,
                        Ok(status) => Some(Err(self.producer.command_error(status))),
                        Err(e) => Some(Err(self.producer.command_error(e))),
                    };
                }
            }
        }
    }
}

impl Drop for TapeListing {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
