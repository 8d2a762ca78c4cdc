//! Translation of statsite sink output into the collector protocol.
//!
//! Statsite writes one record per line in the form `<kind>.<key>|<value>|<timestamp>`. Every
//! record with a known kind is written to the collector as
//! `<action> <prefix><key><postfix> <value> <timestamp>`. Values and timestamps are passed through
//! verbatim.

use std::fmt::{self, Write as _};
use std::io::{self, BufRead, Read, Write};

use relay_config::Config;

use crate::action::{Action, ActionTable};

/// A gauge value to be re-submitted to statsite after the flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GaugeSample {
    /// The key without kind, prefix or postfix.
    pub key: String,
    /// The value as reported by statsite.
    pub value: String,
}

impl fmt::Display for GaugeSample {
    /// Formats the sample as a StatsD gauge.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}|g", self.key, self.value)
    }
}

/// Summary of a single pass over the input stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunnelReport {
    /// The number of records written to the collector.
    pub forwarded: usize,
    /// The number of lines skipped because they were malformed or of an unknown kind.
    pub dropped: usize,
    /// Gauge values collected for feedback, in input order.
    pub gauges: Vec<GaugeSample>,
}

/// An error that aborts the forwarding pass.
#[derive(Debug, thiserror::Error)]
pub enum FunnelError {
    /// Reading the input stream failed.
    #[error("failed to read input stream")]
    Read(#[source] io::Error),
    /// An input line exceeded the configured maximum size.
    #[error("input line exceeds {0} bytes")]
    LineTooLong(usize),
    /// Writing a record to the collector failed.
    #[error("failed to write to collector")]
    Write(#[source] io::Error),
}

impl FunnelError {
    /// Returns `true` if the pass failed while reading input, as opposed to writing output.
    pub fn is_read_error(&self) -> bool {
        matches!(self, Self::Read(_) | Self::LineTooLong(_))
    }
}

/// A parsed statsite record that is forwarded to the collector.
struct Record<'a> {
    action: Action,
    key: &'a str,
    value: &'a str,
    timestamp: &'a str,
}

/// Removes the line terminator, including a carriage return before it.
fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Forwards statsite records to a collector session and collects gauges for feedback.
///
/// A `Funnel` is used for a single pass. Lines that do not consist of exactly three `|`-separated
/// fields, keys without a kind and unknown kinds are skipped silently.
pub struct Funnel<'a> {
    actions: &'a ActionTable,
    prefix: &'a str,
    postfix: &'a str,
    max_line_size: usize,
    report: FunnelReport,
    buffer: String,
}

impl<'a> Funnel<'a> {
    /// Creates a funnel with the key rewriting and limits of the given config.
    pub fn new(config: &'a Config, actions: &'a ActionTable) -> Self {
        Self {
            actions,
            prefix: config.key_prefix(),
            postfix: config.key_postfix(),
            max_line_size: config.max_line_size(),
            report: FunnelReport::default(),
            buffer: String::new(),
        }
    }

    /// Returns the gauges collected so far.
    pub fn gauges(&self) -> &[GaugeSample] {
        &self.report.gauges
    }

    /// Consumes the funnel and returns the summary of the pass.
    pub fn finish(self) -> FunnelReport {
        self.report
    }

    /// Reads all lines from `input` and writes each accepted record to `output` immediately.
    ///
    /// Stops at the end of the input, or at the first read or write error. Gauges collected up to
    /// an error remain available through [`gauges`](Self::gauges).
    pub fn forward<R, W>(&mut self, mut input: R, mut output: W) -> Result<(), FunnelError>
    where
        R: BufRead,
        W: Write,
    {
        // Room for the largest permitted line and its `\r\n` terminator.
        let read_limit = self.max_line_size as u64 + 2;
        let mut line = Vec::new();

        loop {
            line.clear();

            let read = (&mut input)
                .take(read_limit)
                .read_until(b'\n', &mut line)
                .map_err(FunnelError::Read)?;

            if read == 0 {
                return Ok(());
            }

            let truncated = read as u64 == read_limit && !line.ends_with(b"\n");
            let content = trim_newline(&line);
            if truncated || content.len() > self.max_line_size {
                return Err(FunnelError::LineTooLong(self.max_line_size));
            }

            let Ok(content) = std::str::from_utf8(content) else {
                self.report.dropped += 1;
                continue;
            };

            self.forward_line(content, &mut output)?;
        }
    }

    fn forward_line<W: Write>(&mut self, line: &str, output: &mut W) -> Result<(), FunnelError> {
        let Some(record) = self.parse(line) else {
            self.report.dropped += 1;
            return Ok(());
        };

        self.buffer.clear();
        writeln!(
            self.buffer,
            "{} {}{}{} {} {}",
            record.action, self.prefix, record.key, self.postfix, record.value, record.timestamp
        )
        .ok();

        output
            .write_all(self.buffer.as_bytes())
            .map_err(FunnelError::Write)?;

        self.report.forwarded += 1;
        if record.action.is_feedback() {
            self.report.gauges.push(GaugeSample {
                key: record.key.to_owned(),
                value: record.value.to_owned(),
            });
        }

        Ok(())
    }

    fn parse<'l>(&self, line: &'l str) -> Option<Record<'l>> {
        let mut fields = line.splitn(3, '|');
        let (Some(prefixed_key), Some(value), Some(timestamp)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return None;
        };

        let resolved = self.actions.resolve(prefixed_key).ok()?;

        Some(Record {
            action: resolved.action?,
            key: resolved.key,
            value,
            timestamp,
        })
    }
}
