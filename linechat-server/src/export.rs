//! Plain-text export of a port's chat history and statistics.
//!
//! The report is built from a [`ReportData`] snapshot and an export
//! timestamp. Given unchanged data, two exports differ only in the
//! `Exported:` line.

use std::fmt::Write as _;
use std::path::Path;

use crate::store::{ChatStore, MessageRecord, PortStats, StoreError, UserStats, now_timestamp};

const RULE_HEAVY: &str = "============================================================";
const RULE_LIGHT: &str = "------------------------------------------------------------";

/// Rendering switches for an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Follow each message with indented original and encoded lines.
    pub include_cipher: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_cipher: true,
        }
    }
}

/// Everything a report shows, read from the store in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportData {
    /// Port the data belongs to.
    pub port: u16,
    /// Keyword the messages were filtered by, if any.
    pub keyword: Option<String>,
    /// Messages in chronological order.
    pub messages: Vec<MessageRecord>,
    /// Per-user statistics.
    pub users: Vec<UserStats>,
    /// Connection totals.
    pub stats: PortStats,
}

impl ReportData {
    /// Reads the report data for `port`, narrowing messages to `keyword`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any of the underlying queries fail.
    pub fn collect(store: &ChatStore, port: u16, keyword: Option<&str>) -> Result<Self, StoreError> {
        Ok(Self {
            port,
            keyword: keyword.map(str::to_string),
            messages: store.history(port, keyword)?,
            users: store.user_stats(port)?,
            stats: store.port_stats(port)?,
        })
    }
}

/// Renders `data` as a report stamped with `exported_at`.
#[must_use]
pub fn render_report(data: &ReportData, options: ExportOptions, exported_at: &str) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "LineChat History Export - Port {}", data.port);
    let _ = writeln!(out, "Exported: {exported_at}");
    if let Some(keyword) = &data.keyword {
        let _ = writeln!(out, "Filter: {keyword}");
    }
    let _ = writeln!(out, "{RULE_HEAVY}");
    out.push('\n');

    if data.messages.is_empty() {
        out.push_str("(no messages)\n\n");
    }
    for msg in &data.messages {
        let _ = writeln!(out, "[{}] {}: {}", msg.timestamp, msg.sender, msg.plaintext);
        if options.include_cipher {
            let _ = writeln!(out, "    Original: {}", msg.plaintext);
            let _ = writeln!(out, "    Encrypted: {}", msg.ciphertext);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "User Statistics");
    let _ = writeln!(out, "{RULE_LIGHT}");
    for user in &data.users {
        let _ = writeln!(
            out,
            "{}: {} messages, {} connections, last login {}",
            user.username,
            user.message_count,
            user.connection_count,
            user.last_login.as_deref().unwrap_or("never"),
        );
    }
    out.push('\n');

    let _ = writeln!(out, "Connection Totals");
    let _ = writeln!(out, "{RULE_LIGHT}");
    let _ = writeln!(out, "Connects: {}", data.stats.connects);
    let _ = writeln!(out, "Disconnects: {}", data.stats.disconnects);

    out
}

impl ChatStore {
    /// Builds the full report for `port`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if reading the data fails.
    pub fn export_report(&self, port: u16, options: ExportOptions) -> Result<String, StoreError> {
        let data = ReportData::collect(self, port, None)?;
        Ok(render_report(&data, options, &now_timestamp()))
    }

    /// Builds the report for `port` with messages narrowed to `keyword`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if reading the data fails.
    pub fn export_filtered(
        &self,
        port: u16,
        keyword: &str,
        options: ExportOptions,
    ) -> Result<String, StoreError> {
        let data = ReportData::collect(self, port, Some(keyword))?;
        Ok(render_report(&data, options, &now_timestamp()))
    }

    /// Writes a report for `port` to `path`, filtered when `keyword` is set.
    ///
    /// Returns the number of messages exported.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be written, or a
    /// database error if reading fails.
    pub fn export_to_file(
        &self,
        path: &Path,
        port: u16,
        keyword: Option<&str>,
        options: ExportOptions,
    ) -> Result<usize, StoreError> {
        let data = ReportData::collect(self, port, keyword)?;
        let report = render_report(&data, options, &now_timestamp());
        std::fs::write(path, report).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), port, messages = data.messages.len(), "exported chat history");
        Ok(data.messages.len())
    }
}
