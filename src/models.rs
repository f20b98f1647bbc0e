// src/models.rs
//! Scan request and scan result data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Sentinel used for target/DBMS fields the output never revealed.
pub const UNKNOWN: &str = "Unknown";

/// The system under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Target URL (`-u`)
    pub url: Option<String>,

    /// Captured HTTP request file (`-r`)
    pub request_file: Option<PathBuf>,

    /// POST body
    pub data: Option<String>,

    /// Cookie header value
    pub cookies: Option<String>,

    /// Free-form extra headers block
    pub headers: Option<String>,

    #[serde(default)]
    pub random_user_agent: bool,
}

impl Target {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn request_file(path: impl Into<PathBuf>) -> Self {
        Self {
            request_file: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Injection technique family, one letter each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Technique {
    BooleanBlind,
    ErrorBased,
    Union,
    Stacked,
    TimeBlind,
    InlineQuery,
}

impl Technique {
    pub const ALL: [Technique; 6] = [
        Technique::BooleanBlind,
        Technique::ErrorBased,
        Technique::Union,
        Technique::Stacked,
        Technique::TimeBlind,
        Technique::InlineQuery,
    ];

    pub fn letter(&self) -> char {
        match self {
            Technique::BooleanBlind => 'B',
            Technique::ErrorBased => 'E',
            Technique::Union => 'U',
            Technique::Stacked => 'S',
            Technique::TimeBlind => 'T',
            Technique::InlineQuery => 'Q',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.letter() == letter)
    }
}

/// Enumeration goals. Declaration order is the order flags are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    Banner,
    CurrentUser,
    CurrentDb,
    Hostname,
    IsDba,
    Users,
    Passwords,
    Privileges,
    Roles,
    Dbs,
    Tables,
    Columns,
    Schema,
}

impl Detection {
    pub const ALL: [Detection; 13] = [
        Detection::Banner,
        Detection::CurrentUser,
        Detection::CurrentDb,
        Detection::Hostname,
        Detection::IsDba,
        Detection::Users,
        Detection::Passwords,
        Detection::Privileges,
        Detection::Roles,
        Detection::Dbs,
        Detection::Tables,
        Detection::Columns,
        Detection::Schema,
    ];

    /// sqlmap command line flag for this goal
    pub fn flag(&self) -> &'static str {
        match self {
            Detection::Banner => "--banner",
            Detection::CurrentUser => "--current-user",
            Detection::CurrentDb => "--current-db",
            Detection::Hostname => "--hostname",
            Detection::IsDba => "--is-dba",
            Detection::Users => "--users",
            Detection::Passwords => "--passwords",
            Detection::Privileges => "--privileges",
            Detection::Roles => "--roles",
            Detection::Dbs => "--dbs",
            Detection::Tables => "--tables",
            Detection::Columns => "--columns",
            Detection::Schema => "--schema",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Detection::Banner => "banner",
            Detection::CurrentUser => "current_user",
            Detection::CurrentDb => "current_db",
            Detection::Hostname => "hostname",
            Detection::IsDba => "is_dba",
            Detection::Users => "users",
            Detection::Passwords => "passwords",
            Detection::Privileges => "privileges",
            Detection::Roles => "roles",
            Detection::Dbs => "dbs",
            Detection::Tables => "tables",
            Detection::Columns => "columns",
            Detection::Schema => "schema",
        }
    }
}

impl FromStr for Detection {
    type Err = String;

    /// Accepts `current_user`, `current-user` and `--current-user`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches("--").replace('-', "_").to_lowercase();
        Detection::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| format!("unknown detection option: {}", s))
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable scan parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// 1-3
    pub risk: u8,

    /// 1-5
    pub level: u8,

    /// 1-10
    pub threads: u8,

    /// Seconds, 1-300
    pub timeout: u32,

    pub retries: u32,

    /// Technique letters as requested. Kept raw so out-of-alphabet letters
    /// can be reported by validation.
    pub techniques: Vec<char>,

    pub dbms: Option<String>,

    pub detection: BTreeSet<Detection>,

    pub proxy: Option<String>,

    pub tor: bool,

    pub tor_port: Option<u16>,

    /// Seconds between requests
    pub delay: f64,

    pub skip_url_encode: bool,

    pub skip_static: bool,

    /// Tamper script identifier(s), comma-separated as sqlmap expects
    pub tamper: Option<String>,

    /// Target OS hint
    pub os: Option<String>,

    /// Stored for completeness; batch mode is forced on in every command.
    pub batch: bool,

    pub skip_waf: bool,

    pub fresh_queries: bool,

    /// Raw free-form arguments appended verbatim after tokenization
    pub custom_args: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            risk: 1,
            level: 1,
            threads: 1,
            timeout: 30,
            retries: 3,
            techniques: Vec::new(),
            dbms: None,
            detection: BTreeSet::new(),
            proxy: None,
            tor: false,
            tor_port: None,
            delay: 0.0,
            skip_url_encode: false,
            skip_static: false,
            tamper: None,
            os: None,
            batch: true,
            skip_waf: false,
            fresh_queries: false,
            custom_args: None,
        }
    }
}

impl Options {
    /// Technique string as passed to `--technique`: valid letters only,
    /// duplicates collapsed, canonical B-E-U-S-T-Q order.
    pub fn technique_string(&self) -> String {
        let requested: BTreeSet<Technique> = self
            .techniques
            .iter()
            .filter_map(|c| Technique::from_letter(*c))
            .collect();
        requested.iter().map(Technique::letter).collect()
    }
}

/// Terminal outcome of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

/// One injection point reported by the tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub parameter: String,

    /// Technique label, "Unknown" when the output did not say
    #[serde(rename = "type")]
    pub kind: String,

    pub title: String,

    /// The raw evidence line
    pub payload: String,
}

/// Tables discovered for one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub tables: Vec<String>,
}

impl DatabaseEntry {
    /// Appends `table` unless already present. Returns true if added.
    pub fn add_table(&mut self, table: &str) -> bool {
        if self.tables.iter().any(|t| t == table) {
            return false;
        }
        self.tables.push(table.to_string());
        true
    }
}

/// Enumerated back-end information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Scalar facts keyed by category ("dbms", "banner", "current_user", "version", ...)
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub databases: BTreeMap<String, DatabaseEntry>,
}

impl DatabaseInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Returns the entry for `name`, creating an empty one if needed.
    pub fn database_mut(&mut self, name: &str) -> &mut DatabaseEntry {
        self.databases.entry(name.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.databases.is_empty()
    }
}

/// Final structured outcome of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    pub target: String,
    pub dbms: String,
    pub vulnerable: bool,
    pub vulnerabilities: Vec<Vulnerability>,
    pub database_info: DatabaseInfo,
    pub summary: String,
    pub raw_output: String,

    /// Exit code of the child when it exited on its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    /// A failure outcome that did not go through interpretation.
    pub fn failed(message: impl Into<String>, exit_code: Option<i32>, lines: &[String]) -> Self {
        let message = message.into();
        Self {
            status: ScanStatus::Failed,
            summary: message.clone(),
            error: Some(message),
            exit_code,
            ..Self::blank(lines)
        }
    }

    pub fn cancelled(lines: &[String]) -> Self {
        Self {
            status: ScanStatus::Cancelled,
            summary: "Scan cancelled".to_string(),
            ..Self::blank(lines)
        }
    }

    fn blank(lines: &[String]) -> Self {
        Self {
            status: ScanStatus::Completed,
            target: UNKNOWN.to_string(),
            dbms: UNKNOWN.to_string(),
            vulnerable: false,
            vulnerabilities: Vec::new(),
            database_info: DatabaseInfo::default(),
            summary: String::new(),
            raw_output: lines.join("\n"),
            exit_code: None,
            error: None,
            timestamp: Utc::now(),
        }
    }
}
