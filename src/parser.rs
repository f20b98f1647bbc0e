// src/parser.rs
//! Streaming interpreter for sqlmap console output.
//!
//! Each line is classified against the known `[LEVEL] ...` markers sqlmap
//! prints. The only state carried between lines is the current `Section`,
//! which disambiguates `retrieved:` lines. Markers are checked in a fixed
//! order and the first match wins.
//!
//! The interpreter is a plain accumulator: `feed` one line at a time while a
//! process is running, or `interpret` a finished list of lines, then `finish`.
//! Missing markers leave fields at their defaults; nothing here fails.

use chrono::Utc;
use log::trace;

use crate::models::{DatabaseInfo, ScanResult, ScanStatus, Vulnerability, UNKNOWN};

const TARGET_CONNECTION: &str = "[*] testing connection to the target URL";
const TARGET_TESTING_URL: &str = "[INFO] testing URL";
const TARGET_CONNECTION_INFO: &str = "[INFO] testing connection to the target URL";
const BACKEND_DBMS: &str = "[INFO] the back-end DBMS is";
const BANNER: &str = "[INFO] banner:";
const INJECTABLE_CRITICAL: &str = "[CRITICAL] sqlmap identified the following injection point(s):";
const INJECTABLE_INFO: &str = "[INFO] sqlmap identified the following injection point(s):";
const NOT_INJECTABLE: &str = "[CRITICAL] all tested parameters appear to be not injectable";
const PAYLOAD: &str = "[PAYLOAD]";
const FETCH_DATABASES: &str = "[INFO] fetching database names";
const FETCH_TABLES: &str = "[INFO] fetching tables for database:";
const FETCH_COLUMNS: &str = "[INFO] fetching columns for table";
const FETCH_CURRENT_USER: &str = "[INFO] fetching current user";
const FETCH_VERSION: &str = "[INFO] fetching database server version";
const RETRIEVED: &str = "[INFO] retrieved:";
const NO_INJECTION_POINT: &str = "[INFO] no injection point(s) found";
const CONFIRMING: &str = "[INFO] confirming that the parameter";
const PARAMETER: &str = "[INFO] parameter";
const FOUND_TOTAL: &str = "[INFO] found a total of";

/// Most recently opened multi-line context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    None,
    Vulnerability,
    NotVulnerable,
    Databases,
    UserInfo,
    VersionInfo,
}

/// Partially built result plus the carried section.
#[derive(Debug, Clone, Default)]
pub struct OutputInterpreter {
    section: Section,
    target: Option<String>,
    dbms: Option<String>,
    vulnerable: bool,
    vulnerabilities: Vec<Vulnerability>,
    database_info: DatabaseInfo,
    lines: Vec<String>,
}

impl OutputInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn is_vulnerable(&self) -> bool {
        self.vulnerable
    }

    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        &self.vulnerabilities
    }

    pub fn database_info(&self) -> &DatabaseInfo {
        &self.database_info
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Fold step: consumes the accumulator and returns the next one.
    pub fn step(mut self, line: &str) -> Self {
        self.feed(line);
        self
    }

    /// Records `line` in the raw output and classifies it.
    pub fn feed(&mut self, line: &str) {
        self.lines.push(line.to_string());
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.classify(line);
    }

    fn classify(&mut self, line: &str) {
        if line.contains(TARGET_CONNECTION)
            || line.contains(TARGET_TESTING_URL)
            || line.contains(TARGET_CONNECTION_INFO)
        {
            if let Some(url) = quoted(line) {
                self.target = Some(url.to_string());
            }
        } else if line.contains(BACKEND_DBMS) {
            let dbms = after_last(line, "is ").trim();
            self.dbms = Some(dbms.to_string());
            self.database_info.set("dbms", dbms);
        } else if line.contains(BANNER) {
            self.database_info.set("banner", after_last(line, "banner: ").trim());
        } else if line.contains(INJECTABLE_CRITICAL) || line.contains(INJECTABLE_INFO) {
            self.vulnerable = true;
            self.section = Section::Vulnerability;
        } else if line.contains(NOT_INJECTABLE) {
            self.vulnerable = false;
            self.section = Section::NotVulnerable;
        } else if line.contains(PAYLOAD) && self.section == Section::Vulnerability {
            if line.contains("Parameter:") {
                self.record_payload(line);
            }
        } else if line.contains(FETCH_DATABASES) {
            self.section = Section::Databases;
        } else if line.contains(FETCH_TABLES) {
            let db = strip_quotes(after_last(line, "database: "));
            self.database_info.database_mut(db);
        } else if line.contains(FETCH_COLUMNS) {
            self.record_columns(line);
        } else if line.contains(FETCH_CURRENT_USER) {
            self.section = Section::UserInfo;
        } else if line.contains(RETRIEVED) && self.section == Section::UserInfo {
            self.database_info.set("current_user", after_last(line, "retrieved: ").trim());
        } else if line.contains(FETCH_VERSION) {
            self.section = Section::VersionInfo;
        } else if line.contains(RETRIEVED) && self.section == Section::VersionInfo {
            self.database_info.set("version", after_last(line, "retrieved: ").trim());
        } else if line.contains(RETRIEVED) {
            // Retrieval anywhere else counts as evidence of exploitability.
            // Known approximation: unrelated retrievals also trip this.
            if !self.vulnerable {
                self.vulnerable = true;
            }
        } else if line.contains(NO_INJECTION_POINT) {
            self.vulnerable = false;
        } else if (line.contains(CONFIRMING) && line.contains("is injectable"))
            || (line.contains(PARAMETER) && line.contains("is vulnerable"))
            || (line.contains(FOUND_TOTAL) && line.contains("injection point(s)"))
        {
            self.vulnerable = true;
        }
    }

    fn record_payload(&mut self, line: &str) {
        let Some(parameter) = after_last(line, "Parameter: ").split_whitespace().next() else {
            return;
        };
        trace!("Injection point on parameter {}", parameter);
        self.vulnerabilities.push(Vulnerability {
            parameter: parameter.to_string(),
            kind: UNKNOWN.to_string(),
            title: "SQL Injection".to_string(),
            payload: line.to_string(),
        });
    }

    /// `fetching columns for table 'T' in database 'D'`
    fn record_columns(&mut self, line: &str) {
        if !(line.contains("table ") && line.contains("database")) {
            return;
        }
        let table_info = after_last(line, "table ");
        let Some((table, _)) = table_info.split_once(" in database") else {
            return;
        };
        let table = strip_quotes(table);
        let db = strip_quotes(after_last(table_info, "database "));
        self.database_info.database_mut(db).add_table(table);
    }

    /// Builds the final result. `command` is searched for a target when the
    /// output never named one.
    pub fn finish(self, command: &[String]) -> ScanResult {
        let target = self
            .target
            .or_else(|| target_from_command(command))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let summary = if self.vulnerable {
            match self.vulnerabilities.len() {
                0 => "SQL injection vulnerability detected".to_string(),
                n => format!("Found {} SQL injection vulnerability(ies)", n),
            }
        } else {
            "No SQL injection vulnerabilities found".to_string()
        };

        ScanResult {
            status: ScanStatus::Completed,
            target,
            dbms: self.dbms.unwrap_or_else(|| UNKNOWN.to_string()),
            vulnerable: self.vulnerable,
            vulnerabilities: self.vulnerabilities,
            database_info: self.database_info,
            summary,
            raw_output: self.lines.join("\n"),
            exit_code: None,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Interprets a complete line sequence.
pub fn interpret<I, S>(lines: I, command: &[String]) -> ScanResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .fold(OutputInterpreter::new(), |acc, line| acc.step(line.as_ref()))
        .finish(command)
}

/// First bare http(s) token, or the value following `-u`, whichever comes first.
fn target_from_command(command: &[String]) -> Option<String> {
    for (i, arg) in command.iter().enumerate() {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            return Some(arg.clone());
        }
        if arg == "-u" {
            if let Some(next) = command.get(i + 1) {
                return Some(next.clone());
            }
        }
    }
    None
}

/// Text between the first and last single quote.
fn quoted(line: &str) -> Option<&str> {
    let start = line.find('\'')? + 1;
    let end = line.rfind('\'')?;
    (end > start).then(|| &line[start..end])
}

/// Text after the last occurrence of `sep`, or the whole line when absent.
fn after_last<'a>(line: &'a str, sep: &str) -> &'a str {
    line.rsplit(sep).next().unwrap_or(line)
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> ScanResult {
        interpret(lines.iter().copied(), &[])
    }

    #[test]
    fn test_backend_dbms() {
        let result = run(&["[INFO] the back-end DBMS is MySQL"]);
        assert_eq!(result.dbms, "MySQL");
        assert_eq!(result.database_info.get("dbms"), Some("MySQL"));
    }

    #[test]
    fn test_injection_point_with_payload() {
        let result = run(&[
            "[CRITICAL] sqlmap identified the following injection point(s):",
            "[PAYLOAD] Parameter: id (GET) Type: boolean-based blind",
        ]);
        assert!(result.vulnerable);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.vulnerabilities[0].parameter, "id");
        assert_eq!(result.vulnerabilities[0].kind, "Unknown");
        assert_eq!(result.vulnerabilities[0].title, "SQL Injection");
        assert_eq!(result.summary, "Found 1 SQL injection vulnerability(ies)");
    }

    #[test]
    fn test_payload_outside_vulnerability_section_ignored() {
        let result = run(&["[PAYLOAD] Parameter: id (GET)"]);
        assert!(result.vulnerabilities.is_empty());
        assert!(!result.vulnerable);
    }

    #[test]
    fn test_not_injectable() {
        let result = run(&["[CRITICAL] all tested parameters appear to be not injectable"]);
        assert!(!result.vulnerable);
        assert_eq!(result.summary, "No SQL injection vulnerabilities found");
    }

    #[test]
    fn test_tables_and_columns_dedup() {
        let result = run(&[
            "[INFO] fetching tables for database: 'shop'",
            "[INFO] fetching columns for table 'users' in database 'shop'",
            "[INFO] fetching columns for table 'users' in database 'shop'",
        ]);
        assert_eq!(result.database_info.databases["shop"].tables, vec!["users"]);
    }

    #[test]
    fn test_columns_create_missing_database() {
        let result = run(&[
            "[INFO] fetching columns for table 'orders' in database 'crm'",
            "[INFO] fetching columns for table 'accounts' in database 'crm'",
        ]);
        assert_eq!(result.database_info.databases["crm"].tables, vec!["orders", "accounts"]);
    }

    #[test]
    fn test_retrieved_depends_on_section() {
        let result = run(&[
            "[INFO] fetching current user",
            "[INFO] retrieved: root@localhost",
            "[INFO] fetching database server version",
            "[INFO] retrieved: 8.0.36",
        ]);
        assert_eq!(result.database_info.get("current_user"), Some("root@localhost"));
        assert_eq!(result.database_info.get("version"), Some("8.0.36"));
        assert!(!result.vulnerable);
    }

    #[test]
    fn test_retrieved_elsewhere_implies_vulnerable() {
        let result = run(&["[INFO] retrieved: 1"]);
        assert!(result.vulnerable);
        assert_eq!(result.summary, "SQL injection vulnerability detected");
    }

    #[test]
    fn test_target_from_quoted_line() {
        let result = run(&["[INFO] testing connection to the target URL 'http://t.local/?id=1'"]);
        assert_eq!(result.target, "http://t.local/?id=1");
    }

    #[test]
    fn test_target_fallback_from_command() {
        let command: Vec<String> = ["sqlmap", "-u", "t.local/?id=1", "--batch"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = interpret(Vec::<String>::new(), &command);
        assert_eq!(result.target, "t.local/?id=1");

        let command: Vec<String> = ["sqlmap", "--data", "x", "https://t.local/"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(interpret(Vec::<String>::new(), &command).target, "https://t.local/");
        assert_eq!(interpret(Vec::<String>::new(), &[]).target, UNKNOWN);
    }

    #[test]
    fn test_no_injection_point_clears_flag() {
        let result = run(&["[INFO] retrieved: 1", "[INFO] no injection point(s) found"]);
        assert!(!result.vulnerable);
    }

    #[test]
    fn test_additional_indicators() {
        assert!(run(&["[INFO] confirming that the parameter 'id' is injectable"]).vulnerable);
        assert!(run(&["[INFO] parameter 'q' is vulnerable"]).vulnerable);
        assert!(run(&["[INFO] found a total of 2 injection point(s)"]).vulnerable);
    }

    #[test]
    fn test_raw_output_keeps_every_line() {
        let result = run(&["  leading", "", "[INFO] banner: '8.0.36'"]);
        assert_eq!(result.raw_output, "  leading\n\n[INFO] banner: '8.0.36'");
        assert_eq!(result.database_info.get("banner"), Some("'8.0.36'"));
    }

    #[test]
    fn test_fold_is_restartable() {
        let lines = ["[INFO] the back-end DBMS is PostgreSQL"];
        let a = run(&lines);
        let b = run(&lines);
        assert_eq!(a.dbms, b.dbms);
        assert_eq!(a.database_info, b.database_info);
    }

    #[test]
    fn test_section_tracking() {
        let acc = OutputInterpreter::new()
            .step("[INFO] fetching database names")
            .step("available databases [2]:");
        assert_eq!(acc.section(), Section::Databases);
    }
}
