// src/reporting/cicd.rs
//! CI/CD Report Generation
//!
//! SARIF 2.1.0 and JUnit XML renderings of a `ScanResult`, for code-scanning
//! dashboards and test-report collectors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::models::{ScanResult, ScanStatus, Vulnerability};

const RULE_ID: &str = "SQLI001";
const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Sarif,
    Junit,
}

impl ReportFormat {
    /// Lenient: anything unrecognised is JSON.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sarif" => ReportFormat::Sarif,
            "junit" | "xml" => ReportFormat::Junit,
            _ => ReportFormat::Json,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Sarif => "sarif",
            ReportFormat::Junit => "xml",
        }
    }
}

// ============================================================================
// SARIF 2.1.0
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifReport {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub version: String,
    pub runs: Vec<SarifRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifRun {
    pub tool: SarifTool,
    pub results: Vec<SarifResult>,
    pub invocations: Vec<SarifInvocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifTool {
    pub driver: SarifDriver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifDriver {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub information_uri: Option<String>,
    pub rules: Vec<SarifRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifRule {
    pub id: String,
    pub short_description: SarifMessage,
    pub full_description: SarifMessage,
    pub help: SarifHelp,
    pub default_configuration: SarifRuleConfig,
    pub properties: SarifRuleProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifMessage {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifHelp {
    pub text: String,
    pub markdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifRuleConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifRuleProperties {
    pub security_severity: String,
    pub tags: Vec<String>,
}

/// One finding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifResult {
    pub rule_id: String,
    pub level: String,
    pub message: SarifMessage,
    pub locations: Vec<SarifLocation>,
    pub partial_fingerprints: SarifFingerprints,
    pub properties: SarifResultProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifLocation {
    pub physical_location: SarifPhysicalLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifPhysicalLocation {
    pub artifact_location: SarifArtifactLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<SarifRegion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifArtifactLocation {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifRegion {
    pub snippet: SarifSnippet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifSnippet {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifFingerprints {
    pub primary_location_line_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifResultProperties {
    pub parameter: String,
    pub technique: String,
    pub dbms: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifInvocation {
    pub execution_successful: bool,
    pub end_time_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl SarifReport {
    pub fn from_result(result: &ScanResult, tool_version: &str) -> Self {
        let results = result
            .vulnerabilities
            .iter()
            .map(|v| sarif_result(result, v))
            .collect();

        SarifReport {
            schema: SARIF_SCHEMA.to_string(),
            version: "2.1.0".to_string(),
            runs: vec![SarifRun {
                tool: SarifTool {
                    driver: SarifDriver {
                        name: "sqlmapper".to_string(),
                        version: tool_version.to_string(),
                        information_uri: Some("https://sqlmap.org".to_string()),
                        rules: vec![sqli_rule()],
                    },
                },
                results,
                invocations: vec![SarifInvocation {
                    execution_successful: result.status == ScanStatus::Completed,
                    end_time_utc: result.timestamp.to_rfc3339(),
                    exit_code: result.exit_code,
                }],
            }],
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize SARIF report")?;
        fs::write(path.as_ref(), json).context("Failed to write SARIF file")?;
        Ok(())
    }
}

fn sqli_rule() -> SarifRule {
    SarifRule {
        id: RULE_ID.to_string(),
        short_description: SarifMessage {
            text: "SQL Injection Vulnerability".to_string(),
        },
        full_description: SarifMessage {
            text: "A request parameter is passed into a database query without neutralisation.".to_string(),
        },
        help: SarifHelp {
            text: "Use parameterized queries or prepared statements to prevent SQL injection.".to_string(),
            markdown: "Use **parameterized queries** or **prepared statements** to prevent SQL injection."
                .to_string(),
        },
        default_configuration: SarifRuleConfig {
            level: "error".to_string(),
        },
        properties: SarifRuleProperties {
            security_severity: "9.8".to_string(),
            tags: vec![
                "security".to_string(),
                "sql-injection".to_string(),
                "owasp-a03".to_string(),
            ],
        },
    }
}

fn sarif_result(result: &ScanResult, vuln: &Vulnerability) -> SarifResult {
    SarifResult {
        rule_id: RULE_ID.to_string(),
        level: "error".to_string(),
        message: SarifMessage {
            text: format!(
                "SQL Injection found in parameter '{}' at {}",
                vuln.parameter, result.target
            ),
        },
        locations: vec![SarifLocation {
            physical_location: SarifPhysicalLocation {
                artifact_location: SarifArtifactLocation {
                    uri: result.target.clone(),
                },
                region: (!vuln.payload.is_empty()).then(|| SarifRegion {
                    snippet: SarifSnippet {
                        text: vuln.payload.clone(),
                    },
                }),
            },
        }],
        partial_fingerprints: SarifFingerprints {
            primary_location_line_hash: fingerprint(&result.target, &vuln.parameter),
        },
        properties: SarifResultProperties {
            parameter: vuln.parameter.clone(),
            technique: vuln.kind.clone(),
            dbms: result.dbms.clone(),
        },
    }
}

/// Hex SHA-256 of `target:parameter`
pub fn fingerprint(target: &str, parameter: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", target, parameter).as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

// ============================================================================
// JUnit XML
// ============================================================================

#[derive(Debug, Clone)]
pub struct JunitReport {
    pub test_suites: Vec<JunitTestSuite>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JunitTestSuite {
    pub name: String,
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub time: f64,
    pub test_cases: Vec<JunitTestCase>,
}

#[derive(Debug, Clone)]
pub struct JunitTestCase {
    pub name: String,
    pub classname: String,
    pub failure: Option<JunitFailure>,
}

#[derive(Debug, Clone)]
pub struct JunitFailure {
    pub message: String,
    pub failure_type: String,
    pub content: String,
}

impl JunitReport {
    /// One suite for the scanned target. Every vulnerability is a failing
    /// case; a clean scan is a single passing case. A scan that did not
    /// complete is reported as an error.
    pub fn from_result(result: &ScanResult, scan_duration_secs: f64) -> Self {
        let mut test_cases: Vec<JunitTestCase> = result
            .vulnerabilities
            .iter()
            .map(|v| JunitTestCase {
                name: format!("SQLi in param '{}'", v.parameter),
                classname: result.target.clone(),
                failure: Some(JunitFailure {
                    message: format!("SQL Injection vulnerability found in parameter '{}'", v.parameter),
                    failure_type: "SecurityVulnerability".to_string(),
                    content: format!(
                        "Technique: {}\nTitle: {}\nPayload: {}\nDBMS: {}",
                        v.kind, v.title, v.payload, result.dbms
                    ),
                }),
            })
            .collect();

        if test_cases.is_empty() && result.vulnerable {
            test_cases.push(JunitTestCase {
                name: "SQL injection".to_string(),
                classname: result.target.clone(),
                failure: Some(JunitFailure {
                    message: result.summary.clone(),
                    failure_type: "SecurityVulnerability".to_string(),
                    content: format!("DBMS: {}", result.dbms),
                }),
            });
        }
        if test_cases.is_empty() {
            test_cases.push(JunitTestCase {
                name: "SQL injection".to_string(),
                classname: result.target.clone(),
                failure: None,
            });
        }

        let failures = test_cases.iter().filter(|c| c.failure.is_some()).count() as u32;
        let errors = u32::from(result.status != ScanStatus::Completed);

        JunitReport {
            test_suites: vec![JunitTestSuite {
                name: result.target.clone(),
                tests: test_cases.len() as u32,
                failures,
                errors,
                time: scan_duration_secs,
                test_cases,
            }],
            timestamp: result.timestamp,
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        // Writing into a String cannot fail.
        let _ = self.render(&mut xml);
        xml
    }

    fn render(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            out,
            r#"<testsuites name="sqlmapper scan" timestamp="{}">"#,
            self.timestamp.to_rfc3339()
        )?;

        for suite in &self.test_suites {
            writeln!(
                out,
                r#"  <testsuite name="{}" tests="{}" failures="{}" errors="{}" time="{:.3}">"#,
                xml_escape(&suite.name),
                suite.tests,
                suite.failures,
                suite.errors,
                suite.time
            )?;

            for case in &suite.test_cases {
                match &case.failure {
                    Some(failure) => {
                        writeln!(
                            out,
                            r#"    <testcase name="{}" classname="{}">"#,
                            xml_escape(&case.name),
                            xml_escape(&case.classname)
                        )?;
                        writeln!(
                            out,
                            r#"      <failure message="{}" type="{}">{}</failure>"#,
                            xml_escape(&failure.message),
                            xml_escape(&failure.failure_type),
                            xml_escape(&failure.content)
                        )?;
                        writeln!(out, "    </testcase>")?;
                    }
                    None => writeln!(
                        out,
                        r#"    <testcase name="{}" classname="{}"/>"#,
                        xml_escape(&case.name),
                        xml_escape(&case.classname)
                    )?,
                }
            }

            writeln!(out, "  </testsuite>")?;
        }

        writeln!(out, "</testsuites>")
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_xml()).context("Failed to write JUnit XML file")?;
        Ok(())
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
