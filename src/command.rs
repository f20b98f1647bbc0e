// src/command.rs
//! Invocation Builder
//!
//! Maps a validated `Target` + `Options` pair onto the sqlmap argument vector,
//! and renders that vector as a shell-quoted string for display.

use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::models::{Options, Target, Technique};

/// Name looked up on the system search path
const TOOL_NAME: &str = "sqlmap";

/// Relative locations tried after the search path
const RELATIVE_CANDIDATES: &[&str] = &["sqlmap.py", "./sqlmap.py", "../sqlmap.py", "sqlmap/sqlmap.py"];

/// How the external tool is located and launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Explicit executable or script path. Skips discovery when set.
    pub executable: Option<String>,

    /// Interpreter used when the tool is a `.py` script
    pub interpreter: String,

    /// Directory of the packaged distribution, when running from one
    pub bundle_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            executable: None,
            interpreter: "python".to_string(),
            bundle_dir: None,
        }
    }
}

/// Fully resolved argument vector. The first element is the program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCommand {
    args: Vec<String>,
}

impl ScanCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Everything after the program
    pub fn arguments(&self) -> &[String] {
        self.args.get(1..).unwrap_or(&[])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Occurrences of an exact token
    pub fn count(&self, token: &str) -> usize {
        self.args.iter().filter(|a| *a == token).count()
    }

    /// Shell-quoted rendering, for humans only.
    pub fn display_string(&self) -> String {
        self.args
            .iter()
            .map(|a| shlex::try_quote(a).map_or_else(|_| a.clone(), |q| q.into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// Builds sqlmap invocations. The executable is resolved once, at construction.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    config: ToolConfig,
    executable: String,
}

impl InvocationBuilder {
    pub fn new(config: ToolConfig) -> Self {
        let executable = resolve_executable(&config);
        debug!("Resolved sqlmap executable: {}", executable);
        Self { config, executable }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Target args, then option args, then raw free-form args.
    pub fn build(&self, target: &Target, options: &Options) -> ScanCommand {
        let mut args = self.base_invocation();
        args.extend(target_args(target));
        args.extend(option_args(options));
        ScanCommand { args }
    }

    pub fn render_display_string(&self, target: &Target, options: &Options) -> String {
        self.build(target, options).display_string()
    }

    pub fn validate_target(target: &Target) -> Vec<String> {
        let mut errors = Vec::new();

        let has_url = target.url.as_deref().is_some_and(|u| !u.is_empty());
        let has_file = target
            .request_file
            .as_deref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if !has_url && !has_file {
            errors.push("Either URL or request file must be specified".to_string());
        }

        if let Some(url) = &target.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push("URL must start with http:// or https://".to_string());
            }
        }

        if let Some(path) = &target.request_file {
            if !path.is_file() {
                errors.push("Request file does not exist".to_string());
            }
        }

        errors
    }

    pub fn validate_options(options: &Options) -> Vec<String> {
        let mut errors = Vec::new();

        if !(1..=3).contains(&options.risk) {
            errors.push("Risk level must be between 1 and 3".to_string());
        }
        if !(1..=5).contains(&options.level) {
            errors.push("Level must be between 1 and 5".to_string());
        }
        if !(1..=10).contains(&options.threads) {
            errors.push("Threads must be between 1 and 10".to_string());
        }
        if !(1..=300).contains(&options.timeout) {
            errors.push("Timeout must be between 1 and 300 seconds".to_string());
        }
        for letter in &options.techniques {
            if Technique::from_letter(*letter).is_none() {
                errors.push(format!("Invalid technique: {}", letter));
            }
        }
        if !options.delay.is_finite() || options.delay < 0.0 {
            errors.push("Delay must be a non-negative number of seconds".to_string());
        }

        errors
    }

    fn base_invocation(&self) -> Vec<String> {
        if self.executable.ends_with(".py") {
            vec![self.config.interpreter.clone(), self.executable.clone()]
        } else {
            vec![self.executable.clone()]
        }
    }
}

/// Locates sqlmap: explicit path, search path, bundled locations, relative
/// locations, then the bare name. Never fails; existence is checked at spawn.
pub fn resolve_executable(config: &ToolConfig) -> String {
    if let Some(explicit) = &config.executable {
        return explicit.clone();
    }

    if let Some(path) = env::var_os("PATH") {
        if let Some(found) = find_in_path(TOOL_NAME, &path) {
            return found.to_string_lossy().into_owned();
        }
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(bundle) = &config.bundle_dir {
        candidates.extend(bundled_candidates(bundle));
    }
    candidates.extend(RELATIVE_CANDIDATES.iter().map(PathBuf::from));

    candidates
        .into_iter()
        .find(|c| is_executable(c))
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_else(|| TOOL_NAME.to_string())
}

fn bundled_candidates(bundle: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(root) = bundle.parent().and_then(Path::parent) {
        out.push(root.join("sqlmap.py"));
        out.push(root.join("sqlmap").join("sqlmap.py"));
    }
    out.push(bundle.join("sqlmap.py"));
    out.push(bundle.join("..").join("sqlmap.py"));
    out.push(bundle.join("..").join("sqlmap").join("sqlmap.py"));
    out
}

fn find_in_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Python scripts only need to exist; anything else needs an exec bit.
fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    if path.extension().is_some_and(|e| e == "py") {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn target_args(target: &Target) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(url) = &target.url {
        push_pair(&mut args, "-u", url);
    }
    if let Some(file) = &target.request_file {
        push_pair(&mut args, "-r", &file.to_string_lossy());
    }
    if let Some(data) = &target.data {
        push_pair(&mut args, "--data", data);
    }
    if let Some(cookies) = &target.cookies {
        push_pair(&mut args, "--cookie", cookies);
    }
    if let Some(headers) = &target.headers {
        push_pair(&mut args, "--headers", headers);
    }
    if target.random_user_agent {
        args.push("--random-agent".to_string());
    }

    args
}

fn option_args(options: &Options) -> Vec<String> {
    let mut args = Vec::new();

    push_pair(&mut args, "--risk", &options.risk.to_string());
    push_pair(&mut args, "--level", &options.level.to_string());
    push_pair(&mut args, "--threads", &options.threads.to_string());
    push_pair(&mut args, "--timeout", &options.timeout.to_string());
    push_pair(&mut args, "--retries", &options.retries.to_string());

    let techniques = options.technique_string();
    if !techniques.is_empty() {
        push_pair(&mut args, "--technique", &techniques);
    }

    if let Some(dbms) = &options.dbms {
        push_pair(&mut args, "--dbms", dbms);
    }

    args.extend(options.detection.iter().map(|d| d.flag().to_string()));

    if let Some(proxy) = &options.proxy {
        push_pair(&mut args, "--proxy", proxy);
    }

    if options.tor {
        args.push("--tor".to_string());
        if let Some(port) = options.tor_port {
            push_pair(&mut args, "--tor-port", &port.to_string());
        }
    }

    if options.delay > 0.0 {
        push_pair(&mut args, "--delay", &options.delay.to_string());
    }

    if options.skip_url_encode {
        args.push("--skip-url-encode".to_string());
    }
    if options.skip_static {
        args.push("--skip-static".to_string());
    }

    if let Some(tamper) = &options.tamper {
        push_pair(&mut args, "--tamper", tamper);
    }
    if let Some(os) = &options.os {
        push_pair(&mut args, "--os", os);
    }

    // Non-interactive execution is mandatory, whatever `options.batch` says.
    args.push("--batch".to_string());

    if options.skip_waf {
        args.push("--skip-waf".to_string());
    }
    if options.fresh_queries {
        args.push("--fresh-queries".to_string());
    }

    if let Some(raw) = &options.custom_args {
        args.extend(split_raw_args(raw).into_iter().filter(|a| a != "--batch"));
    }

    args
}

/// Quote-aware split; malformed quoting falls back to whitespace splitting.
pub fn split_raw_args(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    shlex::split(raw).unwrap_or_else(|| raw.split_whitespace().map(str::to_string).collect())
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}
