use clap::Parser;
use std::path::PathBuf;

use crate::command::ToolConfig;
use crate::models::{Detection, Options, Target};
use crate::profiles::ScanProfile;

#[derive(Parser, Debug)]
#[command(name = "sqlmapper")]
#[command(version)]
#[command(about = "Builds, runs and interprets sqlmap scans.", long_about = None)]
pub struct Args {
    /// Target URL (http:// or https://).
    #[arg(short, long)]
    pub url: Option<String>,

    /// Captured HTTP request file to replay instead of a URL.
    #[arg(short = 'r', long)]
    pub request_file: Option<PathBuf>,

    /// POST body to send.
    #[arg(long)]
    pub data: Option<String>,

    /// Cookie header value (e.g., "PHPSESSID=abc; security=low").
    #[arg(long)]
    pub cookie: Option<String>,

    /// Extra headers, newline separated.
    #[arg(long)]
    pub headers: Option<String>,

    /// Use a randomly selected User-Agent.
    #[arg(long)]
    pub random_agent: bool,

    /// Preset that overrides risk, level, threads, timeout, techniques and detection (quick/full/custom).
    #[arg(long)]
    pub profile: Option<ScanProfile>,

    /// Risk of tests to perform (1-3).
    #[arg(long, default_value_t = 1)]
    pub risk: u8,

    /// Level of tests to perform (1-5).
    #[arg(long, default_value_t = 1)]
    pub level: u8,

    /// Concurrent HTTP requests inside sqlmap (1-10).
    #[arg(long, default_value_t = 1)]
    pub threads: u8,

    /// Seconds to wait before timing out a connection (1-300).
    #[arg(long, default_value_t = 30)]
    pub timeout: u32,

    /// Retries on connection timeout.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Technique letters to use, any of BEUSTQ.
    #[arg(long)]
    pub technique: Option<String>,

    /// Force the back-end DBMS.
    #[arg(long)]
    pub dbms: Option<String>,

    /// Enumeration goals, comma-separated (banner,current-user,dbs,tables,...).
    #[arg(long, value_delimiter = ',')]
    pub detect: Vec<Detection>,

    /// HTTP proxy URL.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Route traffic through Tor.
    #[arg(long)]
    pub tor: bool,

    /// Tor proxy port.
    #[arg(long)]
    pub tor_port: Option<u16>,

    /// Seconds to wait between requests.
    #[arg(long, default_value_t = 0.0)]
    pub delay: f64,

    #[arg(long)]
    pub skip_url_encode: bool,

    #[arg(long)]
    pub skip_static: bool,

    /// Tamper script(s), comma-separated.
    #[arg(long)]
    pub tamper: Option<String>,

    /// Back-end OS hint.
    #[arg(long)]
    pub os: Option<String>,

    #[arg(long)]
    pub skip_waf: bool,

    #[arg(long)]
    pub fresh_queries: bool,

    /// Raw arguments appended to the sqlmap command line.
    #[arg(long, allow_hyphen_values = true)]
    pub extra: Option<String>,

    /// Path to the sqlmap executable or sqlmap.py.
    #[arg(long)]
    pub sqlmap_path: Option<String>,

    /// Interpreter used when sqlmap is a .py script.
    #[arg(long, default_value = "python")]
    pub interpreter: String,

    /// Packaged distribution directory containing sqlmap.
    #[arg(long)]
    pub bundle_dir: Option<PathBuf>,

    /// Print the command that would run and exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Write a report of the result to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format: json, sarif or junit.
    #[arg(long, default_value = "json")]
    pub format: String,
}

impl Args {
    pub fn target(&self) -> Target {
        Target {
            url: self.url.clone(),
            request_file: self.request_file.clone(),
            data: self.data.clone(),
            cookies: self.cookie.clone(),
            headers: self.headers.clone(),
            random_user_agent: self.random_agent,
        }
    }

    pub fn options(&self) -> Options {
        let mut options = Options {
            risk: self.risk,
            level: self.level,
            threads: self.threads,
            timeout: self.timeout,
            retries: self.retries,
            techniques: self
                .technique
                .as_deref()
                .map(|t| t.chars().filter(|c| !c.is_whitespace() && *c != ',').collect())
                .unwrap_or_default(),
            dbms: self.dbms.clone(),
            detection: self.detect.iter().copied().collect(),
            proxy: self.proxy.clone(),
            tor: self.tor,
            tor_port: self.tor_port,
            delay: self.delay,
            skip_url_encode: self.skip_url_encode,
            skip_static: self.skip_static,
            tamper: self.tamper.clone(),
            os: self.os.clone(),
            batch: true,
            skip_waf: self.skip_waf,
            fresh_queries: self.fresh_queries,
            custom_args: self.extra.clone(),
        };
        if let Some(profile) = self.profile {
            profile.apply(&mut options);
        }
        options
    }

    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            executable: self.sqlmap_path.clone(),
            interpreter: self.interpreter.clone(),
            bundle_dir: self.bundle_dir.clone(),
        }
    }
}
