use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlmapper::cli::Args;
use sqlmapper::command::InvocationBuilder;
use sqlmapper::models::{ScanResult, ScanStatus};
use sqlmapper::reporting::{write_report, ReportFormat};
use sqlmapper::runner::{ScanEvent, ScanSupervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    println!("{}", "\n  sqlmapper :: sqlmap scan runner\n".cyan().bold());

    let target = args.target();
    let options = args.options();

    let mut errors = InvocationBuilder::validate_target(&target);
    errors.extend(InvocationBuilder::validate_options(&options));
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
        }
        return Ok(ExitCode::from(2));
    }

    let builder = InvocationBuilder::new(args.tool_config());
    let command = builder.build(&target, &options);

    if args.dry_run {
        println!("{}", command);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{} {}\n", "Command:".bold(), command.to_string().dimmed());

    let supervisor = Arc::new(ScanSupervisor::new(SupervisorConfig {
        bundle_dir: args.bundle_dir.clone(),
        ..Default::default()
    }));

    let started = Instant::now();
    let mut events = supervisor.start(&command).context("Failed to launch sqlmap")?;

    // Ctrl-C asks the supervisor to wind the process down.
    let canceller = supervisor.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping sqlmap...".yellow());
            canceller.cancel().await;
        }
    });

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("sqlmap running");

    let mut result = None;
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Started { pid } => {
                info!("sqlmap pid {:?}", pid);
                if let Some(pid) = pid {
                    pb.set_message(format!("sqlmap running (pid {})", pid));
                }
            }
            ScanEvent::Line(line) => pb.println(colorize(&line)),
            ScanEvent::Finished(r) => result = Some(r),
        }
    }
    ctrl_c.abort();
    pb.finish_and_clear();

    let result = result.context("Scan ended without a result")?;
    print_summary(&result);

    if let Some(path) = &args.output {
        let format = ReportFormat::parse(&args.format);
        match write_report(&result, format, path, started.elapsed().as_secs_f64()) {
            Ok(()) => println!("Report saved to {}", path.display().to_string().green()),
            Err(e) => {
                error!("Failed to write report: {:#}", e);
                eprintln!("{} {:#}", "ERROR:".red().bold(), e);
            }
        }
    }

    Ok(match result.status {
        ScanStatus::Completed => ExitCode::SUCCESS,
        ScanStatus::Failed => ExitCode::from(1),
        ScanStatus::Cancelled => ExitCode::from(130),
    })
}

fn colorize(line: &str) -> String {
    if line.contains("[CRITICAL]") || line.contains("[ERROR]") {
        line.red().bold().to_string()
    } else if line.contains("[WARNING]") {
        line.yellow().to_string()
    } else if line.contains("[PAYLOAD]") {
        line.magenta().to_string()
    } else if line.contains("[INFO]") {
        line.normal().to_string()
    } else {
        line.dimmed().to_string()
    }
}

fn print_summary(result: &ScanResult) {
    println!("\n{}", "Scan Summary".bold().underline());

    let status = match result.status {
        ScanStatus::Completed => result.status.as_str().green(),
        ScanStatus::Failed => result.status.as_str().red(),
        ScanStatus::Cancelled => result.status.as_str().yellow(),
    };
    let verdict = if result.vulnerable {
        result.summary.red().bold()
    } else {
        result.summary.normal()
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.add_row(vec!["Status".to_string(), status.to_string()]);
    table.add_row(vec!["Target".to_string(), result.target.clone()]);
    table.add_row(vec!["DBMS".to_string(), result.dbms.clone()]);
    table.add_row(vec!["Result".to_string(), verdict.to_string()]);
    if let Some(code) = result.exit_code {
        table.add_row(vec!["Exit code".to_string(), code.to_string()]);
    }
    println!("{table}");

    if !result.vulnerabilities.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Parameter", "Type", "Title", "Payload"]);
        for v in &result.vulnerabilities {
            table.add_row(vec![v.parameter.clone(), v.kind.clone(), v.title.clone(), v.payload.clone()]);
        }
        println!("{table}");
    }

    let info = &result.database_info;
    if !info.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Key", "Value"]);
        for (key, value) in &info.values {
            table.add_row(vec![key.clone(), value.clone()]);
        }
        for (db, entry) in &info.databases {
            table.add_row(vec![format!("database {}", db), entry.tables.join(", ")]);
        }
        println!("{table}");
    }
}
