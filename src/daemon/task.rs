// src/daemon/task.rs
//! Task Registry
//!
//! Keeps scan tasks addressable by id, each backed by its own supervisor,
//! and collects their output and final result in the background.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::{InvocationBuilder, ScanCommand, ToolConfig};
use crate::models::{Options, ScanResult, Target};
use crate::runner::{ScanEvent, ScanEvents, ScanSupervisor, SupervisorConfig};

/// Task status in the remote-API vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[serde(rename = "not running")]
    NotRunning,
    Running,
    Terminated,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotRunning => "not running",
            TaskStatus::Running => "running",
            TaskStatus::Terminated => "terminated",
        }
    }
}

/// Snapshot returned by `TaskManager::status`
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub id: String,
    pub status: TaskStatus,
    pub return_code: Option<i32>,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Mutable part of a task, shared with its collector
#[derive(Debug)]
struct TaskRecord {
    status: TaskStatus,
    log: Vec<String>,
    result: Option<ScanResult>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            status: TaskStatus::NotRunning,
            log: Vec::new(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn finish(&mut self, result: ScanResult) {
        self.status = TaskStatus::Terminated;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }
}

struct Task {
    id: String,
    command: ScanCommand,
    supervisor: ScanSupervisor,
    record: Arc<RwLock<TaskRecord>>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Waits for the background collector, if one was started.
    async fn join_collector(&self) {
        let handle = self.collector.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Collector for task {} ended abnormally: {}", self.id, e);
            }
        }
    }
}

/// Manages all scan tasks of this process
pub struct TaskManager {
    builder: InvocationBuilder,
    supervisor_config: SupervisorConfig,
    tasks: Arc<RwLock<HashMap<String, Arc<Task>>>>,
    max_concurrent: usize,
    start_lock: Mutex<()>,
}

impl TaskManager {
    pub fn new(tool: ToolConfig, supervisor_config: SupervisorConfig, max_concurrent: usize) -> Self {
        Self {
            builder: InvocationBuilder::new(tool),
            supervisor_config,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent,
            start_lock: Mutex::new(()),
        }
    }

    /// Validates and registers a new task. It does not start it.
    pub async fn create_task(&self, target: &Target, options: &Options) -> Result<String> {
        let mut errors = InvocationBuilder::validate_target(target);
        errors.extend(InvocationBuilder::validate_options(options));
        if !errors.is_empty() {
            bail!("Invalid scan request: {}", errors.join("; "));
        }

        let id = Uuid::new_v4().to_string();
        let task = Task {
            id: id.clone(),
            command: self.builder.build(target, options),
            supervisor: ScanSupervisor::new(self.supervisor_config.clone()),
            record: Arc::new(RwLock::new(TaskRecord::new())),
            collector: Mutex::new(None),
        };

        info!("Created task {}: {}", id, task.command);
        self.tasks.write().await.insert(id.clone(), Arc::new(task));
        Ok(id)
    }

    pub async fn start_task(&self, id: &str) -> Result<()> {
        let task = self.get(id).await?;
        let _guard = self.start_lock.lock().await;

        if task.record.read().await.status != TaskStatus::NotRunning {
            bail!("Task {} was already started", id);
        }
        let running = self.running_count().await;
        if running >= self.max_concurrent {
            bail!("Too many running tasks ({}/{})", running, self.max_concurrent);
        }

        let events = match task.supervisor.start(&task.command) {
            Ok(events) => events,
            Err(e) => {
                let mut record = task.record.write().await;
                record.started_at = Some(Utc::now());
                record.finish(ScanResult::failed(e.to_string(), None, &[]));
                return Err(e).with_context(|| format!("Failed to start task {}", id));
            }
        };

        {
            let mut record = task.record.write().await;
            record.status = TaskStatus::Running;
            record.started_at = Some(Utc::now());
        }

        let handle = tokio::spawn(collect(task.id.clone(), events, task.record.clone()));
        *task.collector.lock().await = Some(handle);

        info!("Started task {}", id);
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatusReport> {
        let task = self.get(id).await.ok()?;
        let record = task.record.read().await;
        Some(TaskStatusReport {
            id: task.id.clone(),
            status: record.status,
            return_code: record.result.as_ref().and_then(|r| r.exit_code),
            command: task.command.display_string(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }

    pub async fn log(&self, id: &str) -> Option<Vec<String>> {
        let task = self.get(id).await.ok()?;
        let log = task.record.read().await.log.clone();
        Some(log)
    }

    /// Final result; `None` until the task has terminated.
    pub async fn data(&self, id: &str) -> Option<ScanResult> {
        let task = self.get(id).await.ok()?;
        let result = task.record.read().await.result.clone();
        result
    }

    /// Waits for a started task to terminate and returns its result.
    pub async fn wait_task(&self, id: &str) -> Result<Option<ScanResult>> {
        let task = self.get(id).await?;
        task.join_collector().await;
        let result = task.record.read().await.result.clone();
        Ok(result)
    }

    /// Cancels a running task. A no-op for tasks that are not running.
    pub async fn stop_task(&self, id: &str) -> Result<()> {
        let task = self.get(id).await?;
        if task.record.read().await.status != TaskStatus::Running {
            debug!("Task {} is not running, nothing to stop", id);
            return Ok(());
        }

        info!("Stopping task {}", id);
        task.supervisor.cancel().await;
        task.join_collector().await;
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.stop_task(id).await?;
        self.tasks
            .write()
            .await
            .remove(id)
            .ok_or_else(|| anyhow!("Task not found: {}", id))?;
        info!("Deleted task {}", id);
        Ok(())
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> Vec<(String, TaskStatus)> {
        let tasks: Vec<Arc<Task>> = self.tasks.read().await.values().cloned().collect();
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let record = task.record.read().await;
            results.push((record.created_at, task.id.clone(), record.status));
        }
        results.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        results.into_iter().map(|(_, id, status)| (id, status)).collect()
    }

    pub async fn running_count(&self) -> usize {
        let tasks: Vec<Arc<Task>> = self.tasks.read().await.values().cloned().collect();
        let mut count = 0;
        for task in tasks {
            if task.record.read().await.status == TaskStatus::Running {
                count += 1;
            }
        }
        count
    }

    async fn get(&self, id: &str) -> Result<Arc<Task>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Task not found: {}", id))
    }
}

async fn collect(id: String, mut events: ScanEvents, record: Arc<RwLock<TaskRecord>>) {
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Started { pid } => debug!("Task {} running as pid {:?}", id, pid),
            ScanEvent::Line(line) => record.write().await.log.push(line),
            ScanEvent::Finished(result) => {
                info!("Task {} terminated: {}", id, result.status.as_str());
                record.write().await.finish(result);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::ScanStatus;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn manager_for(executable: &str, max_concurrent: usize) -> TaskManager {
        TaskManager::new(
            ToolConfig {
                executable: Some(executable.to_string()),
                ..Default::default()
            },
            SupervisorConfig {
                grace_period: Duration::from_millis(500),
                kill_grace_period: Duration::from_millis(500),
                bundle_dir: None,
            },
            max_concurrent,
        )
    }

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-sqlmap");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_request() {
        let manager = manager_for("echo", 2);
        let err = manager
            .create_task(&Target::url("ftp://x"), &Options { risk: 9, ..Default::default() })
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("URL must start with http:// or https://"));
        assert!(err.contains("Risk level must be between 1 and 3"));
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let manager = manager_for("echo", 2);
        let id = manager
            .create_task(&Target::url("http://shop.test/item?id=1"), &Options::default())
            .await
            .unwrap();

        let status = manager.status(&id).await.unwrap();
        assert_eq!(status.status, TaskStatus::NotRunning);
        assert!(status.command.starts_with("echo -u"));
        assert!(manager.data(&id).await.is_none());

        manager.start_task(&id).await.unwrap();
        let result = manager.wait_task(&id).await.unwrap().unwrap();
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.target, "http://shop.test/item?id=1");

        let status = manager.status(&id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Terminated);
        assert_eq!(status.return_code, Some(0));
        assert!(status.completed_at.is_some());

        let log = manager.log(&id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("--batch"));

        assert!(manager.start_task(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(&script(dir.path(), "echo waiting; exec sleep 30"), 2);
        let id = manager
            .create_task(&Target::url("http://shop.test/"), &Options::default())
            .await
            .unwrap();

        manager.start_task(&id).await.unwrap();
        assert_eq!(manager.running_count().await, 1);

        manager.stop_task(&id).await.unwrap();
        assert_eq!(manager.status(&id).await.unwrap().status, TaskStatus::Terminated);
        assert_eq!(manager.data(&id).await.unwrap().status, ScanStatus::Cancelled);

        manager.stop_task(&id).await.unwrap();
        manager.delete_task(&id).await.unwrap();
        assert!(manager.status(&id).await.is_none());
        assert!(manager.delete_task(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(&script(dir.path(), "exec sleep 30"), 1);
        let target = Target::url("http://shop.test/");
        let first = manager.create_task(&target, &Options::default()).await.unwrap();
        let second = manager.create_task(&target, &Options::default()).await.unwrap();

        manager.start_task(&first).await.unwrap();
        assert!(manager.start_task(&second).await.is_err());
        assert_eq!(manager.status(&second).await.unwrap().status, TaskStatus::NotRunning);

        manager.stop_task(&first).await.unwrap();
        manager.start_task(&second).await.unwrap();
        manager.stop_task(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_terminates_task() {
        let manager = manager_for("/nonexistent/sqlmap-missing", 1);
        let id = manager
            .create_task(&Target::url("http://shop.test/"), &Options::default())
            .await
            .unwrap();

        assert!(manager.start_task(&id).await.is_err());
        let data = manager.data(&id).await.unwrap();
        assert_eq!(data.status, ScanStatus::Failed);
        assert_eq!(manager.status(&id).await.unwrap().status, TaskStatus::Terminated);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let manager = manager_for("echo", 1);
        assert!(manager.status("missing").await.is_none());
        assert!(manager.start_task("missing").await.is_err());
        assert!(manager.stop_task("missing").await.is_err());
    }
}
