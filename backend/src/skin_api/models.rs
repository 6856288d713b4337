use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

/// Image the remote service should analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    FileId(String),
    Url(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// A remote skin-analysis task as seen by this process.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub source: SourceRef,
    pub actions: BTreeSet<String>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: String, source: SourceRef, actions: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            actions,
            status: TaskStatus::default(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_result(&mut self, status: TaskStatus, payload: Value) {
        self.result = Some(payload);
        self.set_status(status);
    }
}

/// Payload of the terminal `success` poll.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub payload: Value,
    pub attempts: u32,
}

impl TaskResult {
    /// `data.results.url` of the success payload, when present.
    pub fn results_url(&self) -> Option<&str> {
        self.payload
            .pointer("/data/results/url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }
}

// Wire types for the remote API.

#[derive(Debug, Serialize)]
pub(crate) struct StartTaskRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_file_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_file_url: Option<&'a str>,
    pub dst_actions: Vec<&'a str>,
}

impl<'a> StartTaskRequest<'a> {
    pub fn new(source: &'a SourceRef, actions: &'a BTreeSet<String>) -> Self {
        let (src_file_id, src_file_url) = match source {
            SourceRef::FileId(id) => (Some(id.as_str()), None),
            SourceRef::Url(url) => (None, Some(url.as_str())),
        };
        Self {
            src_file_id,
            src_file_url,
            dst_actions: actions.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(alias = "result")]
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartTaskData {
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PollData {
    #[serde(default)]
    pub task_status: Option<TaskStatus>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileUploadRequest<'a> {
    pub files: Vec<FileSpec<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileSpec<'a> {
    pub content_type: &'a str,
    pub file_name: &'a str,
    pub file_size: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileUploadData {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadedFile {
    pub file_id: Option<String>,
    #[serde(default)]
    pub requests: Vec<UploadRequest>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}
