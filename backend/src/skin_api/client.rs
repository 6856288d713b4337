use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

use super::models::{
    Envelope, FileSpec, FileUploadData, FileUploadRequest, PollData, PollPolicy, SourceRef,
    StartTaskData, StartTaskRequest, Task, TaskResult, TaskStatus,
};
use crate::text::truncate;

const FILE_PATH: &str = "s2s/v2.0/file/skin-analysis";
const TASK_PATH: &str = "s2s/v2.0/task/skin-analysis";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TaskClientError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("File upload failed: {0}")]
    FileUpload(String),
    #[error("Task submission failed: {0}")]
    Submission(String),
    #[error("Remote task {task_id} failed")]
    RemoteTaskFailed { task_id: String, payload: Value },
    #[error("Task {task_id} did not finish after {attempts} polls")]
    PollTimeout { task_id: String, attempts: u32 },
    #[error("Polling task {task_id} failed with status {status}")]
    Poll { task_id: String, status: u16 },
}

/// Client for the task-based skin-analysis API.
#[derive(Clone)]
pub struct SkinAnalysisClient {
    http_client: HttpClient,
    api_key: String,
    endpoint: String,
}

impl SkinAnalysisClient {
    pub fn new(http_client: HttpClient, api_key: String, endpoint: String) -> Self {
        Self {
            http_client,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_timeout(
        api_key: String,
        endpoint: String,
        timeout: Duration,
    ) -> Result<Self, TaskClientError> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self::new(http_client, api_key, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registers a PNG with the file API, sends its bytes to the returned
    /// presigned location and yields the remote file id.
    pub async fn upload_file(&self, file_name: &str, png: &[u8]) -> Result<String, TaskClientError> {
        let request = FileUploadRequest {
            files: vec![FileSpec {
                content_type: "image/png",
                file_name,
                file_size: png.len(),
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/{}", self.endpoint, FILE_PATH))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, "file upload")
            .await
            .map_err(TaskClientError::FileUpload)?;

        let envelope: Envelope<FileUploadData> = response
            .json()
            .await
            .map_err(|e| TaskClientError::FileUpload(format!("unreadable response: {}", e)))?;
        let file = envelope
            .data
            .and_then(|data| data.files.into_iter().next())
            .ok_or_else(|| TaskClientError::FileUpload("response carried no files".into()))?;
        let file_id = file
            .file_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TaskClientError::FileUpload("response carried no file_id".into()))?;
        let target = file
            .requests
            .into_iter()
            .next()
            .ok_or_else(|| TaskClientError::FileUpload("response carried no upload url".into()))?;

        let method = Method::from_bytes(target.method.as_deref().unwrap_or("PUT").as_bytes())
            .map_err(|_| TaskClientError::FileUpload("invalid upload method".into()))?;
        let mut upload = self.http_client.request(method, &target.url).body(png.to_vec());
        for (name, value) in &target.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            upload = upload.header(name.as_str(), value.as_str());
        }
        ensure_success(upload.send().await?, "presigned upload")
            .await
            .map_err(TaskClientError::FileUpload)?;

        log::info!("Uploaded {} ({} bytes) as file {}", file_name, png.len(), file_id);
        Ok(file_id)
    }

    pub async fn submit(
        &self,
        source: &SourceRef,
        actions: &BTreeSet<String>,
    ) -> Result<Task, TaskClientError> {
        let response = self
            .http_client
            .post(format!("{}/{}", self.endpoint, TASK_PATH))
            .bearer_auth(&self.api_key)
            .json(&StartTaskRequest::new(source, actions))
            .send()
            .await?;
        let response = ensure_success(response, "task submission")
            .await
            .map_err(TaskClientError::Submission)?;

        let envelope: Envelope<StartTaskData> = response
            .json()
            .await
            .map_err(|e| TaskClientError::Submission(format!("unreadable response: {}", e)))?;
        let task_id = envelope
            .data
            .and_then(|data| data.task_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TaskClientError::Submission("task_id not found in response".into()))?;

        log::info!("Task started, id = {}", task_id);
        Ok(Task::new(task_id, source.clone(), actions.clone()))
    }

    /// Polls until `success` (returned), `error` (failed immediately) or the
    /// attempt budget runs out.
    pub async fn poll(&self, task: &mut Task, policy: PollPolicy) -> Result<TaskResult, TaskClientError> {
        for attempt in 1..=policy.max_attempts {
            let payload = self.fetch_status(&task.id).await?;
            let status = serde_json::from_value::<Envelope<PollData>>(payload.clone())
                .ok()
                .and_then(|envelope| envelope.data)
                .and_then(|data| data.task_status)
                .unwrap_or(TaskStatus::Unknown);

            log::info!(
                "Task {} attempt {}/{} status = {:?}",
                task.id,
                attempt,
                policy.max_attempts,
                status
            );

            if !status.is_terminal() {
                task.set_status(status);
            } else {
                task.set_result(status, payload.clone());
                if status != TaskStatus::Success {
                    log::error!("Task {} reported error", task.id);
                    return Err(TaskClientError::RemoteTaskFailed {
                        task_id: task.id.clone(),
                        payload,
                    });
                }
                return Ok(TaskResult {
                    task_id: task.id.clone(),
                    payload,
                    attempts: attempt,
                });
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        log::warn!(
            "Task {} still not finished after {} attempts",
            task.id,
            policy.max_attempts
        );
        Err(TaskClientError::PollTimeout {
            task_id: task.id.clone(),
            attempts: policy.max_attempts,
        })
    }

    /// True when the service's `/health` answers 200 within five seconds.
    pub async fn check_connection(&self) -> bool {
        let response = self
            .http_client
            .get(format!("{}/health", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                log::warn!("Skin analysis API unreachable: {}", e);
                false
            }
        }
    }

    /// Submits and polls in one call.
    pub async fn run_task(
        &self,
        source: &SourceRef,
        actions: &BTreeSet<String>,
        policy: PollPolicy,
    ) -> Result<TaskResult, TaskClientError> {
        let mut task = self.submit(source, actions).await?;
        self.poll(&mut task, policy).await
    }

    async fn fetch_status(&self, task_id: &str) -> Result<Value, TaskClientError> {
        let response = self
            .http_client
            .get(format!("{}/{}/{}", self.endpoint, TASK_PATH, task_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Polling task {} failed [{}]: {}",
                task_id,
                status,
                truncate(&body, 512)
            );
            return Err(TaskClientError::Poll {
                task_id: task_id.to_string(),
                status: status.as_u16(),
            });
        }

        if response.content_length() == Some(0) {
            return Ok(Value::Null);
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::error!("{} failed [{}]: {}", what, status, truncate(&body, 512));
    Err(format!("{} returned status {}", what, status.as_u16()))
}
