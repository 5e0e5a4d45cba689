use futures::future::join_all;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::cms_client::{error_message, CmsClient};
use super::error::GatewayError;

const QUESTIONS_PATH: &str = "/api/questions";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub total: usize,
    pub created: usize,
    pub failed: usize,
    pub results: Vec<EntryResult>,
}

/// Creates questions in the CMS chunk by chunk. Entries in one chunk are sent
/// concurrently; the next chunk starts only when the previous one settled.
#[derive(Clone)]
pub struct QuestionUploader {
    cms: Arc<CmsClient>,
    default_chunk_size: usize,
    max_questions: usize,
}

impl QuestionUploader {
    pub fn new(cms: Arc<CmsClient>, default_chunk_size: usize, max_questions: usize) -> Self {
        Self {
            cms,
            default_chunk_size,
            max_questions,
        }
    }

    pub async fn upload(
        &self,
        questions: Vec<Value>,
        chunk_size: Option<usize>,
        bearer: &str,
    ) -> Result<UploadReport, GatewayError> {
        if questions.is_empty() {
            return Err(GatewayError::Validation(
                "questions must contain at least one entry".to_string(),
            ));
        }
        if questions.len() > self.max_questions {
            return Err(GatewayError::Validation(format!(
                "at most {} questions per upload",
                self.max_questions
            )));
        }
        let chunk_size = chunk_size.unwrap_or(self.default_chunk_size);
        if chunk_size == 0 {
            return Err(GatewayError::Validation(
                "chunkSize must be positive".to_string(),
            ));
        }

        let total = questions.len();
        let mut results = Vec::with_capacity(total);

        for (chunk_no, chunk) in questions.chunks(chunk_size).enumerate() {
            let base = chunk_no * chunk_size;
            let settled = join_all(
                chunk
                    .iter()
                    .enumerate()
                    .map(|(offset, q)| self.create_one(base + offset, q, bearer)),
            )
            .await;
            results.extend(settled);
        }

        let created = results.iter().filter(|r| r.success).count();
        tracing::info!(total, created, failed = total - created, "Bulk question upload finished");

        Ok(UploadReport {
            total,
            created,
            failed: total - created,
            results,
        })
    }

    async fn create_one(&self, index: usize, question: &Value, bearer: &str) -> EntryResult {
        if !question.is_object() {
            return EntryResult {
                index,
                success: false,
                id: None,
                error: Some("question must be a JSON object".to_string()),
            };
        }

        let body = json!({ "data": question });
        match self
            .cms
            .forward(Method::POST, QUESTIONS_PATH, None, Some(bearer), Some(&body))
            .await
        {
            Ok(res) if res.is_success() => EntryResult {
                index,
                success: true,
                id: res
                    .body
                    .get("data")
                    .and_then(|d| d.get("id"))
                    .or_else(|| res.body.get("id"))
                    .cloned(),
                error: None,
            },
            Ok(res) => EntryResult {
                index,
                success: false,
                id: None,
                error: Some(error_message(&res.body).unwrap_or_else(|| {
                    format!("CMS returned {}", res.status.as_u16())
                })),
            },
            Err(e) => EntryResult {
                index,
                success: false,
                id: None,
                error: Some(e.to_string()),
            },
        }
    }
}
