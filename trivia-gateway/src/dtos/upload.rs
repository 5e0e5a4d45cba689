use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadRequest {
    #[validate(length(min = 1, message = "At least one question is required"))]
    pub questions: Vec<Value>,

    #[validate(range(min = 1, message = "chunkSize must be positive"))]
    pub chunk_size: Option<usize>,
}
