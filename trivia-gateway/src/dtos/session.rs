use serde::{Deserialize, Serialize};

use crate::models::Session;

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    /// True for the session making the request.
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventsQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}
