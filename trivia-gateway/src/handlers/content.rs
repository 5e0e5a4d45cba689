//! Content routes relayed to the CMS: admin CRUD, public reads and the batch
//! question upload.

use axum::{
    extract::{Path, RawQuery, State},
    http::Method,
    Extension, Json,
};
use serde_json::Value;
use service_core::error::AppError;

use crate::{
    dtos::upload::BulkUploadRequest,
    middleware::{AdminContext, PlayerToken},
    services::{CmsResponse, GatewayError, UploadReport},
    utils::ValidatedJson,
    AppState,
};

/// A CMS collection exposed through the gateway under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind(pub &'static str);

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        self.0
    }

    pub fn cms_collection(&self) -> String {
        format!("/api/{}", self.0)
    }

    fn cms_item(&self, id: &str) -> Result<String, GatewayError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GatewayError::Validation(format!("Invalid {} id", self.0)));
        }
        Ok(format!("/api/{}/{}", self.0, id))
    }
}

pub const ADMIN_RESOURCES: [ResourceKind; 5] = [
    ResourceKind("games"),
    ResourceKind("questions"),
    ResourceKind("categories"),
    ResourceKind("users"),
    ResourceKind("store-items"),
];

pub const PUBLIC_RESOURCES: [ResourceKind; 3] = [
    ResourceKind("games"),
    ResourceKind("categories"),
    ResourceKind("store-items"),
];

pub async fn admin_list(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: AdminContext,
    RawQuery(query): RawQuery,
) -> Result<CmsResponse, AppError> {
    Ok(state
        .cms
        .forward(
            Method::GET,
            &kind.cms_collection(),
            query.as_deref(),
            Some(&ctx.access_token),
            None,
        )
        .await?)
}

pub async fn admin_create(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: AdminContext,
    Json(body): Json<Value>,
) -> Result<CmsResponse, AppError> {
    tracing::info!(user_id = %ctx.user.id, resource = kind.name(), "Admin create");
    Ok(state
        .cms
        .forward(
            Method::POST,
            &kind.cms_collection(),
            None,
            Some(&ctx.access_token),
            Some(&body),
        )
        .await?)
}

pub async fn admin_get(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: AdminContext,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<CmsResponse, AppError> {
    Ok(state
        .cms
        .forward(
            Method::GET,
            &kind.cms_item(&id)?,
            query.as_deref(),
            Some(&ctx.access_token),
            None,
        )
        .await?)
}

pub async fn admin_update(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: AdminContext,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<CmsResponse, AppError> {
    tracing::info!(user_id = %ctx.user.id, resource = kind.name(), id = %id, "Admin update");
    Ok(state
        .cms
        .forward(
            Method::PUT,
            &kind.cms_item(&id)?,
            None,
            Some(&ctx.access_token),
            Some(&body),
        )
        .await?)
}

pub async fn admin_delete(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    ctx: AdminContext,
    Path(id): Path<String>,
) -> Result<CmsResponse, AppError> {
    tracing::info!(user_id = %ctx.user.id, resource = kind.name(), id = %id, "Admin delete");
    Ok(state
        .cms
        .forward(
            Method::DELETE,
            &kind.cms_item(&id)?,
            None,
            Some(&ctx.access_token),
            None,
        )
        .await?)
}

pub async fn public_list(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    PlayerToken(token): PlayerToken,
    RawQuery(query): RawQuery,
) -> Result<CmsResponse, AppError> {
    Ok(state
        .cms
        .forward(
            Method::GET,
            &kind.cms_collection(),
            query.as_deref(),
            token.as_deref(),
            None,
        )
        .await?)
}

pub async fn public_get(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    PlayerToken(token): PlayerToken,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<CmsResponse, AppError> {
    Ok(state
        .cms
        .forward(
            Method::GET,
            &kind.cms_item(&id)?,
            query.as_deref(),
            token.as_deref(),
            None,
        )
        .await?)
}

pub async fn bulk_upload_questions(
    State(state): State<AppState>,
    ctx: AdminContext,
    ValidatedJson(req): ValidatedJson<BulkUploadRequest>,
) -> Result<Json<UploadReport>, AppError> {
    tracing::info!(
        user_id = %ctx.user.id,
        count = req.questions.len(),
        "Bulk question upload requested"
    );

    let report = state
        .uploader
        .upload(req.questions, req.chunk_size, &ctx.access_token)
        .await?;

    Ok(Json(report))
}
