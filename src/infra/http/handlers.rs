//! Admin maintenance endpoints.

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::ErrorReport;
use crate::application::maintenance::{
    ExportFormat, ImportRequest, LocalSearch, PurgeRequest, WarmupRequest,
};
use crate::application::repos::{ImportMode, ItemFilter};
use crate::cache::EphemeralStats;

use super::AdminState;
use super::error::{ApiError, codes};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub hours: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeQuery {
    pub days: Option<u32>,
    pub dry: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub l1: EphemeralStats,
    pub in_flight: usize,
    pub serve_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<StoreTotals>,
}

#[derive(Debug, Serialize)]
pub struct StoreTotals {
    pub items: u64,
    pub stale_items: u64,
    pub searches: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

fn filter(source: Option<String>, item_type: Option<String>) -> ItemFilter {
    ItemFilter {
        source: source.filter(|s| !s.trim().is_empty()),
        item_type: item_type.filter(|t| !t.trim().is_empty()),
    }
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(inner)| inner)
        .map_err(|err| ApiError::bad_request(codes::INVALID_QUERY, err.body_text()))
}

fn body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(inner)| inner).map_err(|err| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                codes::BODY_TOO_LARGE,
                err.body_text(),
                Some("raise `server.import_body_limit` or use the CLI import".to_string()),
            )
        } else {
            ApiError::bad_request(codes::INVALID_BODY, err.body_text())
        }
    })
}

/// Degrades to `store: "unavailable"` instead of failing.
pub async fn status(State(state): State<AdminState>) -> Json<StatusResponse> {
    let (store, store_error, totals) = match state.maintenance.stats().await {
        Ok(stats) => (
            "ok",
            None,
            Some(StoreTotals {
                items: stats.total_items,
                stale_items: stats.stale_items,
                searches: stats.total_searches,
            }),
        ),
        Err(err) => ("unavailable", Some(err.to_string()), None),
    };

    Json(StatusResponse {
        store,
        store_error,
        l1: state.cache.l1_stats(),
        in_flight: state.cache.in_flight(),
        serve_stale: state.cache.config().serve_stale,
        totals,
    })
}

pub async fn health(State(state): State<AdminState>) -> Response {
    match state.maintenance.ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

pub async fn stats(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.maintenance.stats().await?;
    Ok(Json(stats))
}

pub async fn stats_by_source(
    State(state): State<AdminState>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.maintenance.stats().await?;
    Ok(Json(stats.by_source))
}

pub async fn stats_by_type(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.maintenance.stats().await?;
    Ok(Json(stats.by_type))
}

pub async fn popular(
    State(state): State<AdminState>,
    params: Result<Query<FilterQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let items = state
        .maintenance
        .popular(&filter(params.source, params.item_type), params.limit)
        .await?;
    Ok(Json(items))
}

pub async fn search(
    State(state): State<AdminState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let options = LocalSearch {
        filter: filter(params.source, params.item_type),
        limit: params.limit,
        offset: params.offset,
    };
    let items = state
        .maintenance
        .search_local(params.q.as_deref(), &options)
        .await?;
    Ok(Json(items))
}

pub async fn item(
    State(state): State<AdminState>,
    Path((source, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.maintenance.item(&source, &id).await?;
    Ok(Json(item))
}

pub async fn refresh_queue(
    State(state): State<AdminState>,
    params: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let items = state.maintenance.items_to_refresh(params.limit).await?;
    Ok(Json(items))
}

pub async fn recent(
    State(state): State<AdminState>,
    params: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let items = state.maintenance.recent(params.hours, params.limit).await?;
    Ok(Json(items))
}

pub async fn export(
    State(state): State<AdminState>,
    params: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let params = query(params)?;
    let format = params
        .format
        .as_deref()
        .unwrap_or_default()
        .parse::<ExportFormat>()
        .map_err(|err| ApiError::bad_request(codes::INVALID_FORMAT, err))?;
    let filter = filter(params.source, params.item_type);

    match format {
        ExportFormat::Json => {
            let document = state.maintenance.export_json(&filter).await?;
            Ok(Json(document).into_response())
        }
        ExportFormat::Ndjson => {
            let stream = state.maintenance.export_ndjson(&filter).await?;
            Ok((
                [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
                Body::from_stream(stream),
            )
                .into_response())
        }
    }
}

pub async fn import(
    State(state): State<AdminState>,
    params: Result<Query<ImportQuery>, QueryRejection>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let mode = params
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse::<ImportMode>()
        .map_err(|err| ApiError::bad_request(codes::INVALID_MODE, err))?;
    let payload = body(payload)?;

    let report = state.maintenance.import(payload, mode).await?;
    Ok(Json(report))
}

pub async fn purge(
    State(state): State<AdminState>,
    params: Result<Query<PurgeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    let defaults = PurgeRequest::default();
    let request = PurgeRequest {
        days: params.days.unwrap_or(defaults.days),
        dry: params.dry.unwrap_or(defaults.dry),
    };

    let report = state.maintenance.purge(request).await?;
    Ok(Json(report))
}

pub async fn warmup(
    State(state): State<AdminState>,
    payload: Result<Json<WarmupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = body(payload)?;
    let report = state.maintenance.warmup(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

pub async fn clear_l1(State(state): State<AdminState>) -> Json<ClearResponse> {
    let cleared = state.cache.clear_l1();
    info!(target = "stockpile::http::admin", cleared, "ephemeral tier cleared");
    Json(ClearResponse { cleared })
}
