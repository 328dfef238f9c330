//! Axum router and all HTTP handlers for recon-api.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the tracing/CORS middleware. Handlers are `pub(crate)` so integration
//! tests under `tests/` can compose the bare router directly.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use recon_db::exceptions::{ExceptionActionRequest, ExceptionFilters};
use recon_db::ingest::{IngestRequest, RawTxnRecord};
use recon_db::results::ResultFilters;
use recon_db::{analytics, audit, exceptions, ingest, results, rulesets, runs, users};
use uuid::Uuid;

use crate::actor::{actor_login, roles_for, source_ip};
use crate::api_types::{
    AuditQuery, ExceptionActionBody, ExceptionsQuery, ExportQuery, IngestFileBody, ListRunsQuery,
    PutRulesetBody, ResultsFilterQuery, ResultsLatestQuery, StartRunBody,
};
use crate::error_map::{ApiError, ApiResult};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/ingest/files", axum::routing::post(ingest_files))
        .route("/api/v1/ingest/files/:id/status", get(ingest_file_status))
        .route("/api/v1/match/runs", axum::routing::post(start_run).get(list_match_runs))
        .route("/api/v1/match/runs/:id", get(match_run_summary))
        .route("/api/v1/match/status", get(match_status))
        .route("/api/v1/results/run/:id", get(results_for_run))
        .route("/api/v1/results/latest", get(results_latest))
        .route("/api/v1/results/details/:row_id", get(result_details))
        .route("/api/v1/exceptions", get(list_exceptions_route))
        .route("/api/v1/exceptions/export.csv", get(export_exceptions_csv))
        .route("/api/v1/exceptions/users", get(list_exception_users))
        .route("/api/v1/exceptions/:id", get(get_exception_route))
        .route("/api/v1/exceptions/:id/actions", axum::routing::post(exception_action_route))
        .route("/api/v1/admin/rulesets", get(list_rulesets).put(put_ruleset_route))
        .route("/api/v1/audit/events", get(audit_events))
        .route("/api/v1/monitor/source-balance", get(source_balance))
        .route("/api/v1/analytics/hardcoded", get(analytics_hardcoded))
        .with_state(state)
}

fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    source_ip(headers, connect_info.map(|ConnectInfo(addr)| addr))
}

#[derive(serde::Serialize)]
struct HealthResponse {
    ok: bool,
    has_txns_table: bool,
}

pub(crate) async fn healthz(State(st): State<AppState>) -> Response {
    match recon_db::status(&st.pool).await {
        Ok(status) => (
            StatusCode::OK,
            Json(HealthResponse { ok: status.ok, has_txns_table: status.has_txns_table }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/ingest/files, GET /api/v1/ingest/files/{id}/status
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_files(
    State(st): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<IngestFileBody>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let ip = client_ip(&headers, connect_info);

    let records = body
        .records
        .into_iter()
        .map(|r| RawTxnRecord {
            rrn: r.rrn,
            arn: r.arn,
            pan: r.pan,
            amount: r.amount,
            currency: r.currency,
            txn_time: r.txn_time,
            op_type: r.op_type,
            merchant_id: r.merchant_id,
            channel_id: r.channel_id,
            status_norm: r.status_norm,
            fee_amount: r.fee_amount,
            fee_currency: r.fee_currency,
        })
        .collect();

    let req = IngestRequest {
        side: body.side,
        system_tag: body.system_tag,
        business_date: body.business_date,
        file_name: body.file_name,
        checksum: body.checksum,
        parser_profile: body.parser_profile,
        received_at: body.received_at,
        records,
    };

    let outcome = ingest::ingest_file(&st.pool, &login, ip.as_deref(), &st.pan_hash_secret, &roles, req)
        .await
        .map_err(ApiError)?;

    Ok((StatusCode::OK, Json(outcome)).into_response())
}

pub(crate) async fn ingest_file_status(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let status = ingest::ingest_status(&st.pool, &roles, id).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(status)).into_response())
}

// ---------------------------------------------------------------------------
// POST/GET /api/v1/match/runs, GET /api/v1/match/runs/{id}, GET /api/v1/match/status
// ---------------------------------------------------------------------------

pub(crate) async fn start_run(
    State(st): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<StartRunBody>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let ip = client_ip(&headers, connect_info);

    let outcome = runs::run_matching(&st.pool, &login, ip.as_deref(), &roles, body.business_date, body.scope_filter)
        .await
        .map_err(ApiError)?;

    Ok((StatusCode::OK, Json(outcome)).into_response())
}

pub(crate) async fn list_match_runs(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListRunsQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let list = runs::list_runs(&st.pool, &roles, q.business_date, q.limit.unwrap_or(50))
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(list)).into_response())
}

pub(crate) async fn match_run_summary(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let summary = runs::run_summary(&st.pool, &roles, id).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}

#[derive(serde::Deserialize)]
pub(crate) struct BusinessDateOnly {
    pub business_date: chrono::NaiveDate,
}

pub(crate) async fn match_status(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BusinessDateOnly>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let run = runs::latest_run_status(&st.pool, &roles, q.business_date)
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(run)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/results/run/{id}, /api/v1/results/latest, /api/v1/results/details/{rowId}
// ---------------------------------------------------------------------------

fn filters_from_query(q: ResultsFilterQuery) -> ResultFilters {
    ResultFilters {
        status: q.status,
        q: q.q,
        currency: q.currency,
        amount_min: q.amount_min,
        amount_max: q.amount_max,
        sort_by: q.sort_by,
        sort_dir: q.sort_dir,
        page: q.page.unwrap_or(1),
        page_size: q.page_size.unwrap_or(50),
    }
}

pub(crate) async fn results_for_run(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(q): Query<ResultsFilterQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let page = results::get_run_results(&st.pool, &roles, id, filters_from_query(q))
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(page)).into_response())
}

pub(crate) async fn results_latest(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ResultsLatestQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;

    let latest = runs::latest_run_status(&st.pool, &roles, q.business_date)
        .await
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(recon_db::RconError::NotFound("no run for business_date".into())))?;

    let page = results::get_run_results_for(&st.pool, &roles, latest, filters_from_query(q.filters))
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(page)).into_response())
}

pub(crate) async fn result_details(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(row_id): Path<String>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let detail = results::get_row_details(&st.pool, &roles, &row_id).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(detail)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/exceptions, /{id}, POST /{id}/actions, GET /export.csv, /users
// ---------------------------------------------------------------------------

pub(crate) async fn list_exceptions_route(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ExceptionsQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let filters = ExceptionFilters {
        business_date: q.business_date,
        status: q.status,
        category: q.category,
        run_id: q.run_id,
        limit: q.limit.unwrap_or(500),
    };
    let list = exceptions::list_exceptions(&st.pool, &roles, filters).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(list)).into_response())
}

#[derive(serde::Serialize)]
struct ExceptionDetail {
    case: recon_schemas::ExceptionCase,
    primary_txn: recon_schemas::Txn,
    actions: Vec<recon_schemas::ExceptionAction>,
    diagnostics: exceptions::ExceptionDiagnostics,
}

pub(crate) async fn get_exception_route(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;

    let case = exceptions::get_exception(&st.pool, &roles, id).await.map_err(ApiError)?;
    let row_detail = results::get_row_details(&st.pool, &roles, &format!("E:{id}"))
        .await
        .map_err(ApiError)?;
    let primary_txn = row_detail
        .left_txn
        .or(row_detail.right_txn)
        .ok_or_else(|| ApiError(recon_db::RconError::NotFound("primary transaction not found".into())))?;
    let actions = exceptions::list_actions(&st.pool, &roles, id).await.map_err(ApiError)?;
    let diagnostics = exceptions::build_exception_diagnostics(&st.pool, &roles, id)
        .await
        .map_err(ApiError)?;

    Ok((
        StatusCode::OK,
        Json(ExceptionDetail { case, primary_txn, actions, diagnostics }),
    )
        .into_response())
}

pub(crate) async fn exception_action_route(
    State(st): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ExceptionActionBody>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let ip = client_ip(&headers, connect_info);

    let req = ExceptionActionRequest {
        action_type: body.action_type,
        comment: body.comment,
        assignee: body.assignee,
        new_status: body.new_status,
        resolution_code: body.resolution_code,
    };
    let action = exceptions::exception_action(&st.pool, &login, ip.as_deref(), &roles, id, req)
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(action)).into_response())
}

pub(crate) async fn export_exceptions_csv(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ExportQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let csv = analytics::export_unmatched_csv(&st.pool, &roles, q.business_date, q.run_id)
        .await
        .map_err(ApiError)?;

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    )
        .into_response())
}

pub(crate) async fn list_exception_users(
    State(st): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let list = users::list_users(&st.pool, &roles).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(list)).into_response())
}

// ---------------------------------------------------------------------------
// GET/PUT /api/v1/admin/rulesets
// ---------------------------------------------------------------------------

pub(crate) async fn list_rulesets(
    State(st): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let list = rulesets::get_rulesets(&st.pool, &roles).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(list)).into_response())
}

pub(crate) async fn put_ruleset_route(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PutRulesetBody>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let payload = recon_schemas::RulesetPayload {
        amount_tolerance: body.amount_tolerance,
        date_window_days: body.date_window_days,
        score_threshold: body.score_threshold,
    };
    let ruleset = rulesets::put_ruleset(&st.pool, &roles, body.version, payload)
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(ruleset)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/audit/events
// ---------------------------------------------------------------------------

pub(crate) async fn audit_events(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let filters = audit::AuditFilters {
        actor: q.actor,
        object_type: q.object_type,
        action: q.action,
        result: q.result,
        limit: q.limit.unwrap_or(1000),
    };
    let list = audit::list_audit(&st.pool, &roles, filters).await.map_err(ApiError)?;
    Ok((StatusCode::OK, Json(list)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/monitor/source-balance, /api/v1/analytics/hardcoded
// ---------------------------------------------------------------------------

pub(crate) async fn source_balance(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BusinessDateOnly>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let balance = analytics::source_balance(&st.pool, &roles, q.business_date)
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(balance)).into_response())
}

pub(crate) async fn analytics_hardcoded(
    State(st): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BusinessDateOnly>,
) -> ApiResult<Response> {
    let login = actor_login(&headers);
    let roles = roles_for(&st.pool, &login).await?;
    let analytics = analytics::business_date_analytics(&st.pool, &roles, q.business_date)
        .await
        .map_err(ApiError)?;
    Ok((StatusCode::OK, Json(analytics)).into_response())
}
