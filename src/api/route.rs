use crate::{
    api::{error::ApiError, response::ApiResponse},
    blockchain::{models::AssetData, RpcError},
    cache::{AddressQuery, CacheStats},
    config::Settings,
    models::{AddressDetails, BlockDetails, LatestBlocks, TransactionDetails, TxidPage},
    service::{
        output_status::DEFAULT_SPENDER_SCAN_BLOCKS,
        tracer::{TraceFilters, TraceGraph, DEFAULT_TRACE_DEPTH},
        OutputStatus, SearchTarget,
    },
    state::AppState,
    validation::{validate_address, validate_depth, validate_hash, validate_page},
};
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const DEFAULT_BLOCK_COUNT: u32 = 10;
const MAX_BLOCK_COUNT: u32 = 100;

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[derive(Deserialize)]
pub struct RpcRequest {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpenderQuery {
    max_blocks: Option<u64>,
}

#[derive(Deserialize)]
pub struct LatestBlocksQuery {
    start: Option<u64>,
    count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldersQuery {
    #[serde(default)]
    only_total: bool,
    count: Option<u32>,
    start: Option<u32>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
}

#[derive(Deserialize)]
pub struct TraceRequest {
    txid: String,
    vout: u32,
    depth: Option<u32>,
}

#[derive(Deserialize)]
pub struct DepthRequest {
    depth: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    in_flight: usize,
    active: usize,
    queued: usize,
    max_concurrent: usize,
    endpoint: String,
}

// Create router with all routes
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/rpc", post(call_rpc))
        .route("/api/address/{address}", get(address_details))
        .route("/api/address/{address}/txids", get(address_txids))
        .route("/api/output/{txid}/{vout}", get(output_status))
        .route("/api/output/{txid}/{vout}/spender", get(output_spender))
        .route("/api/tx/{txid}", get(transaction_details))
        .route("/api/block/{id}", get(block_details))
        .route("/api/blocks/latest", get(latest_blocks))
        .route("/api/asset/{name}", get(asset_data))
        .route("/api/asset/{name}/holders", get(asset_holders))
        .route("/api/search", get(search))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", delete(clear_cache))
        .route("/api/status", get(status))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/trace", post(start_trace))
        .route("/api/trace/{id}", get(trace_snapshot).delete(close_trace))
        .route("/api/trace/{id}/filters", put(trace_filters))
        .route("/api/trace/{id}/depth", put(trace_depth))
        .with_state(app_state)
}

// POST /api/rpc handler
async fn call_rpc(State(state): State<Arc<AppState>>, Json(request): Json<RpcRequest>) -> ApiResult<Value> {
    if request.method.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing parameter: method".to_string()));
    }

    let result = state.service.client().call(&request.method, request.params).await?;
    Ok(ApiResponse::new(result))
}

// GET /api/address/{address} handler
async fn address_details(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<PageQuery>,
) -> ApiResult<AddressDetails> {
    validate_address(&address)?;
    let page = params.page.unwrap_or(1);
    validate_page(page)?;

    let details = state.service.get_address_details(&address, page).await;

    // Warm the rest of the history once the first view is served
    if state.service.spawn_address_warmup(&address).is_some() {
        info!("Started background cache warm-up for {}", address);
    }

    Ok(ApiResponse::new(details))
}

// GET /api/address/{address}/txids handler
async fn address_txids(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<PageQuery>,
) -> ApiResult<TxidPage> {
    validate_address(&address)?;
    let page = params.page.unwrap_or(1);
    validate_page(page)?;

    let txids = state
        .service
        .get_address_txids(&AddressQuery::from(address.as_str()), page)
        .await?;
    Ok(ApiResponse::new(txids))
}

// GET /api/output/{txid}/{vout} handler
async fn output_status(
    State(state): State<Arc<AppState>>,
    Path((txid, vout)): Path<(String, u32)>,
) -> ApiResult<OutputStatus> {
    validate_hash(&txid)?;
    Ok(ApiResponse::new(state.service.get_output_status(&txid, vout).await))
}

// GET /api/output/{txid}/{vout}/spender handler
async fn output_spender(
    State(state): State<Arc<AppState>>,
    Path((txid, vout)): Path<(String, u32)>,
    Query(params): Query<SpenderQuery>,
) -> ApiResult<Value> {
    validate_hash(&txid)?;
    let max_blocks = params.max_blocks.unwrap_or(DEFAULT_SPENDER_SCAN_BLOCKS);

    let spender = state.service.find_spending_tx(&txid, vout, max_blocks).await;
    Ok(ApiResponse::new(json!({ "spendingTx": spender })))
}

// GET /api/tx/{txid} handler
async fn transaction_details(
    State(state): State<Arc<AppState>>,
    Path(txid): Path<String>,
) -> ApiResult<TransactionDetails> {
    validate_hash(&txid)?;
    Ok(ApiResponse::new(state.service.get_transaction_details(&txid).await?))
}

// GET /api/block/{id} handler
async fn block_details(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<BlockDetails> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        validate_hash(&id)?;
    }
    Ok(ApiResponse::new(state.service.get_block_details(&id).await?))
}

// GET /api/blocks/latest handler
async fn latest_blocks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LatestBlocksQuery>,
) -> ApiResult<LatestBlocks> {
    let count = params.count.unwrap_or(DEFAULT_BLOCK_COUNT).clamp(1, MAX_BLOCK_COUNT);
    let blocks = state.service.get_latest_blocks_metadata(params.start, count).await?;
    Ok(ApiResponse::new(blocks))
}

// GET /api/asset/{name} handler
async fn asset_data(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<AssetData> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing parameter: name".to_string()));
    }

    let data = state.service.get_asset_data(&name).await.map_err(|e| match e {
        RpcError::Remote { .. } => ApiError::NotFound(format!("Asset {}", name)),
        other => ApiError::Rpc(other),
    })?;

    Ok(ApiResponse::new(data))
}

// GET /api/asset/{name}/holders handler
async fn asset_holders(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HoldersQuery>,
) -> ApiResult<Value> {
    let holders = state
        .service
        .list_addresses_by_asset(
            &name,
            params.only_total,
            params.count.unwrap_or(10),
            params.start.unwrap_or(0),
        )
        .await?;
    Ok(ApiResponse::new(holders))
}

// GET /api/search handler
async fn search(State(state): State<Arc<AppState>>, Query(params): Query<SearchQuery>) -> ApiResult<SearchTarget> {
    if params.q.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing parameter: q".to_string()));
    }
    Ok(ApiResponse::new(state.service.identify_search_term(&params.q).await))
}

// GET /api/cache/stats handler
async fn cache_stats(State(state): State<Arc<AppState>>) -> ApiResult<CacheStats> {
    Ok(ApiResponse::new(state.service.client().stats()))
}

// DELETE /api/cache handler
async fn clear_cache(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let cleared = state.service.client().clear_all_caches().await;
    if !cleared {
        return Err(ApiError::Internal("Failed to clear caches".to_string()));
    }
    info!("Caches cleared over the API");
    Ok(ApiResponse::new(json!({ "cleared": true })))
}

// GET /api/status handler
async fn status(State(state): State<Arc<AppState>>) -> ApiResult<ServiceStatus> {
    let client = state.service.client();
    let dispatcher = client.dispatcher();

    Ok(ApiResponse::new(ServiceStatus {
        in_flight: client.in_flight_count(),
        active: dispatcher.active(),
        queued: dispatcher.queued(),
        max_concurrent: dispatcher.max_concurrent(),
        endpoint: dispatcher.endpoint(),
    }))
}

// GET /api/settings handler
async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<Settings> {
    let settings = state
        .service
        .client()
        .load_settings()
        .await
        .unwrap_or_else(|| state.config.settings());
    Ok(ApiResponse::new(settings))
}

// PUT /api/settings handler
async fn update_settings(State(state): State<Arc<AppState>>, Json(settings): Json<Settings>) -> ApiResult<Settings> {
    let client = state.service.client();
    let applied = client.update_settings(&settings);
    client.save_settings(&applied).await;
    info!("Settings updated over the API");
    Ok(ApiResponse::new(applied))
}

// POST /api/trace handler
async fn start_trace(State(state): State<Arc<AppState>>, Json(request): Json<TraceRequest>) -> ApiResult<Value> {
    validate_hash(&request.txid)?;
    let depth = request.depth.unwrap_or(DEFAULT_TRACE_DEPTH);
    validate_depth(depth)?;

    let id = state.traces.start(&request.txid, request.vout, depth).await;
    Ok(ApiResponse::new(json!({ "id": id })))
}

// GET /api/trace/{id} handler
async fn trace_snapshot(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TraceGraph> {
    match state.traces.snapshot(&id).await {
        Some(graph) => Ok(ApiResponse::new(graph)),
        None => Err(ApiError::NotFound(format!("Trace {}", id))),
    }
}

// PUT /api/trace/{id}/filters handler
async fn trace_filters(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(filters): Json<TraceFilters>,
) -> ApiResult<Value> {
    if !state.traces.set_filters(&id, filters).await {
        return Err(ApiError::NotFound(format!("Trace {}", id)));
    }
    Ok(ApiResponse::new(json!({ "id": id })))
}

// PUT /api/trace/{id}/depth handler
async fn trace_depth(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<DepthRequest>,
) -> ApiResult<Value> {
    validate_depth(request.depth)?;
    if !state.traces.set_depth(&id, request.depth).await {
        return Err(ApiError::NotFound(format!("Trace {}", id)));
    }
    Ok(ApiResponse::new(json!({ "id": id })))
}

// DELETE /api/trace/{id} handler
async fn close_trace(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Value> {
    if !state.traces.close(&id).await {
        return Err(ApiError::NotFound(format!("Trace {}", id)));
    }
    Ok(ApiResponse::new(json!({ "closed": id })))
}
