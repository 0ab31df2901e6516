// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin JSON translation layer over the `OperatorRouter`/`TreeState`/`Dealer`. No business logic
//! lives here: every handler builds an `Instruction` (or reads `TreeState` directly for
//! listing/stat) and defers to the component that owns the rule. The block store's own HTTP API
//! is a separate external surface reached directly by callers; this router only implements the
//! seven routes below.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use canopy_consensus::OperatorRouter;
use canopy_dealer::Dealer;
use canopy_tree::TreeState;
use canopy_types::{ContentId, CpParams, CpSource, Instruction, MkdirParams, MvParams, PeerId, PinParams, RmParams, UnpinParams};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub tree: Arc<TreeState>,
    pub router: Arc<OperatorRouter>,
    pub dealer: Arc<Dealer>,
    pub replica_candidates: Arc<Vec<PeerId>>,
    pub this_node: PeerId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/itscp", post(itscp))
        .route("/itsls", post(itsls))
        .route("/itsmv", post(itsmv))
        .route("/itsrm", post(itsrm))
        .route("/itsmkdir", post(itsmkdir))
        .route("/itspin", post(itspin))
        .route("/itsunpin", post(itsunpin))
        .with_state(state)
}

/// 200 on success, 400 on validation/domain error, 503 while the node refuses writes after
/// going permanently inconsistent, 500 on any other internal error.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        // `ConsensusError::Tree`/`Other` wrap validation/domain errors in `anyhow::Error` by the
        // time they reach here; downcast so bad input still reports 400 rather than 500.
        if let Some(tree_err) = e.downcast_ref::<canopy_types::TreeError>() {
            return domain_error(tree_err);
        }
        if let Some(cluster_err) = e.downcast_ref::<canopy_types::ClusterError>() {
            return domain_error(cluster_err);
        }
        if let Some(canopy_consensus::ConsensusError::NodeFrozen) =
            e.downcast_ref::<canopy_consensus::ConsensusError>()
        {
            return ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: e.to_string(),
            };
        }
        error!(error = %e, "internal error handling HTTP request");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

fn domain_error(e: impl ToString) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message: e.to_string(),
    }
}

#[derive(Deserialize)]
struct CpRequest {
    dir: String,
    file: String,
    #[serde(default)]
    pin_count: usize,
    #[serde(default)]
    crust: bool,
}

async fn itscp(State(state): State<AppState>, Json(req): Json<CpRequest>) -> Result<(), ApiError> {
    // `file` is a cid, not a tree path: a leading `/` means path lookup, anything else is a
    // content-id decode against the block store (uploaded out of band, directly to its own HTTP
    // API), so a path-shaped value forwards as `CpSource::Path` and everything else as
    // `CpSource::Block`.
    let content_id = ContentId::from(req.file.clone());
    let (source, size) = if req.file.starts_with('/') {
        let (_, size, _) = state.tree.stat(&req.file).map_err(domain_error)?;
        (CpSource::Path(req.file.clone()), size)
    } else {
        let block_bytes = state.tree.read_block(&content_id)?;
        let size = block_bytes.len() as u64;
        (
            CpSource::Block {
                content_id: content_id.clone(),
                block_bytes,
            },
            size,
        )
    };

    // `dir` names the destination file's own path, mirroring the original's
    // `cp(dest_path, source)` signature rather than a directory the file is placed inside.
    state
        .router
        .dispatch(Instruction::Cp(CpParams {
            dest_path: req.dir.clone(),
            source,
        }))
        .await?;

    if req.pin_count > 0 {
        let replicas = canopy_tree::select_replicas(&content_id, &state.replica_candidates, req.pin_count)
            .map_err(domain_error)?;
        let hosts_locally = replicas.contains(&state.this_node);
        state
            .router
            .dispatch(Instruction::Pin(PinParams {
                content_id: content_id.clone(),
                replica_peers: replicas,
                dest_path: None,
            }))
            .await?;
        if req.crust && hosts_locally {
            state.dealer.add_order(content_id, size)?;
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct DirRequest {
    dir: String,
}

#[derive(Serialize)]
struct LsEntry {
    name: String,
    size: u64,
    is_dir: bool,
    pin_nodes: Vec<PeerId>,
    crust_info: Option<canopy_dealer::StorageOrder>,
}

async fn itsls(State(state): State<AppState>, Json(req): Json<DirRequest>) -> Result<Json<Vec<LsEntry>>, ApiError> {
    let entries = state.tree.ls(&req.dir).map_err(domain_error)?;
    let out = entries
        .into_iter()
        .map(|e| {
            let pin_nodes = state
                .tree
                .pin_record(&e.hash)
                .map(|r| r.replica_peers)
                .unwrap_or_default();
            let crust_info = state.dealer.status(&e.hash);
            LsEntry {
                name: e.name,
                size: e.size,
                is_dir: e.is_dir,
                pin_nodes,
                crust_info,
            }
        })
        .collect();
    Ok(Json(out))
}

#[derive(Deserialize)]
struct MvRequest {
    src: String,
    dst: String,
}

async fn itsmv(State(state): State<AppState>, Json(req): Json<MvRequest>) -> Result<(), ApiError> {
    state
        .router
        .dispatch(Instruction::Mv(MvParams {
            src_path: req.src,
            dst_path: req.dst,
        }))
        .await?;
    Ok(())
}

async fn itsrm(State(state): State<AppState>, Json(req): Json<DirRequest>) -> Result<(), ApiError> {
    state
        .router
        .dispatch(Instruction::Rm(RmParams { path: req.dir }))
        .await?;
    Ok(())
}

async fn itsmkdir(State(state): State<AppState>, Json(req): Json<DirRequest>) -> Result<(), ApiError> {
    state
        .router
        .dispatch(Instruction::Mkdir(MkdirParams { path: req.dir }))
        .await?;
    Ok(())
}

#[derive(Deserialize)]
struct PinRequest {
    file: String,
    pin_count: usize,
    #[serde(default)]
    crust: bool,
}

async fn itspin(State(state): State<AppState>, Json(req): Json<PinRequest>) -> Result<(), ApiError> {
    let content_id = ContentId::from(req.file);
    let replicas = canopy_tree::select_replicas(&content_id, &state.replica_candidates, req.pin_count)
        .map_err(domain_error)?;
    let hosts_locally = replicas.contains(&state.this_node);
    state
        .router
        .dispatch(Instruction::Pin(PinParams {
            content_id: content_id.clone(),
            replica_peers: replicas,
            dest_path: None,
        }))
        .await?;
    if req.crust && hosts_locally {
        state.dealer.add_order(content_id, 0)?;
    }
    Ok(())
}

#[derive(Deserialize)]
struct UnpinRequest {
    file: String,
}

async fn itsunpin(State(state): State<AppState>, Json(req): Json<UnpinRequest>) -> Result<(), ApiError> {
    state
        .router
        .dispatch(Instruction::Unpin(UnpinParams {
            content_id: ContentId::from(req.file),
        }))
        .await?;
    Ok(())
}
