// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Canopy node binary: loads config, wires every component named in the module map, and serves
//! the HTTP front end. Non-goals (real consensus transport, libp2p host, chain RPC client) are
//! satisfied here by the in-process/in-memory stand-ins in [`adapters`] and
//! `canopy_dealer::ports`/`canopy_tree::InMemoryBlockStore` — the seams a real deployment
//! replaces without touching anything upstream of them.

mod adapters;
mod config;
mod http;

use std::sync::Arc;

use canopy_consensus::{LogFsm, OperatorRouter, Packer, PreCommitter};
use canopy_dealer::ports::InMemoryChainClient;
use canopy_dealer::{Dealer, HeightTracker, OrderStore};
use canopy_tree::{InMemoryBlockStore, TreeState};
use canopy_types::PeerId;
use clap::Parser;
use tracing::info;

use crate::adapters::{FileKvStore, FileStateDb, SingleNodeConsensusLog, UnimplementedConnector};
use crate::config::NodeConfig;
use crate::http::AppState;

#[derive(Parser, Debug)]
#[command(name = "canopy-node", about = "Canopy cluster node")]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults if absent.
    #[arg(long, env = "CANOPY_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;
    info!(peer_id = %config.peer_id, bootstrap = config.is_bootstrap(), "starting canopy-node");

    let this_node = PeerId::from(config.peer_id.clone());

    let block_store = Arc::new(InMemoryBlockStore::default());
    let state_db = Arc::new(FileStateDb::new(config.state_db_path.clone()));
    let tree = Arc::new(TreeState::new(block_store, state_db, this_node.clone())?);

    let log_fsm = Arc::new(LogFsm::new(tree.clone()));
    let consensus_log = Arc::new(SingleNodeConsensusLog::new(
        this_node.clone(),
        log_fsm.clone(),
    ));

    let pre_committer = Arc::new(PreCommitter::new(
        tree.clone(),
        consensus_log.clone(),
        config.pre_commit.clone(),
    ));
    let packer = Arc::new(Packer::spawn(config.packer.clone(), pre_committer));

    let router = Arc::new(OperatorRouter::new(
        this_node.clone(),
        consensus_log,
        Arc::new(UnimplementedConnector),
        packer,
        log_fsm,
        config.operator_router.clone(),
        config.is_bootstrap(),
    ));
    if !config.is_bootstrap() {
        router.try_switch().await?;
    }

    let chain_client = Arc::new(InMemoryChainClient::default());
    let height_tracker = Arc::new(HeightTracker::new(chain_client.clone()));
    height_tracker
        .clone()
        .spawn_refresh_loop(std::time::Duration::from_millis(config.dealer.height_refresh_ms));

    let dealer_kv = Arc::new(FileKvStore::new(config.dealer_kv_path.clone()));
    let order_store = OrderStore::new(dealer_kv);
    let dealer = Dealer::new(chain_client, height_tracker, order_store, config.dealer.clone());
    dealer.resume()?;

    let replica_candidates = Arc::new(vec![this_node.clone()]);
    let state = AppState {
        tree,
        router,
        dealer,
        replica_candidates,
        this_node,
    };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "canopy-node HTTP front end listening");
    axum::serve(listener, app).await?;
    Ok(())
}
