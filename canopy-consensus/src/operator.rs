// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operator Router (component E): chooses local-vs-remote dispatch based on the currently
//! visible cluster leader.
//!
//! The two dispatch modes are a plain tagged enum behind one router, switched atomically under
//! a single lock, rather than a shared long-lived mutable pointer passed between the packer and
//! the operator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canopy_types::{Instruction, PeerId};
use parking_lot::Mutex;
use tracing::info;

use crate::config::OperatorRouterConfig;
use crate::error::ConsensusError;
use crate::log_fsm::LogFsm;
use crate::packer::Packer;
use crate::ports::{ConsensusLog, LeaderRpc};

/// Opens an authenticated RPC client pointed at a newly observed leader. Kept separate from
/// [`LeaderRpc`] itself since connecting and invoking are different concerns.
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(&self, leader: &PeerId) -> anyhow::Result<Arc<dyn LeaderRpc>>;
}

enum Target {
    Local,
    Remote(PeerId, Arc<dyn LeaderRpc>),
}

/// Caps the leader-poll retry loop so a cluster with no leader elected yet fails fast rather
/// than spinning forever.
const MAX_LEADER_POLL_ATTEMPTS: u32 = 50;

pub struct OperatorRouter {
    this_node: PeerId,
    consensus_log: Arc<dyn ConsensusLog>,
    connector: Arc<dyn RpcConnector>,
    packer: Arc<Packer>,
    log_fsm: Arc<LogFsm>,
    config: OperatorRouterConfig,
    current: Mutex<Target>,
}

impl OperatorRouter {
    /// At bootstrap the seed node (`bootstrap_id == this_node_id`) starts local; every other
    /// node starts pointed nowhere and must successfully `try_switch` before it can dispatch
    /// anything.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        this_node: PeerId,
        consensus_log: Arc<dyn ConsensusLog>,
        connector: Arc<dyn RpcConnector>,
        packer: Arc<Packer>,
        log_fsm: Arc<LogFsm>,
        config: OperatorRouterConfig,
        start_local: bool,
    ) -> Self {
        OperatorRouter {
            this_node,
            consensus_log,
            connector,
            packer,
            log_fsm,
            config,
            current: Mutex::new(if start_local {
                Target::Local
            } else {
                Target::Remote(PeerId::from(""), Arc::new(UnreachableRpc))
            }),
        }
    }

    /// Polls the consensus layer's leader view, backing off up to
    /// [`OperatorRouterConfig::leader_poll_backoff_ms`] between attempts, and rebuilds the
    /// operator if the observed leader differs from the current target.
    pub async fn try_switch(&self) -> Result<(), ConsensusError> {
        for attempt in 0..MAX_LEADER_POLL_ATTEMPTS {
            match self.consensus_log.current_leader().await {
                Some(leader) => {
                    self.switch_to(leader).await?;
                    return Ok(());
                }
                None => {
                    if attempt + 1 < MAX_LEADER_POLL_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.leader_poll_backoff_ms,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(ConsensusError::LeaderUnknown)
    }

    async fn switch_to(&self, leader: PeerId) -> Result<(), ConsensusError> {
        let already_current = {
            let current = self.current.lock();
            match &*current {
                Target::Local => leader == self.this_node,
                Target::Remote(p, _) => *p == leader,
            }
        };
        if already_current {
            return Ok(());
        }
        let new_target = if leader == self.this_node {
            Target::Local
        } else {
            let rpc = self.connector.connect(&leader).await?;
            Target::Remote(leader.clone(), rpc)
        };
        info!(leader = %leader, "operator router switching leader target");
        *self.current.lock() = new_target;
        Ok(())
    }

    /// Forwards one user-facing instruction through the current operator. The HTTP front end
    /// constructs the `Instruction` from its request body and calls this for every mutating
    /// route. Once the log FSM has latched permanently inconsistent, every call here is rejected
    /// rather than forwarded, until the node is restarted from a fresh snapshot.
    pub async fn dispatch(&self, instruction: Instruction) -> anyhow::Result<()> {
        if self.log_fsm.is_inconsistent() {
            return Err(ConsensusError::NodeFrozen.into());
        }
        let target_is_local = matches!(&*self.current.lock(), Target::Local);
        if target_is_local {
            self.packer.send(instruction).await
        } else {
            let rpc = {
                let current = self.current.lock();
                match &*current {
                    Target::Remote(_, rpc) => rpc.clone(),
                    Target::Local => unreachable!("checked above"),
                }
            };
            rpc.execute(instruction).await
        }
    }
}

struct UnreachableRpc;

#[async_trait]
impl LeaderRpc for UnreachableRpc {
    async fn execute(&self, _instruction: Instruction) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "operator router has not yet discovered a cluster leader"
        ))
    }
}
