//! Lease reply contract

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, WorkerId};

/// Reason a lease request was not granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingFailureType {
    /// Generic scheduling failure
    Failed,
    /// The owner asked for the task to be cancelled
    #[default]
    CancelledIntended,
    /// The runtime environment of the task could not be set up
    CancelledRuntimeEnvSetupFailed,
    /// The placement group the task belonged to was removed
    CancelledPlacementGroupRemoved,
    /// No node in the cluster can ever satisfy the task's resource shape
    CancelledUnschedulable,
    /// A grant-or-reject request could not be granted on this node
    Rejected,
}

impl std::fmt::Display for SchedulingFailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingFailureType::Failed => write!(f, "SCHEDULING_FAILED"),
            SchedulingFailureType::CancelledIntended => write!(f, "CANCELLED_INTENDED"),
            SchedulingFailureType::CancelledRuntimeEnvSetupFailed => {
                write!(f, "CANCELLED_RUNTIME_ENV_SETUP_FAILED")
            }
            SchedulingFailureType::CancelledPlacementGroupRemoved => {
                write!(f, "CANCELLED_PLACEMENT_GROUP_REMOVED")
            }
            SchedulingFailureType::CancelledUnschedulable => write!(f, "CANCELLED_UNSCHEDULABLE"),
            SchedulingFailureType::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Final answer to a lease request; exactly one is sent per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaseReply {
    /// A local worker was leased to the requester
    Granted { worker_id: WorkerId, node_id: NodeId },
    /// The requester should retry against another node
    Spillback {
        node_id: NodeId,
        address: String,
        port: u16,
    },
    /// The request was cancelled or refused
    Rejected {
        failure_type: SchedulingFailureType,
        message: String,
    },
}

impl LeaseReply {
    /// Whether this reply grants a lease
    pub fn is_granted(&self) -> bool {
        matches!(self, LeaseReply::Granted { .. })
    }

    /// Failure type of a rejection, if any
    pub fn failure_type(&self) -> Option<SchedulingFailureType> {
        match self {
            LeaseReply::Rejected { failure_type, .. } => Some(*failure_type),
            _ => None,
        }
    }
}
