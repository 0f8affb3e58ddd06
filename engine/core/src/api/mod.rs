use crate::errors::EngineResult;
use crate::meta::{DatasetMeta, MetaUpdateMode};
use crate::status::Status;
use crate::value::{Block, Value};
use crate::{Didentifier, Fidentifier, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Everything a peer needs to resume a job locally: carried by execution
/// broadcasts and ghost messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionArgs {
    pub function_name: String,
    pub meta: DatasetMeta,
    pub root: NodeId,
    pub query: String,
}

/// Edge slices exchanged between ring neighbors ahead of execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GhostMessage {
    /// Per-block left-context slices (the sender's block tails), or `None`
    /// when this message carries only the other side
    pub left: Option<Vec<Option<Block>>>,
    /// Per-block right-context slices (the sender's block heads)
    pub right: Option<Vec<Option<Block>>>,
    /// Whether the receiver must hold both sides before starting execution
    pub needs_both: bool,
    pub didentifier: Didentifier,
    pub fidentifier: Fidentifier,
    pub args: FunctionArgs,
}

/// One hop of the tree-barrier execution protocol
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub itr: usize,
    pub didentifier: Didentifier,
    pub fidentifier: Fidentifier,
    pub function_name: String,
    pub meta: DatasetMeta,
    pub root: NodeId,
    /// Present on the initial round only; reduction hops carry no query
    pub query: Option<String>,
    /// The sender's partial, absent on the initial round
    pub recv_value: Option<Value>,
}

impl ExecutionStep {
    /// The round-zero step a node runs against its own blocks
    pub fn initial(didentifier: Didentifier, fidentifier: Fidentifier, args: FunctionArgs) -> Self {
        Self {
            itr: 0,
            didentifier,
            fidentifier,
            function_name: args.function_name,
            meta: args.meta,
            root: args.root,
            query: Some(args.query),
            recv_value: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub didentifier: Didentifier,
    pub fidentifier: Fidentifier,
    pub in_flight: bool,
    /// Whether this node admitted the job (and owns the gateway callback)
    pub submitted_here: bool,
}

/// The storage-node surface: gateway-facing dataset operations plus the
/// peer-to-peer execution protocol.
///
/// Implemented by the node itself and by transport clients alike, so a
/// cluster can be wired in-process or across the network. The authenticated
/// envelope codec sits below this seam.
#[async_trait]
pub trait StoragePeerApi: Send + Sync {
    async fn create(&self, didentifier: Didentifier, meta: DatasetMeta) -> EngineResult<()>;

    async fn append(&self, didentifier: Didentifier, block: Block) -> EngineResult<()>;

    async fn get_meta(&self, didentifier: Didentifier) -> EngineResult<DatasetMeta>;

    async fn update_meta_key(&self, didentifier: Didentifier, mode: MetaUpdateMode, key: String, value: JsonValue) -> EngineResult<()>;

    async fn get_datasets(&self, is_internal: bool) -> EngineResult<Vec<String>>;

    async fn get_submitted_jobs(&self, is_internal: bool) -> EngineResult<Vec<JobDescriptor>>;

    async fn submit_job(
        &self,
        didentifier: Didentifier,
        fidentifier: Fidentifier,
        function_name: String,
        query: String,
        gateway: DynGateway,
    ) -> EngineResult<()>;

    async fn initialize_execution(&self, didentifier: Didentifier, fidentifier: Fidentifier, args: FunctionArgs) -> EngineResult<()>;

    async fn execute_function(&self, step: ExecutionStep) -> EngineResult<()>;

    async fn send_ghost(&self, message: GhostMessage) -> EngineResult<()>;

    /// Reserved notification
    async fn ready(&self, didentifier: Didentifier, fidentifier: Fidentifier, meta: DatasetMeta) -> EngineResult<()>;

    /// Liveness probe for the monitor tier
    async fn heartbeat(&self) -> EngineResult<()>;
}

pub type DynStoragePeer = Arc<dyn StoragePeerApi>;

/// Callback surface of the originating gateway
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn set_status_result(&self, fidentifier: Fidentifier, status: Status, result: Option<Value>);
}

pub type DynGateway = Arc<dyn GatewayApi>;
