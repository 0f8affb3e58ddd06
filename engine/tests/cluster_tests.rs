//! End-to-end scenarios over an in-process cluster: nodes are wired directly
//! as each other's peer handles and a recording gateway captures callbacks.

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis_database::create_temp_db;
use trellis_database::prelude::ConnBuilder;
use trellis_database::utils::DbLifetime;
use trellis_engine::model::stores::datasets::{DatasetStore, DatasetStoreReader};
use trellis_engine::StorageNode;
use trellis_engine_core::api::{
    DynGateway, DynStoragePeer, ExecutionStep, FunctionArgs, GatewayApi, GhostMessage, JobDescriptor, StoragePeerApi,
};
use trellis_engine_core::config::Config;
use trellis_engine_core::errors::{EngineError, EngineResult, PipelineError};
use trellis_engine_core::identifiers::{fidentifier, source_digest};
use trellis_engine_core::meta::{DatasetMeta, MetaUpdateMode, KEY_NUM_BLOCKS};
use trellis_engine_core::ops::{Operation, OperationContext};
use trellis_engine_core::program::{DeclaredProgram, DynProgramLoader, StaticProgramLoader};
use trellis_engine_core::status::Status;
use trellis_engine_core::value::{Block, Value};
use trellis_engine_core::{Didentifier, Fidentifier};

// --- harness -------------------------------------------------------------

struct RecordingGateway {
    reports: Mutex<Vec<(Fidentifier, Status, Option<Value>)>>,
}

impl RecordingGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self { reports: Mutex::new(Vec::new()) })
    }

    async fn wait_for(&self, count: usize) -> Vec<(Fidentifier, Status, Option<Value>)> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if self.reports.lock().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected gateway callbacks in time");
        self.reports.lock().clone()
    }
}

#[async_trait]
impl GatewayApi for RecordingGateway {
    async fn set_status_result(&self, fidentifier: Fidentifier, status: Status, result: Option<Value>) {
        self.reports.lock().push((fidentifier, status, result));
    }
}

/// Blocks a pipeline operation until the test releases it
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn release(&self) {
        *self.open.lock() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
    }
}

struct TestCluster {
    nodes: Vec<Arc<StorageNode>>,
    _lifetimes: Vec<DbLifetime>,
}

impl TestCluster {
    fn build(num_nodes: usize, keyspace_size: u64, loader: DynProgramLoader) -> Self {
        let mut nodes = Vec::with_capacity(num_nodes);
        let mut lifetimes = Vec::with_capacity(num_nodes);
        for node_idx in 0..num_nodes {
            let (lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10)).unwrap();
            let config = Config::new(keyspace_size, node_idx).with_round_timeout(Duration::from_secs(5));
            nodes.push(StorageNode::new(config, db, loader.clone()));
            lifetimes.push(lifetime);
        }
        Self::wire(&nodes);
        Self { nodes, _lifetimes: lifetimes }
    }

    fn wire(nodes: &[Arc<StorageNode>]) {
        for (node_idx, node) in nodes.iter().enumerate() {
            let peers: Vec<DynStoragePeer> = nodes
                .iter()
                .enumerate()
                .filter(|(peer_idx, _)| *peer_idx != node_idx)
                .map(|(_, peer)| peer.clone() as DynStoragePeer)
                .collect();
            node.connect_peers(peers);
        }
    }

    fn node(&self, node_idx: usize) -> &Arc<StorageNode> {
        &self.nodes[node_idx]
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        // Peer handles form reference cycles between the nodes; break them so
        // the databases can be torn down
        for node in &self.nodes {
            node.connect_peers(Vec::new());
        }
    }
}

/// Creates the dataset on its owner, seeds the given per-node shards directly
/// through the store layer (the data-placement tier's job), and maintains the
/// block counter the way the gateway does.
async fn seed_dataset(
    cluster: &TestCluster,
    didentifier: Didentifier,
    meta: DatasetMeta,
    shards: &[Vec<Block>],
) {
    cluster.node(0).create(didentifier, meta).await.unwrap();
    let mut total = 0i64;
    for (node_idx, blocks) in shards.iter().enumerate() {
        for block in blocks {
            cluster.node(node_idx).datasets().append_block(didentifier, block.clone()).unwrap();
            total += 1;
        }
    }
    cluster
        .node(0)
        .update_meta_key(didentifier, MetaUpdateMode::Append, KEY_NUM_BLOCKS.into(), total.into())
        .await
        .unwrap();
}

fn int_block(values: &[i64]) -> Block {
    values.iter().map(|&value| Value::Int(value)).collect()
}

// --- user programs -------------------------------------------------------

fn sum_blocks_op() -> Operation {
    Operation::apply("sum_blocks", |value| {
        let mut items = value.into_list().ok_or_else(|| PipelineError::operation("sum_blocks", "expected the argument list"))?;
        if items.is_empty() {
            return Err(PipelineError::operation("sum_blocks", "missing the block list"));
        }
        let blocks = items.remove(0);
        let total: i64 = blocks
            .as_list()
            .ok_or_else(|| PipelineError::operation("sum_blocks", "expected a block list"))?
            .iter()
            .flat_map(|block| block.as_list().unwrap_or_default())
            .filter_map(Value::as_int)
            .sum();
        Ok(Value::Int(total))
    })
}

/// Pass-through locally, pairwise sum when handed a `(peer, self)` pair
fn pair_sum_op() -> Operation {
    Operation::apply("pair_sum", |value| match value {
        Value::Int(_) => Ok(value),
        Value::List(items) => Ok(Value::Int(items.iter().filter_map(Value::as_int).sum())),
        other => Err(PipelineError::operation("pair_sum", format!("unexpected value {other:?}"))),
    })
}

const ARRAY_SUM_SOURCE: &str = "class ArraySum(AbsDatasetContext): ...";

fn array_sum_loader() -> DynProgramLoader {
    let loader = StaticProgramLoader::new();
    let contexts = vec![OperationContext::new("total_sum", vec![sum_blocks_op(), pair_sum_op()])];
    loader.register(ARRAY_SUM_SOURCE, Arc::new(DeclaredProgram::new("ArraySum", contexts)));
    Arc::new(loader)
}

fn array_sum_meta() -> DatasetMeta {
    DatasetMeta::new("ArraySum", &source_digest(ARRAY_SUM_SOURCE), ARRAY_SUM_SOURCE)
}

/// Sums of adjacent record pairs over the ghost-merged blocks
fn adjacent_sums_op() -> Operation {
    Operation::apply("adjacent_sums", |value| {
        let mut items =
            value.into_list().ok_or_else(|| PipelineError::operation("adjacent_sums", "expected the argument list"))?;
        if items.is_empty() {
            return Err(PipelineError::operation("adjacent_sums", "missing the block list"));
        }
        let blocks = items.remove(0);
        let mut windows = Vec::new();
        for block in blocks.as_list().unwrap_or_default() {
            let records: Vec<i64> = block.as_list().unwrap_or_default().iter().filter_map(Value::as_int).collect();
            for pair in records.windows(2) {
                windows.push(Value::Int(pair[0] + pair[1]));
            }
        }
        Ok(Value::List(windows))
    })
}

/// Pass-through locally, concatenation when handed a `(peer, self)` pair of
/// window lists
fn merge_windows_op() -> Operation {
    Operation::apply("merge_windows", |value| {
        if let Value::List(items) = &value {
            if items.len() == 2 && items.iter().all(|item| matches!(item, Value::List(_))) {
                let merged: Vec<Value> =
                    items.iter().flat_map(|item| item.as_list().unwrap_or_default().to_vec()).collect();
                return Ok(Value::List(merged));
            }
        }
        Ok(value)
    })
}

const WINDOWED_SOURCE: &str = "class SlidingWindows(AbsDatasetContext): ...";

fn windowed_loader() -> DynProgramLoader {
    let loader = StaticProgramLoader::new();
    let contexts = vec![
        OperationContext::new("adjacent_pair_sums", vec![adjacent_sums_op(), merge_windows_op()]).with_ghosts(true, true, 1)
    ];
    loader.register(WINDOWED_SOURCE, Arc::new(DeclaredProgram::new("SlidingWindows", contexts)));
    Arc::new(loader)
}

fn windowed_meta() -> DatasetMeta {
    DatasetMeta::new("SlidingWindows", &source_digest(WINDOWED_SOURCE), WINDOWED_SOURCE)
}

fn sorted_ints(value: &Value) -> Vec<i64> {
    let mut ints: Vec<i64> = value.as_list().unwrap_or_default().iter().filter_map(Value::as_int).collect();
    ints.sort_unstable();
    ints
}

// --- scenarios -----------------------------------------------------------

/// S1: a sum pipeline over two nodes reduces to a single value at the owner
#[tokio::test(flavor = "multi_thread")]
async fn test_sum_over_two_nodes() {
    let cluster = TestCluster::build(2, 100, array_sum_loader());
    let didentifier: Didentifier = 7; // responsibility stretch of node 0
    seed_dataset(&cluster, didentifier, array_sum_meta(), &[vec![int_block(&[1, 2, 3])], vec![int_block(&[4, 5])]]).await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "total_sum", "");
    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();

    let reports = gateway.wait_for(1).await;
    assert_eq!(reports, vec![(fid, Status::Success, Some(Value::Int(15)))]);
}

/// S2 + property 5: a duplicate submit while in flight yields exactly one
/// `Processing` callback and no extra broadcast
#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_submit_short_circuits() {
    let gate = Arc::new(Gate::default());
    let loader = StaticProgramLoader::new();
    let gate_in_op = gate.clone();
    let contexts = vec![OperationContext::new(
        "gated_sum",
        vec![
            Operation::apply("wait_for_release", move |value| {
                gate_in_op.wait();
                Ok(value)
            }),
            sum_blocks_op(),
            pair_sum_op(),
        ],
    )];
    loader.register(ARRAY_SUM_SOURCE, Arc::new(DeclaredProgram::new("ArraySum", contexts)));

    let cluster = TestCluster::build(2, 100, Arc::new(loader));
    let didentifier: Didentifier = 3;
    seed_dataset(&cluster, didentifier, array_sum_meta(), &[vec![int_block(&[1, 2])], vec![int_block(&[3])]]).await;

    // Count initialization broadcasts arriving at node 1
    let inits = Arc::new(AtomicUsize::new(0));
    let counted: DynStoragePeer = Arc::new(CountingPeer { inner: cluster.node(1).clone(), inits: inits.clone() });
    cluster.node(0).connect_peers(vec![counted]);

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "gated_sum", "");
    cluster.node(0).submit_job(didentifier, fid, "gated_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    cluster.node(0).submit_job(didentifier, fid, "gated_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();

    // The duplicate reports immediately; the first completes once released
    let reports = gateway.wait_for(1).await;
    assert_eq!(reports[0], (fid, Status::Processing, None));
    gate.release();
    let reports = gateway.wait_for(2).await;
    assert_eq!(reports[1], (fid, Status::Success, Some(Value::Int(6))));
    assert_eq!(inits.load(Ordering::SeqCst), 1, "the duplicate must not broadcast again");
}

struct CountingPeer {
    inner: Arc<StorageNode>,
    inits: Arc<AtomicUsize>,
}

#[async_trait]
impl StoragePeerApi for CountingPeer {
    async fn create(&self, didentifier: Didentifier, meta: DatasetMeta) -> EngineResult<()> {
        self.inner.create(didentifier, meta).await
    }
    async fn append(&self, didentifier: Didentifier, block: Block) -> EngineResult<()> {
        self.inner.append(didentifier, block).await
    }
    async fn get_meta(&self, didentifier: Didentifier) -> EngineResult<DatasetMeta> {
        self.inner.get_meta(didentifier).await
    }
    async fn update_meta_key(
        &self,
        didentifier: Didentifier,
        mode: MetaUpdateMode,
        key: String,
        value: serde_json::Value,
    ) -> EngineResult<()> {
        self.inner.update_meta_key(didentifier, mode, key, value).await
    }
    async fn get_datasets(&self, is_internal: bool) -> EngineResult<Vec<String>> {
        self.inner.get_datasets(is_internal).await
    }
    async fn get_submitted_jobs(&self, is_internal: bool) -> EngineResult<Vec<JobDescriptor>> {
        self.inner.get_submitted_jobs(is_internal).await
    }
    async fn submit_job(
        &self,
        didentifier: Didentifier,
        fidentifier: Fidentifier,
        function_name: String,
        query: String,
        gateway: DynGateway,
    ) -> EngineResult<()> {
        self.inner.submit_job(didentifier, fidentifier, function_name, query, gateway).await
    }
    async fn initialize_execution(&self, didentifier: Didentifier, fidentifier: Fidentifier, args: FunctionArgs) -> EngineResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.inner.initialize_execution(didentifier, fidentifier, args).await
    }
    async fn execute_function(&self, step: ExecutionStep) -> EngineResult<()> {
        self.inner.execute_function(step).await
    }
    async fn send_ghost(&self, message: GhostMessage) -> EngineResult<()> {
        self.inner.send_ghost(message).await
    }
    async fn ready(&self, didentifier: Didentifier, fidentifier: Fidentifier, meta: DatasetMeta) -> EngineResult<()> {
        self.inner.ready(didentifier, fidentifier, meta).await
    }
    async fn heartbeat(&self) -> EngineResult<()> {
        self.inner.heartbeat().await
    }
}

/// S3 + property 6/9: ghost exchange stitches cross-shard context and the
/// distributed result matches an isolated single-node run
#[tokio::test(flavor = "multi_thread")]
async fn test_ghost_exchange_windowed_sums() {
    let shards =
        [vec![int_block(&[10, 11, 12])], vec![int_block(&[20, 21, 22])], vec![int_block(&[30, 31, 32])]];

    let cluster = TestCluster::build(3, 99, windowed_loader());
    let didentifier: Didentifier = 5; // owned by node 0
    seed_dataset(&cluster, didentifier, windowed_meta(), &shards).await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "adjacent_pair_sums", "");
    cluster
        .node(0)
        .submit_job(didentifier, fid, "adjacent_pair_sums".into(), String::new(), gateway.clone() as DynGateway)
        .await
        .unwrap();
    let reports = gateway.wait_for(1).await;
    let (_, status, distributed) = &reports[0];
    assert_eq!(*status, Status::Success);

    // Isolated baseline over the same blocks on a single node
    let single = TestCluster::build(1, 99, windowed_loader());
    let all_blocks: Vec<Block> = shards.iter().flatten().cloned().collect();
    seed_dataset(&single, didentifier, windowed_meta(), &[all_blocks]).await;
    let single_gateway = RecordingGateway::new();
    single
        .node(0)
        .submit_job(didentifier, fid, "adjacent_pair_sums".into(), String::new(), single_gateway.clone() as DynGateway)
        .await
        .unwrap();
    let single_reports = single_gateway.wait_for(1).await;
    let (_, single_status, baseline) = &single_reports[0];
    assert_eq!(*single_status, Status::Success);

    let expected = vec![21, 23, 32, 32, 41, 43, 52, 52, 61, 63];
    assert_eq!(sorted_ints(distributed.as_ref().unwrap()), expected);
    assert_eq!(sorted_ints(baseline.as_ref().unwrap()), expected);
}

/// S4 + property 4: an append invalidates the cached result and a resubmit
/// recomputes over the grown dataset
#[tokio::test(flavor = "multi_thread")]
async fn test_append_invalidates_cached_result() {
    let cluster = TestCluster::build(2, 100, array_sum_loader());
    let didentifier: Didentifier = 11;
    seed_dataset(&cluster, didentifier, array_sum_meta(), &[vec![int_block(&[1, 2, 3])], vec![int_block(&[4, 5])]]).await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "total_sum", "");
    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(1).await;
    assert_eq!(reports[0].2, Some(Value::Int(15)));

    // A cached resubmit serves the same value without recomputation
    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(2).await;
    assert_eq!(reports[1], (fid, Status::Success, Some(Value::Int(15))));

    // Appending through a non-owner forwards to the owner and invalidates
    cluster.node(1).append(didentifier, int_block(&[7])).await.unwrap();
    cluster
        .node(1)
        .update_meta_key(didentifier, MetaUpdateMode::Append, KEY_NUM_BLOCKS.into(), 1.into())
        .await
        .unwrap();

    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(3).await;
    assert_eq!(reports[2], (fid, Status::Success, Some(Value::Int(22))));
}

/// S5 + property 3: creating a known dataset id conflicts, regardless of the
/// node taking the call, and the stored state is untouched
#[tokio::test(flavor = "multi_thread")]
async fn test_create_conflict() {
    let cluster = TestCluster::build(3, 99, array_sum_loader());
    let didentifier: Didentifier = 40; // owned by node 1

    cluster.node(2).create(didentifier, array_sum_meta()).await.unwrap();
    for node_idx in 0..3 {
        match cluster.node(node_idx).create(didentifier, array_sum_meta()).await {
            Err(EngineError::AlreadyExists(conflicting)) => assert_eq!(conflicting, didentifier),
            other => panic!("expected a conflict on node {node_idx}, got {other:?}"),
        }
    }

    // Owner-side state is intact and identically visible from every node
    let metas = [
        cluster.node(0).get_meta(didentifier).await.unwrap(),
        cluster.node(1).get_meta(didentifier).await.unwrap(),
        cluster.node(2).get_meta(didentifier).await.unwrap(),
    ];
    assert_eq!(metas[0], metas[1]);
    assert_eq!(metas[1], metas[2]);
    assert_eq!(metas[0].root_idx().unwrap(), 1);
    assert!(cluster.node(1).datasets().blocks(didentifier).unwrap().is_empty());
}

/// S6: a submit through a non-owner still reports exactly once to the
/// originally supplied gateway
#[tokio::test(flavor = "multi_thread")]
async fn test_submit_through_non_owner() {
    let cluster = TestCluster::build(3, 99, array_sum_loader());
    let didentifier: Didentifier = 70; // owned by node 2
    seed_dataset(
        &cluster,
        didentifier,
        array_sum_meta(),
        &[vec![int_block(&[1])], vec![int_block(&[2])], vec![int_block(&[3])]],
    )
    .await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "total_sum", "q");
    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), "q".into(), gateway.clone() as DynGateway).await.unwrap();

    let reports = gateway.wait_for(1).await;
    assert_eq!(reports, vec![(fid, Status::Success, Some(Value::Int(6)))]);

    // No further callbacks trickle in afterwards
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.reports.lock().len(), 1);
}

// --- cluster-level properties --------------------------------------------

/// Property 2/3: appends forward to the owner and accumulate there in order
#[tokio::test(flavor = "multi_thread")]
async fn test_append_monotonicity_via_any_node() {
    let cluster = TestCluster::build(3, 99, array_sum_loader());
    let didentifier: Didentifier = 50; // owned by node 1
    cluster.node(0).create(didentifier, array_sum_meta()).await.unwrap();

    let mut rng = rand::thread_rng();
    for value in 0..12i64 {
        let via = rand::Rng::gen_range(&mut rng, 0..3);
        cluster.node(via).append(didentifier, int_block(&[value])).await.unwrap();
    }

    let blocks = cluster.node(1).datasets().blocks(didentifier).unwrap();
    assert_eq!(blocks.len(), 12);
    for (index, block) in blocks.iter().enumerate() {
        assert_eq!(block, &int_block(&[index as i64]));
    }
    // Non-owners hold no shard for a dataset that was only appended externally
    assert!(cluster.node(0).datasets().blocks(didentifier).is_err());

    // Appending to an unknown dataset is rejected on every node
    for node_idx in 0..3 {
        assert!(matches!(
            cluster.node(node_idx).append(7, int_block(&[0])).await,
            Err(EngineError::DatasetNotFound(_))
        ));
    }
}

/// Property 9: a single-node deployment computes the same sum as a cluster
/// over an arbitrary split of the same blocks
#[tokio::test(flavor = "multi_thread")]
async fn test_single_node_equivalence_for_sums() {
    let single = TestCluster::build(1, 100, array_sum_loader());
    let didentifier: Didentifier = 13;
    seed_dataset(&single, didentifier, array_sum_meta(), &[vec![int_block(&[1, 2, 3]), int_block(&[4, 5])]]).await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "total_sum", "");
    single.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(1).await;
    assert_eq!(reports[0].2, Some(Value::Int(15)));
}

/// A submit against an unknown dataset fails upfront and rolls its
/// placeholder back, so a later (corrected) submit is admitted normally
#[tokio::test(flavor = "multi_thread")]
async fn test_submit_unknown_dataset_rolls_back() {
    let cluster = TestCluster::build(2, 100, array_sum_loader());
    let didentifier: Didentifier = 21;
    let fid = fidentifier(didentifier, "total_sum", "");
    let gateway = RecordingGateway::new();

    let result = cluster
        .node(0)
        .submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway)
        .await;
    assert!(matches!(result, Err(EngineError::DatasetNotFound(_))));
    assert!(cluster.node(0).get_submitted_jobs(true).await.unwrap().is_empty());

    seed_dataset(&cluster, didentifier, array_sum_meta(), &[vec![int_block(&[2, 3])], vec![]]).await;
    cluster.node(0).submit_job(didentifier, fid, "total_sum".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(1).await;
    assert_eq!(reports[0], (fid, Status::Success, Some(Value::Int(5))));
}

/// A failing pipeline reports an error status through the gateway callback
#[tokio::test(flavor = "multi_thread")]
async fn test_pipeline_failure_reports_error_status() {
    let loader = StaticProgramLoader::new();
    let contexts = vec![OperationContext::new(
        "explode",
        vec![Operation::apply("explode", |_| Err(PipelineError::operation("explode", "bad record"))), pair_sum_op()],
    )];
    loader.register(ARRAY_SUM_SOURCE, Arc::new(DeclaredProgram::new("ArraySum", contexts)));

    let cluster = TestCluster::build(1, 100, Arc::new(loader));
    let didentifier: Didentifier = 2;
    seed_dataset(&cluster, didentifier, array_sum_meta(), &[vec![int_block(&[1])]]).await;

    let gateway = RecordingGateway::new();
    let fid = fidentifier(didentifier, "explode", "");
    cluster.node(0).submit_job(didentifier, fid, "explode".into(), String::new(), gateway.clone() as DynGateway).await.unwrap();
    let reports = gateway.wait_for(1).await;
    assert_eq!(reports[0], (fid, Status::InvalidData, None));
}

/// The readiness wait of a reduction hop is bounded: a stray hop against a
/// node that never computed a partial times out instead of deadlocking
#[tokio::test(flavor = "multi_thread")]
async fn test_reduction_hop_times_out_without_partial() {
    let loader = array_sum_loader();
    let (lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10)).unwrap();
    let config = Config::new(100, 0).with_round_timeout(Duration::from_millis(100));
    let node = StorageNode::new(config, db, loader);

    let didentifier: Didentifier = 4;
    node.create(didentifier, array_sum_meta()).await.unwrap();
    node.datasets().append_block(didentifier, int_block(&[1])).unwrap();
    node.update_meta_key(didentifier, MetaUpdateMode::Append, KEY_NUM_BLOCKS.into(), 1.into()).await.unwrap();

    let mut meta = node.get_meta(didentifier).await.unwrap();
    meta.set_root_idx(0);
    let step = ExecutionStep {
        itr: 1,
        didentifier,
        fidentifier: 77,
        function_name: "total_sum".into(),
        meta,
        root: 0,
        query: None,
        recv_value: Some(Value::Int(1)),
    };
    assert!(matches!(node.execute_function(step).await, Err(EngineError::RoundTimeout(1))));

    drop(node);
    drop(lifetime);
}
