use crate::cache::{Admission, GhostCache, ResultCache};
use crate::model::stores::datasets::{DatasetStore, DatasetStoreReader, DbDatasetStore};
use crate::model::stores::flags::{DbExistenceFlagStore, ExistenceFlagStore, ExistenceFlagStoreReader};
use crate::processes::ghost;
use crate::processes::interpreter;
use crate::processes::partition::{self, Responsibility};
use crate::processes::tree_barrier;
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Weak};
use tokio::time::timeout;
use trellis_database::prelude::{StoreError, DB};
use trellis_engine_core::api::{
    DynGateway, DynStoragePeer, ExecutionStep, FunctionArgs, GhostMessage, JobDescriptor, StoragePeerApi,
};
use trellis_engine_core::config::Config;
use trellis_engine_core::errors::{EngineError, EngineResult};
use trellis_engine_core::meta::{DatasetMeta, MetaUpdateMode};
use trellis_engine_core::ops::{Operation, OperationContext};
use trellis_engine_core::program::DynProgramLoader;
use trellis_engine_core::status::Status;
use trellis_engine_core::value::{Block, Value};
use trellis_engine_core::{Didentifier, Fidentifier, NodeId};

/// A storage-tier node: owns its shard stores and in-memory caches, speaks
/// the peer protocol, and coordinates job execution across the cluster.
///
/// The node itself implements [`StoragePeerApi`], so an in-process cluster
/// wires nodes directly as each other's peer handles; networked deployments
/// substitute transport clients behind the same trait.
pub struct StorageNode {
    config: Config,
    datasets: DbDatasetStore,
    flags: DbExistenceFlagStore,
    results: ResultCache,
    ghosts: GhostCache,
    loader: DynProgramLoader,
    /// Long-lived client handles to every other storage node, in ascending
    /// node order with self excluded
    peers: RwLock<Vec<DynStoragePeer>>,
    /// Bounded pool running pipeline work off the async runtime
    pool: rayon::ThreadPool,
    me: Weak<StorageNode>,
}

fn store_err(err: StoreError) -> EngineError {
    EngineError::Storage(err.to_string())
}

impl StorageNode {
    pub fn new(config: Config, db: Arc<DB>, loader: DynProgramLoader) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            datasets: DbDatasetStore::new(Arc::clone(&db), config.store_cache_size),
            flags: DbExistenceFlagStore::new(db, config.store_cache_size),
            results: ResultCache::new(),
            ghosts: GhostCache::new(),
            loader,
            peers: RwLock::new(Vec::new()),
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(config.parallel_workers)
                .thread_name(|idx| format!("pipeline-{idx}"))
                .build()
                .unwrap(),
            me: me.clone(),
            config,
        })
    }

    /// Installs the cluster peer handles (ascending node order, self excluded)
    pub fn connect_peers(&self, peers: Vec<DynStoragePeer>) {
        *self.peers.write() = peers;
    }

    pub fn node_idx(&self) -> NodeId {
        self.config.node_idx
    }

    /// Direct store access for the data-placement tier, which distributes
    /// shard blocks without going through the owner-forwarded `append`
    pub fn datasets(&self) -> &DbDatasetStore {
        &self.datasets
    }

    fn arc(&self) -> Arc<Self> {
        self.me.upgrade().expect("the node outlives its own spawned work")
    }

    fn num_nodes(&self) -> usize {
        self.peers.read().len() + 1
    }

    fn peer(&self, position: usize) -> DynStoragePeer {
        self.peers.read()[position].clone()
    }

    fn peers_snapshot(&self) -> Vec<DynStoragePeer> {
        self.peers.read().clone()
    }

    fn responsibility(&self, didentifier: Didentifier) -> Responsibility {
        partition::find_responsibility(didentifier, self.config.keyspace_size, self.config.node_idx, self.num_nodes())
    }

    fn local_meta(&self, didentifier: Didentifier) -> EngineResult<DatasetMeta> {
        if !self.flags.is_set(didentifier).map_err(store_err)? {
            return Err(EngineError::DatasetNotFound(didentifier));
        }
        let bytes = self
            .datasets
            .meta_bytes(didentifier)
            .map_err(store_err)?
            .ok_or(EngineError::DatasetNotFound(didentifier))?;
        Ok(DatasetMeta::from_bytes(&bytes)?)
    }

    /// Decodes the user program carried in the metadata and resolves the
    /// context of the named function. The source blob is decoded per
    /// invocation and discarded.
    fn operation_context(&self, didentifier: Didentifier, meta: &DatasetMeta, function_name: &str) -> EngineResult<OperationContext> {
        if meta.num_blocks() == 0 {
            return Err(EngineError::EmptyDataset(didentifier));
        }
        let program = self.loader.load(meta.source()?, meta.dataset_name()?, meta.digest()?)?;
        program
            .operation_context(function_name)
            .ok_or_else(|| EngineError::OperationNotFound(function_name.to_owned()))
    }

    /// The local shard; a node holding no slot for the dataset participates
    /// with an empty block list
    fn local_blocks(&self, didentifier: Didentifier) -> EngineResult<Vec<Block>> {
        match self.datasets.blocks(didentifier) {
            Ok(blocks) => Ok(blocks),
            Err(StoreError::KeyNotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(store_err(err)),
        }
    }

    /// Reports a job failure to the admitting gateway (if this node holds it)
    /// and drops the cache slot so a corrected submit can retry
    async fn abort_job(&self, didentifier: Didentifier, fidentifier: Fidentifier, err: &EngineError) {
        warn!("node {}: job {} aborted: {}", self.config.node_idx, fidentifier, err);
        if let Some(gateway) = self.results.remove(didentifier, fidentifier) {
            gateway.set_status_result(fidentifier, err.status(), None).await;
        }
    }

    /// Decides whether the job needs ghost exchange and, if so, dispatches
    /// the edge slices to the ring neighbors (or to self on a single-node
    /// deployment). Returns `false` when execution can start right away.
    async fn handle_ghosts(
        &self,
        didentifier: Didentifier,
        fidentifier: Fidentifier,
        context: &OperationContext,
        args: &FunctionArgs,
    ) -> EngineResult<bool> {
        let local = self.num_nodes() == 1;
        let is_root = args.root == self.config.node_idx;
        let blocks = self.local_blocks(didentifier)?;
        let Some(plan) = ghost::extract_ghosts(context, &blocks, is_root, local) else {
            return Ok(false);
        };
        debug!("node {}: exchanging ghosts for job {}", self.config.node_idx, fidentifier);

        if local {
            let message = GhostMessage {
                left: plan.left,
                right: plan.right,
                needs_both: plan.needs_both,
                didentifier,
                fidentifier,
                args: args.clone(),
            };
            self.receive_ghost(message).await?;
        } else {
            let (left_position, right_position) =
                partition::neighbors(self.config.node_idx, self.num_nodes()).expect("a multi-node ring has neighbors");
            if let Some(heads) = plan.right {
                self.spawn_ghost_send(
                    self.peer(left_position),
                    GhostMessage {
                        left: None,
                        right: Some(heads),
                        needs_both: plan.needs_both,
                        didentifier,
                        fidentifier,
                        args: args.clone(),
                    },
                );
            }
            if let Some(tails) = plan.left {
                self.spawn_ghost_send(
                    self.peer(right_position),
                    GhostMessage {
                        left: Some(tails),
                        right: None,
                        needs_both: plan.needs_both,
                        didentifier,
                        fidentifier,
                        args: args.clone(),
                    },
                );
            }
        }
        Ok(true)
    }

    fn spawn_ghost_send(&self, peer: DynStoragePeer, message: GhostMessage) {
        tokio::spawn(async move {
            if let Err(err) = peer.send_ghost(message).await {
                warn!("ghost delivery failed: {err}");
            }
        });
    }

    async fn receive_ghost(&self, message: GhostMessage) -> EngineResult<()> {
        let GhostMessage { left, right, needs_both, didentifier, fidentifier, args } = message;
        debug_assert!(left.is_some() || right.is_some(), "a ghost message must carry at least one side");
        trace!("node {}: ghost receipt for job {}", self.config.node_idx, fidentifier);

        let is_root = args.root == self.config.node_idx;
        let left = left.map(|side| ghost::align_incoming_left(side, is_root));
        if self.ghosts.deposit(fidentifier, left, right, needs_both) {
            // Fresh edge context supersedes any previously cached partial
            self.results.reset_partial(didentifier, fidentifier);
            self.execute_step(ExecutionStep::initial(didentifier, fidentifier, args)).await?;
        }
        Ok(())
    }

    /// Runs the execution protocol hop, converting failures into a status
    /// report toward the admitting gateway
    async fn execute_step(&self, step: ExecutionStep) -> EngineResult<()> {
        let (didentifier, fidentifier) = (step.didentifier, step.fidentifier);
        match self.run_execution(step).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort_job(didentifier, fidentifier, &err).await;
                Err(err)
            }
        }
    }

    async fn run_execution(&self, step: ExecutionStep) -> EngineResult<()> {
        let ExecutionStep { itr, didentifier, fidentifier, function_name, meta, root, query, recv_value } = step;
        trace!("node {}: executing {} round {} for job {}", self.config.node_idx, function_name, itr, fidentifier);
        let context = self.operation_context(didentifier, &meta, &function_name)?;

        // A reduction hop must never combine before the local partial exists
        if itr >= 1 {
            self.await_partial(didentifier, fidentifier, itr).await?;
        }

        let job_lock = self.results.job_lock(didentifier, fidentifier);
        let _guard = job_lock.lock().await;

        if self.results.partial(didentifier, fidentifier).is_none() {
            let blocks = match self.ghosts.take(fidentifier) {
                Some(entry) => ghost::merge_ghosts(self.local_blocks(didentifier)?, &entry),
                None => self.local_blocks(didentifier)?,
            };
            let input = interpreter::initial_arguments(blocks, &context, query.as_deref().unwrap_or_default());
            let partial = self.run_pipeline(context.operations.clone(), input).await?;
            debug!("node {}: partial for job {} is {:?}", self.config.node_idx, fidentifier, partial);
            self.results.store_partial(didentifier, fidentifier, partial);
        }

        let reduce = context.terminal_reduce()?;
        let combines = match recv_value {
            Some(recv) if itr >= 1 => {
                let current = self.results.partial(didentifier, fidentifier).expect("stored above under the job lock");
                let combined = reduce.call(Value::List(vec![recv, current]))?;
                self.results.store_partial(didentifier, fidentifier, combined);
                self.results.record_combine(didentifier, fidentifier)
            }
            _ => self.results.combines(didentifier, fidentifier),
        };

        // Hops may arrive out of round order; progress is gated on how many
        // peer partials this node has absorbed, not on the hop's round label
        let num_nodes = self.num_nodes();
        if combines < tree_barrier::expected_receives(self.config.node_idx, num_nodes, root) {
            trace!("node {}: job {} holding after {} combines", self.config.node_idx, fidentifier, combines);
            return Ok(());
        }

        match tree_barrier::send_target(self.config.node_idx, num_nodes, root) {
            Some((round, target)) => {
                let partial = self.results.partial(didentifier, fidentifier).expect("stored above under the job lock");
                debug!("node {}: forwarding partial of job {} to node {}", self.config.node_idx, fidentifier, target);
                let peer = self.peer(partition::peer_position(self.config.node_idx, target));
                let next = ExecutionStep {
                    itr: round + 1,
                    didentifier,
                    fidentifier,
                    function_name,
                    meta,
                    root,
                    query: None,
                    recv_value: Some(partial),
                };
                tokio::spawn(async move {
                    if let Err(err) = peer.execute_function(next).await {
                        warn!("reduction hop failed: {err}");
                    }
                });
            }
            None => {
                let result = self.results.partial(didentifier, fidentifier).expect("stored above under the job lock");
                let gateway = self.results.complete(didentifier, fidentifier);
                info!("node {}: job {} finished with {:?}", self.config.node_idx, fidentifier, result);
                if let Some(gateway) = gateway {
                    gateway.set_status_result(fidentifier, Status::Success, Some(result)).await;
                }
            }
        }
        Ok(())
    }

    /// Blocks an incoming reduction hop until this node's own partial is in
    /// the cache, bounded by the configured round timeout
    async fn await_partial(&self, didentifier: Didentifier, fidentifier: Fidentifier, itr: usize) -> EngineResult<()> {
        let mut ready = self.results.subscribe_ready(didentifier, fidentifier);
        if *ready.borrow() {
            return Ok(());
        }
        timeout(self.config.round_timeout, async {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|_| EngineError::RoundTimeout(itr))
    }

    async fn run_pipeline(&self, operations: Vec<Operation>, input: Value) -> EngineResult<Value> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(interpreter::interpret(&operations, input));
        });
        rx.await.map_err(|_| EngineError::Storage("pipeline worker terminated".into()))?.map_err(EngineError::from)
    }

    /// Aborts the job if it is still in flight after the deadline; bounds the
    /// needs-both ghost gate, which otherwise deadlocks on a lost side
    fn spawn_watchdog(&self, didentifier: Didentifier, fidentifier: Fidentifier) {
        let rounds = usize::BITS - self.num_nodes().leading_zeros() + 2;
        let deadline = self.config.round_timeout * rounds;
        // Weak so a sleeping watchdog never keeps a stopped node alive
        let node = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let Some(node) = node.upgrade() else { return };
            if let Some(gateway) = node.results.remove_if_in_flight(didentifier, fidentifier) {
                warn!("node {}: job {} timed out", node.config.node_idx, fidentifier);
                gateway.set_status_result(fidentifier, Status::InvalidData, None).await;
            }
        });
    }
}

#[async_trait]
impl StoragePeerApi for StorageNode {
    async fn create(&self, didentifier: Didentifier, mut meta: DatasetMeta) -> EngineResult<()> {
        match self.responsibility(didentifier) {
            Responsibility::Remote(position) => self.peer(position).create(didentifier, meta).await,
            Responsibility::Local => {
                if self.flags.is_set(didentifier).map_err(store_err)? {
                    return Err(EngineError::AlreadyExists(didentifier));
                }
                info!("node {}: creating dataset {}", self.config.node_idx, didentifier);
                meta.set_root_idx(self.config.node_idx);
                self.flags.set(didentifier).map_err(store_err)?;
                self.datasets.create(didentifier, meta.to_bytes()).map_err(store_err)?;
                Ok(())
            }
        }
    }

    async fn append(&self, didentifier: Didentifier, block: Block) -> EngineResult<()> {
        match self.responsibility(didentifier) {
            Responsibility::Remote(position) => self.peer(position).append(didentifier, block).await,
            Responsibility::Local => {
                if !self.flags.is_set(didentifier).map_err(store_err)? {
                    return Err(EngineError::DatasetNotFound(didentifier));
                }
                info!("node {}: appending a block of {} records to dataset {}", self.config.node_idx, block.len(), didentifier);
                self.datasets.append_block(didentifier, block).map_err(store_err)?;
                // The dataset changed; any cached result is stale now
                self.results.invalidate_dataset(didentifier);
                Ok(())
            }
        }
    }

    async fn get_meta(&self, didentifier: Didentifier) -> EngineResult<DatasetMeta> {
        match self.responsibility(didentifier) {
            Responsibility::Remote(position) => self.peer(position).get_meta(didentifier).await,
            Responsibility::Local => self.local_meta(didentifier),
        }
    }

    async fn update_meta_key(
        &self,
        didentifier: Didentifier,
        mode: MetaUpdateMode,
        key: String,
        value: JsonValue,
    ) -> EngineResult<()> {
        match self.responsibility(didentifier) {
            Responsibility::Remote(position) => self.peer(position).update_meta_key(didentifier, mode, key, value).await,
            Responsibility::Local => {
                let mut meta = self.local_meta(didentifier)?;
                meta.update_key(mode, &key, value)?;
                debug!("node {}: metadata key {} of dataset {} updated", self.config.node_idx, key, didentifier);
                self.datasets.write_meta(didentifier, meta.to_bytes()).map_err(store_err)
            }
        }
    }

    async fn get_datasets(&self, is_internal: bool) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        for (didentifier, entry) in self.datasets.entries().map_err(store_err)? {
            match &entry.meta {
                Some(bytes) => names.push(DatasetMeta::from_bytes(bytes)?.dataset_name()?.to_owned()),
                // Shard-only slots are surfaced to internal callers only
                None if is_internal => names.push(format!("shard:{didentifier}")),
                None => {}
            }
        }
        Ok(names)
    }

    async fn get_submitted_jobs(&self, is_internal: bool) -> EngineResult<Vec<JobDescriptor>> {
        Ok(self.results.descriptors(is_internal))
    }

    async fn submit_job(
        &self,
        didentifier: Didentifier,
        fidentifier: Fidentifier,
        function_name: String,
        query: String,
        gateway: DynGateway,
    ) -> EngineResult<()> {
        if let Responsibility::Remote(position) = self.responsibility(didentifier) {
            return self.peer(position).submit_job(didentifier, fidentifier, function_name, query, gateway).await;
        }

        match self.results.admit(didentifier, fidentifier, gateway.clone()) {
            Admission::InFlight => {
                debug!("node {}: job {} is already in flight", self.config.node_idx, fidentifier);
                gateway.set_status_result(fidentifier, Status::Processing, None).await;
                return Ok(());
            }
            Admission::Cached(result) => {
                debug!("node {}: job {} served from cache", self.config.node_idx, fidentifier);
                gateway.set_status_result(fidentifier, Status::Success, Some(result)).await;
                return Ok(());
            }
            Admission::Admitted => {}
        }

        let meta = match self.local_meta(didentifier) {
            Ok(meta) => meta,
            Err(err) => {
                // Roll the placeholder back so a corrected submit can retry
                self.results.remove(didentifier, fidentifier);
                return Err(err);
            }
        };

        info!("node {}: admitted job {} ({}) on dataset {}", self.config.node_idx, fidentifier, function_name, didentifier);
        self.spawn_watchdog(didentifier, fidentifier);
        let args = FunctionArgs { function_name, meta, root: self.config.node_idx, query };
        for peer in self.peers_snapshot() {
            let args = args.clone();
            tokio::spawn(async move {
                if let Err(err) = peer.initialize_execution(didentifier, fidentifier, args).await {
                    warn!("peer initialization failed: {err}");
                }
            });
        }
        let node = self.arc();
        tokio::spawn(async move {
            let _ = node.initialize_execution(didentifier, fidentifier, args).await;
        });
        Ok(())
    }

    async fn initialize_execution(&self, didentifier: Didentifier, fidentifier: Fidentifier, args: FunctionArgs) -> EngineResult<()> {
        debug!("node {}: initializing {} for job {}", self.config.node_idx, args.function_name, fidentifier);
        let outcome: EngineResult<()> = async {
            let context = self.operation_context(didentifier, &args.meta, &args.function_name)?;
            if !self.handle_ghosts(didentifier, fidentifier, &context, &args).await? {
                // No edge context needed: run the initial round right away
                self.execute_step(ExecutionStep::initial(didentifier, fidentifier, args)).await?;
            }
            Ok(())
        }
        .await;
        if let Err(ref err) = outcome {
            self.abort_job(didentifier, fidentifier, err).await;
        }
        outcome
    }

    async fn execute_function(&self, step: ExecutionStep) -> EngineResult<()> {
        self.execute_step(step).await
    }

    async fn send_ghost(&self, message: GhostMessage) -> EngineResult<()> {
        self.receive_ghost(message).await
    }

    async fn ready(&self, didentifier: Didentifier, fidentifier: Fidentifier, _meta: DatasetMeta) -> EngineResult<()> {
        trace!("node {}: ready notification for job {} on dataset {}", self.config.node_idx, fidentifier, didentifier);
        Ok(())
    }

    async fn heartbeat(&self) -> EngineResult<()> {
        trace!("node {}: heartbeat", self.config.node_idx);
        Ok(())
    }
}
