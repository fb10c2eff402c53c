//! Fund-flow tracing: breadth-first expansion over spend relationships

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ExplorerService, OutputStatus};
use crate::models::TransactionDetails;
use crate::validation::MAX_TRACE_DEPTH;

/// Heads expanded concurrently before yielding
pub const TRACE_BATCH_SIZE: usize = 5;
pub const DEFAULT_TRACE_DEPTH: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodeType", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TraceNode {
    Output {
        id: String,
        txid: String,
        vout: u32,
        value: f64,
        level: u32,
        spent: bool,
        addresses: Vec<String>,
        time: Option<i64>,
        confirmations: u64,
    },
    Transaction {
        id: String,
        txid: String,
        level: u32,
        time: Option<i64>,
        confirmations: u64,
    },
    /// Input spending a traced output; sits between `level` and `level + 1`
    Input {
        id: String,
        txid: String,
        vin: usize,
        value: f64,
        source_txid: String,
        source_vout: u32,
        level: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub value: f64,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInput {
    pub index: usize,
    pub prev_txid: Option<String>,
    pub prev_vout: Option<u32>,
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceOutput {
    pub index: usize,
    pub value: f64,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceTransaction {
    pub txid: String,
    pub size: u64,
    pub time: Option<i64>,
    pub confirmations: u64,
    pub level: u32,
    pub inputs: Vec<TraceInput>,
    pub outputs: Vec<TraceOutput>,
    pub output_value: f64,
}

/// Value received by one address across the traced transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressFlow {
    pub address: String,
    pub total_received: f64,
    pub txids: Vec<String>,
}

/// An output at the expansion boundary. Terminal heads are unspent (or their
/// spender is unknown) and are not expanded further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceHead {
    pub txid: String,
    pub vout: u32,
    pub level: u32,
    pub value: f64,
    pub terminal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStats {
    pub total_value: f64,
    pub transaction_count: usize,
    pub address_count: usize,
    pub max_level: u32,
    pub completed_heads: usize,
    pub total_heads: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceFilters {
    /// Only outputs paying one of these are followed; empty follows all
    pub addresses: BTreeSet<String>,
    pub min_value: f64,
}

impl TraceFilters {
    pub fn follows(&self, value: f64, addresses: &[String]) -> bool {
        value >= self.min_value
            && (self.addresses.is_empty() || addresses.iter().any(|a| self.addresses.contains(a)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceGraph {
    pub id: String,
    pub txid: String,
    pub vout: u32,
    pub depth: u32,
    pub filters: TraceFilters,
    pub nodes: BTreeMap<String, TraceNode>,
    pub edges: Vec<TraceEdge>,
    pub transactions: BTreeMap<String, TraceTransaction>,
    pub addresses: BTreeMap<String, AddressFlow>,
    pub heads: Vec<TraceHead>,
    pub stats: TraceStats,
    pub running: bool,
    /// Output node ids already taken by a `trace_output` call
    #[serde(skip)]
    claimed: HashSet<String>,
}

impl TraceGraph {
    pub fn new(id: &str, txid: &str, vout: u32, depth: u32, filters: TraceFilters) -> Self {
        Self {
            id: id.to_string(),
            txid: txid.to_string(),
            vout,
            depth: clamp_depth(depth),
            filters,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            transactions: BTreeMap::new(),
            addresses: BTreeMap::new(),
            heads: Vec::new(),
            stats: TraceStats::default(),
            running: true,
            claimed: HashSet::new(),
        }
    }

    fn record_transaction(&mut self, details: &TransactionDetails, level: u32) {
        let tx = &details.tx;
        if self.transactions.contains_key(&tx.txid) {
            return;
        }

        let time = tx.time.or(tx.blocktime);
        self.nodes.insert(
            tx.txid.clone(),
            TraceNode::Transaction {
                id: tx.txid.clone(),
                txid: tx.txid.clone(),
                level,
                time,
                confirmations: details.confirmations,
            },
        );

        let inputs = tx
            .vin
            .iter()
            .enumerate()
            .map(|(index, input)| TraceInput {
                index,
                prev_txid: input.txid.clone(),
                prev_vout: input.vout,
                sequence: input.sequence,
            })
            .collect();

        let mut outputs = Vec::with_capacity(tx.vout.len());
        let mut output_value = 0.0;
        for (index, out) in tx.vout.iter().enumerate() {
            let addresses = out.addresses();
            for address in &addresses {
                let flow = self.addresses.entry(address.clone()).or_insert_with(|| AddressFlow {
                    address: address.clone(),
                    ..Default::default()
                });
                flow.total_received += out.value;
                flow.txids.push(tx.txid.clone());
            }
            output_value += out.value;
            outputs.push(TraceOutput {
                index,
                value: out.value,
                addresses,
            });
        }

        self.transactions.insert(
            tx.txid.clone(),
            TraceTransaction {
                txid: tx.txid.clone(),
                size: tx.size,
                time,
                confirmations: details.confirmations,
                level,
                inputs,
                outputs,
                output_value,
            },
        );

        self.stats.transaction_count = self.transactions.len();
        self.stats.address_count = self.addresses.len();
        self.stats.max_level = self.stats.max_level.max(level);
    }
}

pub fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(1, MAX_TRACE_DEPTH)
}

pub struct FundFlowTracer {
    service: Arc<ExplorerService>,
    graph: Arc<Mutex<TraceGraph>>,
}

impl FundFlowTracer {
    pub fn new(service: Arc<ExplorerService>, graph: Arc<Mutex<TraceGraph>>) -> Self {
        Self { service, graph }
    }

    /// Expand level by level until the graph's depth is reached or `cancel`
    /// fires. Cancellation is honoured between batches.
    pub async fn run(&self, cancel: CancellationToken) {
        let (id, txid, vout, depth) = {
            let mut graph = self.graph.lock().await;
            graph.running = true;
            (graph.id.clone(), graph.txid.clone(), graph.vout, graph.depth)
        };
        info!("Trace {} starting at {}:{} with depth {}", id, txid, vout, depth);

        if let Ok(details) = self.service.get_transaction_details(&txid).await {
            if let Some(out) = details.tx.vout.get(vout as usize) {
                self.graph.lock().await.stats.total_value = out.value;
            }
        }

        if cancel.is_cancelled() {
            self.finish(&id, true).await;
            return;
        }
        self.trace_output(&txid, vout, 0).await;

        for level in 1..depth {
            let heads: Vec<TraceHead> = {
                let mut graph = self.graph.lock().await;
                let heads: Vec<TraceHead> = graph
                    .heads
                    .iter()
                    .filter(|head| head.level == level && !head.terminal)
                    .cloned()
                    .collect();
                graph.stats.total_heads = heads.len();
                graph.stats.completed_heads = 0;
                heads
            };

            for batch in heads.chunks(TRACE_BATCH_SIZE) {
                if cancel.is_cancelled() {
                    self.finish(&id, true).await;
                    return;
                }

                join_all(batch.iter().map(|head| self.trace_output(&head.txid, head.vout, level))).await;
                self.graph.lock().await.stats.completed_heads += batch.len();

                tokio::task::yield_now().await;
            }

            // Expanded heads are now represented by their nodes
            self.graph
                .lock()
                .await
                .heads
                .retain(|head| head.level != level || head.terminal);
        }

        self.finish(&id, false).await;
    }

    async fn finish(&self, id: &str, cancelled: bool) {
        let mut graph = self.graph.lock().await;
        graph.running = false;
        if cancelled {
            info!("Trace {} cancelled", id);
        } else {
            info!(
                "Trace {} finished with {} transactions",
                id, graph.stats.transaction_count
            );
        }
    }

    async fn trace_output(&self, txid: &str, vout: u32, level: u32) {
        let node_id = format!("{}-{}", txid, vout);
        if !self.graph.lock().await.claimed.insert(node_id.clone()) {
            return;
        }

        let details = match self.service.get_transaction_details(txid).await {
            Ok(details) => details,
            Err(e) => {
                warn!("Error tracing output {}:{}: {}", txid, vout, e);
                return;
            }
        };
        let Some(output) = details.tx.vout.get(vout as usize).cloned() else {
            warn!("Transaction {} has no output {}", txid, vout);
            return;
        };

        let status = self.service.get_output_status(txid, vout).await;

        {
            let mut graph = self.graph.lock().await;
            graph.record_transaction(&details, level);
            graph.nodes.insert(
                node_id.clone(),
                TraceNode::Output {
                    id: node_id.clone(),
                    txid: txid.to_string(),
                    vout,
                    value: output.value,
                    level,
                    spent: status.is_spent(),
                    addresses: output.addresses(),
                    time: details.tx.time.or(details.tx.blocktime),
                    confirmations: details.confirmations,
                },
            );

            if !matches!(status, OutputStatus::Spent { .. }) {
                graph.heads.push(TraceHead {
                    txid: txid.to_string(),
                    vout,
                    level,
                    value: output.value,
                    terminal: true,
                });
                return;
            }
        }

        let OutputStatus::Spent { spending_tx } = status else {
            return;
        };

        let spending = match self.service.get_transaction_details(&spending_tx).await {
            Ok(spending) => spending,
            Err(e) => {
                warn!("Error fetching spender {} of {}:{}: {}", spending_tx, txid, vout, e);
                return;
            }
        };

        let mut graph = self.graph.lock().await;
        graph.record_transaction(&spending, level + 1);

        let Some(vin) = spending.tx.input_spending(txid, vout) else {
            debug!("{} does not spend {}:{}", spending_tx, txid, vout);
            return;
        };

        let input_id = format!("{}-input-{}", spending_tx, vin);
        graph.edges.push(TraceEdge {
            id: format!("{}-to-{}", node_id, input_id),
            from: node_id,
            to: input_id.clone(),
            value: output.value,
            level,
        });
        graph.nodes.entry(input_id.clone()).or_insert_with(|| TraceNode::Input {
            id: input_id,
            txid: spending_tx.clone(),
            vin,
            value: output.value,
            source_txid: txid.to_string(),
            source_vout: vout,
            level,
        });

        for (index, out) in spending.tx.vout.iter().enumerate() {
            if !graph.filters.follows(out.value, &out.addresses()) {
                continue;
            }

            let output_id = format!("{}-{}", spending_tx, index);
            graph.edges.push(TraceEdge {
                id: format!("{}-to-{}", spending_tx, output_id),
                from: spending_tx.clone(),
                to: output_id,
                value: out.value,
                level,
            });
            graph.heads.push(TraceHead {
                txid: spending_tx.clone(),
                vout: index as u32,
                level: level + 1,
                value: out.value,
                terminal: false,
            });
        }
    }
}

struct TraceHandle {
    graph: Arc<Mutex<TraceGraph>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live traces keyed by id
pub struct TraceRegistry {
    service: Arc<ExplorerService>,
    traces: Mutex<HashMap<String, TraceHandle>>,
    next_id: AtomicU64,
}

impl TraceRegistry {
    pub fn new(service: Arc<ExplorerService>) -> Self {
        Self {
            service,
            traces: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Begin tracing `txid:vout` in the background and return the trace id
    pub async fn start(&self, txid: &str, vout: u32, depth: u32) -> String {
        let id = format!("trace-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let graph = TraceGraph::new(&id, txid, vout, depth, TraceFilters::default());
        let handle = self.spawn(graph);

        self.traces.lock().await.insert(id.clone(), handle);
        id
    }

    fn spawn(&self, graph: TraceGraph) -> TraceHandle {
        let graph = Arc::new(Mutex::new(graph));
        let cancel = CancellationToken::new();
        let tracer = FundFlowTracer::new(self.service.clone(), graph.clone());
        let token = cancel.clone();
        let task = tokio::spawn(async move { tracer.run(token).await });

        TraceHandle { graph, cancel, task }
    }

    pub async fn snapshot(&self, id: &str) -> Option<TraceGraph> {
        let graph = self.traces.lock().await.get(id)?.graph.clone();
        let snapshot = graph.lock().await.clone();
        Some(snapshot)
    }

    pub async fn set_filters(&self, id: &str, filters: TraceFilters) -> bool {
        self.restart(id, |graph| graph.filters = filters).await
    }

    pub async fn set_depth(&self, id: &str, depth: u32) -> bool {
        self.restart(id, |graph| graph.depth = clamp_depth(depth)).await
    }

    /// Cancel the running expansion, discard everything it found and start
    /// over from the root. Filters carry over unless `adjust` changes them.
    async fn restart<F>(&self, id: &str, adjust: F) -> bool
    where
        F: FnOnce(&mut TraceGraph),
    {
        let mut traces = self.traces.lock().await;
        let Some(handle) = traces.get_mut(id) else {
            return false;
        };
        handle.cancel.cancel();

        let mut fresh = {
            let old = handle.graph.lock().await;
            TraceGraph::new(&old.id, &old.txid, old.vout, old.depth, old.filters.clone())
        };
        adjust(&mut fresh);

        info!("Restarting trace {}", id);
        *handle = self.spawn(fresh);
        true
    }

    pub async fn close(&self, id: &str) -> bool {
        match self.traces.lock().await.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                debug!("Closed trace {}", id);
                true
            }
            None => false,
        }
    }

    /// Wait for the current run of a trace to end
    pub async fn wait(&self, id: &str) -> bool {
        let graph = match self.traces.lock().await.get(id) {
            Some(handle) => handle.graph.clone(),
            None => return false,
        };

        loop {
            if !graph.lock().await.running {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    pub async fn count(&self) -> usize {
        self.traces.lock().await.len()
    }

    /// Cancel every trace, for shutdown
    pub async fn close_all(&self) {
        let mut traces = self.traces.lock().await;
        for (_, handle) in traces.drain() {
            handle.cancel.cancel();
            handle.task.abort();
        }
    }
}
