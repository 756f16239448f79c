// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental re-evaluation scheduling.
//!
//! Ordering runs on a worker thread against a [`Topology`] captured from the
//! graph, so the worker never touches ports. The graph drains the resulting
//! queue one node per [`Graph::poll`](crate::graph::Graph::poll), which keeps the
//! owning thread the only writer of port values.

use crate::graph::Graph;
use crate::node::{NodeId, NodeRole};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;

/// Result of one [`Graph::poll`](crate::graph::Graph::poll)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// One node was evaluated
    Evaluated(NodeId),
    /// Ordering is still running on the worker
    Waiting,
    /// The pass drained; finalization ran
    Finished,
    /// Nothing scheduled
    Idle,
}

/// Connectivity of one node, as seen by the ordering worker
#[derive(Debug, Clone)]
pub struct TopologyNode {
    /// Producer feeding each input, in input order
    pub upstream: Vec<Option<NodeId>>,
    /// Constant, variable read, argument or entry
    pub initial: bool,
    /// Already claimed by a previous pass
    pub scheduled: bool,
}

/// Read-only copy of a graph's connectivity
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Nodes in graph order
    pub nodes: IndexMap<NodeId, TopologyNode>,
    /// Nodes whose outputs feed nothing
    pub end_nodes: Vec<NodeId>,
}

impl Topology {
    /// Capture the connectivity of a graph
    pub fn capture(graph: &Graph) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| {
                let entry = TopologyNode {
                    upstream: node
                        .inputs()
                        .iter()
                        .map(|i| i.upstream().map(|u| u.node))
                        .collect(),
                    initial: matches!(
                        node.role(),
                        NodeRole::Source | NodeRole::Argument | NodeRole::Entry
                    ),
                    scheduled: node.is_scheduled(),
                };
                (node.id, entry)
            })
            .collect();
        Self {
            nodes,
            end_nodes: graph.end_nodes(),
        }
    }

    fn upstream(&self, node: NodeId) -> &[Option<NodeId>] {
        self.nodes
            .get(&node)
            .map_or(&[], |n| n.upstream.as_slice())
    }

    fn is_initial(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.initial)
    }
}

/// Walk upstream from the producer of one input, collecting the chain of nodes
/// until `end` or an already visited node is reached.
pub fn backtrack(
    topo: &Topology,
    producer: Option<NodeId>,
    end: Option<NodeId>,
    visited: &mut HashSet<NodeId>,
) -> Vec<NodeId> {
    let mut items = Vec::new();
    let Some(start) = producer else {
        return items;
    };
    if !visited.insert(start) {
        return items;
    }

    let mut queue = VecDeque::from([start]);
    while let Some(previous) = queue.pop_front() {
        items.push(previous);
        if Some(previous) == end {
            break;
        }

        let upstream = topo.upstream(previous);
        if upstream.len() > 1 {
            let mut chains: Vec<Vec<NodeId>> = upstream
                .iter()
                .map(|u| backtrack(topo, *u, end, visited))
                .filter(|chain| !chain.is_empty())
                .collect();
            order_chains(topo, &mut chains);
            items.extend(chains.into_iter().flatten());
        } else if let Some(Some(next)) = upstream.first().copied() {
            if visited.contains(&next) {
                if Some(next) == end {
                    items.push(next);
                }
                continue;
            }
            visited.insert(next);
            queue.push_back(next);
        }
    }
    items
}

/// Order sibling chains: chains headed by an initial node go last, the rest are
/// sorted by length in the direction of the first pair.
fn order_chains(topo: &Topology, chains: &mut Vec<Vec<NodeId>>) {
    let (mut rest, initial): (Vec<_>, Vec<_>) = chains
        .drain(..)
        .partition(|chain| !chain.first().is_some_and(|n| topo.is_initial(*n)));

    if rest.len() >= 2 {
        if rest[0].len() >= rest[1].len() {
            rest.sort_by_key(Vec::len);
        } else {
            rest.sort_by_key(|chain| std::cmp::Reverse(chain.len()));
        }
    }
    chains.extend(rest);
    chains.extend(initial);
}

/// Collect every node feeding `starting`, in dependency order.
///
/// When `end` is given only chains passing through it are kept. Each node is
/// emitted once, and nodes already scheduled in `topo` are skipped.
pub fn gather_nodes(topo: &Topology, starting: &[NodeId], end: Option<NodeId>) -> Vec<NodeId> {
    let mut visited: HashSet<NodeId> = starting.iter().copied().collect();
    let mut scheduled: HashSet<NodeId> = topo
        .nodes
        .iter()
        .filter(|(_, n)| n.scheduled)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::new();

    for &node in starting {
        if scheduled.contains(&node) {
            continue;
        }
        let chains: Vec<Vec<NodeId>> = topo
            .upstream(node)
            .iter()
            .map(|u| backtrack(topo, *u, end, &mut visited))
            .filter(|chain| end.map_or(true, |e| chain.contains(&e)))
            .filter(|chain| !chain.is_empty())
            .collect();

        for chain in chains {
            for &next in chain.iter().rev() {
                if scheduled.insert(next) {
                    order.push(next);
                }
            }
        }
        if scheduled.insert(node) {
            order.push(node);
        }
    }
    order
}

/// Nodes to re-evaluate after `changed` was edited
pub fn plan(topo: &Topology, changed: NodeId) -> Vec<NodeId> {
    let mut starting = topo.end_nodes.clone();
    if starting.contains(&changed) {
        starting = vec![changed];
    }
    if starting.len() > 1 || (starting.len() == 1 && starting[0] != changed) {
        gather_nodes(topo, &starting, Some(changed))
    } else {
        vec![changed]
    }
}

struct PlanRequest {
    topology: Topology,
    changed: NodeId,
}

/// Channels to the ordering thread
#[derive(Debug)]
struct Worker {
    request_tx: mpsc::UnboundedSender<PlanRequest>,
    batch_rx: mpsc::UnboundedReceiver<Vec<NodeId>>,
}

impl Worker {
    fn spawn() -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            plan_worker(request_rx, batch_tx);
        });

        Self {
            request_tx,
            batch_rx,
        }
    }
}

/// Ordering worker and pending queue for one graph.
///
/// The worker thread is spawned on first dispatch, so graphs that are never
/// scheduled (function bodies, snapshots) cost nothing.
#[derive(Debug, Default)]
pub struct Scheduler {
    processing: bool,
    in_flight: usize,
    pending: VecDeque<NodeId>,
    worker: Option<Worker>,
}

impl Scheduler {
    /// Create an idle scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pass is running
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Number of orderings not yet received
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Hand a captured topology to the worker
    pub fn dispatch(&mut self, topology: Topology, changed: NodeId) {
        self.processing = true;
        let worker = self.worker.get_or_insert_with(Worker::spawn);
        let request = PlanRequest { topology, changed };
        if let Err(mpsc::error::SendError(request)) = worker.request_tx.send(request) {
            tracing::warn!("Scheduling worker stopped; ordering inline");
            self.worker = None;
            self.pending.extend(plan(&request.topology, request.changed));
            return;
        }
        self.in_flight += 1;
    }

    /// Collect finished orderings without blocking
    pub fn receive(&mut self) -> Vec<Vec<NodeId>> {
        let mut batches = Vec::new();
        let Some(worker) = self.worker.as_mut() else {
            return batches;
        };
        while let Ok(batch) = worker.batch_rx.try_recv() {
            batches.push(batch);
        }
        self.in_flight = self.in_flight.saturating_sub(batches.len());
        batches
    }

    /// Block until the next ordering arrives
    pub fn wait(&mut self) -> Option<Vec<NodeId>> {
        if self.in_flight == 0 {
            return None;
        }
        let batch = self.worker.as_mut()?.batch_rx.blocking_recv();
        if batch.is_none() {
            tracing::warn!("Scheduling worker stopped with {} ordering(s) in flight", self.in_flight);
            self.worker = None;
            self.in_flight = 0;
            return None;
        }
        self.in_flight -= 1;
        batch
    }

    /// Queue a node for evaluation
    pub fn enqueue(&mut self, node: NodeId) {
        self.pending.push_back(node);
    }

    /// Next node to evaluate
    pub fn next(&mut self) -> Option<NodeId> {
        self.pending.pop_front()
    }

    /// End the pass if it was running, returning whether it was
    pub fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.processing, false)
    }
}

fn plan_worker(
    mut request_rx: mpsc::UnboundedReceiver<PlanRequest>,
    batch_tx: mpsc::UnboundedSender<Vec<NodeId>>,
) {
    while let Some(request) = request_rx.blocking_recv() {
        let batch = plan(&request.topology, request.changed);
        tracing::trace!("Ordered {} node(s) after {}", batch.len(), request.changed);
        if batch_tx.send(batch).is_err() {
            break;
        }
    }
}
