//! Partition worker: one task per flow-id partition.

use super::WorkerStats;
use crate::crud::{CrudEngine, PathComputer, PathReply, PathRequest, Progress};
use crate::error::FlowError;
use crate::messaging::{FlowRequest, SpeakerAck};
use crate::reply::Responder;
use crate::transaction::OperationId;
use flow_orch_common::KeyedQueue;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

/// Message delivered to a partition mailbox.
pub enum WorkerEvent {
    Request {
        request: FlowRequest,
        responder: Responder,
    },
    PathComputed(PathReply),
    Ack(SpeakerAck),
    Stats(oneshot::Sender<WorkerStats>),
    Shutdown,
}

/// Owns the engine and the keyed queue of one partition.
pub struct PartitionWorker {
    index: usize,
    engine: CrudEngine,
    queue: KeyedQueue<(FlowRequest, Responder)>,
    path_computer: Arc<dyn PathComputer>,
    path_timeout: Duration,
    sweep_interval: Duration,
    mailbox: mpsc::UnboundedReceiver<WorkerEvent>,
    // Weak so the mailbox closes once the daemon drops its senders.
    loopback: mpsc::WeakUnboundedSender<WorkerEvent>,
}

impl PartitionWorker {
    pub fn new(
        index: usize,
        engine: CrudEngine,
        path_computer: Arc<dyn PathComputer>,
        path_timeout: Duration,
        sweep_interval: Duration,
        mailbox: mpsc::UnboundedReceiver<WorkerEvent>,
        loopback: mpsc::WeakUnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            index,
            engine,
            queue: KeyedQueue::new(),
            path_computer,
            path_timeout,
            sweep_interval,
            mailbox,
            loopback,
        }
    }

    /// Processes events until shutdown or until every sender is gone.
    pub async fn run(mut self) {
        debug!("Partition {} started", self.index);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.mailbox.recv() => match event {
                    Some(WorkerEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        let abandoned = self.queue.pending_count() + self.engine.open_operations();
        if abandoned > 0 {
            warn!(
                "Partition {} stopping with {} unfinished request(s)",
                self.index, abandoned
            );
        }
        info!("Partition {} stopped", self.index);
    }

    fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Request { request, responder } => {
                if request.stream_type().is_read_only() {
                    self.engine.answer_query(request, responder);
                    return;
                }
                let flow_id = request.flow_id().to_string();
                if self.queue.is_busy(&flow_id) {
                    debug!(
                        "Flow {}: {} queued behind active operation",
                        flow_id,
                        request.stream_type()
                    );
                }
                self.queue.push(flow_id.clone(), (request, responder));
                self.pump(&flow_id);
            }
            WorkerEvent::PathComputed(reply) => {
                let flow_id = reply.flow_id.clone();
                let progress = self.engine.on_path_computed(reply);
                self.advance(&flow_id, progress);
            }
            WorkerEvent::Ack(ack) => {
                let flow_id = ack.flow_id.clone();
                let progress = self.engine.on_ack(ack);
                self.advance(&flow_id, progress);
            }
            WorkerEvent::Stats(reply) => {
                let stats = WorkerStats {
                    open_operations: self.engine.open_operations(),
                    pending_transactions: self.engine.pending_transactions(),
                    queued_requests: self.queue.pending_count(),
                };
                if reply.send(stats).is_err() {
                    debug!("Partition {}: stats requester went away", self.index);
                }
            }
            WorkerEvent::Shutdown => {}
        }
    }

    fn sweep(&mut self, now: Instant) {
        for flow_id in self.engine.expire(now) {
            self.advance(&flow_id, Progress::Done);
        }
    }

    fn advance(&mut self, flow_id: &str, progress: Progress) {
        if progress == Progress::Done {
            self.queue.release(flow_id);
            self.pump(flow_id);
        }
    }

    /// Starts queued requests for the flow until one stays in flight.
    fn pump(&mut self, flow_id: &str) {
        while let Some((request, responder)) = self.queue.next_ready(flow_id) {
            match self.engine.start(request, responder) {
                Progress::Done | Progress::Ignored => self.queue.release(flow_id),
                Progress::AwaitingPath {
                    operation_id,
                    request,
                } => {
                    self.request_path(operation_id, request);
                    return;
                }
                Progress::AwaitingAcks => return,
            }
        }
    }

    fn request_path(&self, operation_id: OperationId, request: PathRequest) {
        let computer = Arc::clone(&self.path_computer);
        let loopback = self.loopback.clone();
        let timeout = self.path_timeout;
        tokio::spawn(async move {
            let flow_id = request.flow_id.clone();
            let result = match tokio::time::timeout(timeout, computer.compute(request)).await {
                Ok(result) => result,
                Err(_) => Err(FlowError::path_computation(
                    &flow_id,
                    format!("no path within {:?}", timeout),
                )),
            };
            let Some(mailbox) = loopback.upgrade() else {
                debug!("Flow {}: partition gone, dropping path result", flow_id);
                return;
            };
            let reply = PathReply {
                flow_id,
                operation_id,
                result,
            };
            if let Err(err) = mailbox.send(WorkerEvent::PathComputed(reply)) {
                if let WorkerEvent::PathComputed(reply) = err.0 {
                    debug!("Flow {}: partition stopped, dropping path result", reply.flow_id);
                }
            }
        });
    }
}
