//! Daemon wiring: partitions, bulk handler and the inbound entry points.

mod worker;

pub use worker::{PartitionWorker, WorkerEvent};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::cache_sync;
use crate::config::FlowMgrConfig;
use crate::crud::{
    CrudEngine, EngineConfig, FlowRepository, PathComputer, ResourcePool, SpeakerSink,
};
use crate::error::{FlowError, FlowResult};
use crate::messaging::{
    FlowRequest, FlowResponse, RequestEnvelope, SpeakerAck, StreamType,
};
use crate::reply::{ReplyComposer, ReplySink, ReplyStatsSnapshot, Responder};
use crate::router::{BulkRequest, PartitionRouter, Routed, Splitter};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// External services the daemon talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn FlowRepository>,
    pub path_computer: Arc<dyn PathComputer>,
    pub speaker: Arc<dyn SpeakerSink>,
}

/// Load counters, summed over partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub open_operations: usize,
    pub pending_transactions: usize,
    pub queued_requests: usize,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.open_operations += other.open_operations;
        self.pending_transactions += other.pending_transactions;
        self.queued_requests += other.queued_requests;
    }
}

/// The running flow manager.
pub struct FlowDaemon {
    config: FlowMgrConfig,
    store: Arc<dyn FlowRepository>,
    router: PartitionRouter<WorkerEvent>,
    composer: ReplyComposer,
    workers: Vec<JoinHandle<()>>,
}

impl FlowDaemon {
    /// Spawns one worker per partition. Must run inside a tokio runtime.
    ///
    /// Ids of flows already in the store are reserved before any request
    /// is accepted.
    pub fn start(
        config: FlowMgrConfig,
        collaborators: Collaborators,
        replies: ReplySink,
    ) -> FlowResult<Self> {
        config.validate().map_err(|e| FlowError::InvalidArgument {
            flow_id: None,
            message: e.to_string(),
        })?;

        let resources = Arc::new(ResourcePool::new(&config.resources));
        let existing = collaborators.store.snapshot();
        for pair in &existing {
            resources.reserve_existing(pair);
        }

        let engine_config = EngineConfig {
            transaction_timeout: config.transaction_timeout(),
        };
        let mut mailboxes = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let (tx, rx) = mpsc::unbounded_channel();
            let engine = CrudEngine::new(
                Arc::clone(&collaborators.store),
                Arc::clone(&resources),
                Arc::clone(&collaborators.speaker),
                engine_config,
            );
            let worker = PartitionWorker::new(
                index,
                engine,
                Arc::clone(&collaborators.path_computer),
                config.transaction_timeout(),
                config.sweep_interval(),
                rx,
                tx.downgrade(),
            );
            workers.push(tokio::spawn(worker.run()));
            mailboxes.push(tx);
        }

        info!(
            "Flow daemon started: {} partition(s), {} stored flow(s)",
            config.workers,
            existing.len()
        );
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "FlowDaemon", "daemon_start")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "workers": config.workers,
                "stored_flows": existing.len(),
                "transaction_timeout_ms": config.transaction_timeout_ms,
            }));
        audit_log!(record);

        Ok(Self {
            config,
            store: collaborators.store,
            router: PartitionRouter::new(mailboxes),
            composer: ReplyComposer::new(replies),
            workers,
        })
    }

    /// Accepts one decoded envelope.
    pub fn submit(&self, envelope: RequestEnvelope) {
        let correlation_id = envelope.correlation_id.clone();
        match Splitter::classify(&envelope) {
            Ok(Routed::Keyed(request)) => {
                let responder = self.composer.responder(
                    correlation_id,
                    request.stream_type(),
                    Some(request.flow_id().to_string()),
                );
                self.route_request(request, responder);
            }
            Ok(Routed::Bulk(bulk)) => self.handle_bulk(&correlation_id, bulk),
            Err(err) => self.composer.reject_malformed(&correlation_id, &err),
        }
    }

    /// Accepts one raw JSON line: a request envelope or a speaker ack.
    pub fn submit_raw(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                self.composer.reject_malformed("unknown", &err.into());
                return;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("speaker_ack") {
            let payload = value.get("payload").cloned().unwrap_or_default();
            match serde_json::from_value::<SpeakerAck>(payload) {
                Ok(ack) => self.submit_ack(ack),
                Err(err) => warn!("Dropping malformed speaker ack: {}", err),
            }
            return;
        }

        let correlation_id = value
            .get("correlation_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        match serde_json::from_value::<RequestEnvelope>(value) {
            Ok(envelope) => self.submit(envelope),
            Err(err) => self.composer.reject_malformed(&correlation_id, &err.into()),
        }
    }

    /// Routes a switch ack to the partition owning its flow.
    pub fn submit_ack(&self, ack: SpeakerAck) {
        let flow_id = ack.flow_id.clone();
        if let Err(err) = self.router.route(&flow_id, WorkerEvent::Ack(ack)) {
            warn!("Flow {}: ack not delivered: {}", flow_id, err);
        }
    }

    fn route_request(&self, request: FlowRequest, responder: Responder) {
        let flow_id = request.flow_id().to_string();
        // On failure the responder is dropped with the message and answers
        // INTERNAL_ERROR itself.
        if let Err(err) = self
            .router
            .route(&flow_id, WorkerEvent::Request { request, responder })
        {
            error!("Flow {}: request not delivered: {}", flow_id, err);
        }
    }

    fn handle_bulk(&self, correlation_id: &str, bulk: BulkRequest) {
        let responder = self
            .composer
            .responder(correlation_id, bulk.stream_type(), None);
        match bulk {
            BulkRequest::ReadAll => {
                let flows = self.store.snapshot();
                debug!("Read all: {} flow(s)", flows.len());
                responder.success(FlowResponse::Flows(flows));
            }
            BulkRequest::CacheSync(request) => {
                let snapshot = self.store.snapshot();
                let plan = cache_sync::plan(&snapshot, &request, &self.config.features);
                for (flow_id, action) in plan.directives {
                    let silent = Responder::silent(StreamType::Sync, flow_id.clone());
                    self.route_request(FlowRequest::Sync { flow_id, action }, silent);
                }
                responder.success(FlowResponse::CacheSync(plan.results));
            }
            BulkRequest::SwitchActivated(event) => {
                let switch_id = event.switch_id;
                let mut flow_ids = Vec::new();
                if self.config.features.reflow_on_switch_activation {
                    let snapshot = self.store.snapshot();
                    for (flow_id, action) in cache_sync::reflow(&snapshot, &switch_id) {
                        let silent = Responder::silent(StreamType::Sync, flow_id.clone());
                        flow_ids.push(flow_id.clone());
                        self.route_request(FlowRequest::Sync { flow_id, action }, silent);
                    }
                } else {
                    info!("Switch {} activated, reflow disabled", switch_id);
                }
                let record = AuditRecord::for_switch(
                    AuditCategory::SwitchEvent,
                    "FlowDaemon",
                    "switch_activated",
                    &switch_id,
                )
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({ "reflowed_flows": flow_ids.len() }));
                audit_log!(record);
                responder.success(FlowResponse::Reflow {
                    switch_id,
                    flow_ids,
                });
            }
        }
    }

    /// Current load, summed over partitions.
    pub async fn stats(&self) -> WorkerStats {
        let mut pending = Vec::with_capacity(self.router.partitions());
        self.router.broadcast(|_| {
            let (tx, rx) = oneshot::channel();
            pending.push(rx);
            WorkerEvent::Stats(tx)
        });
        let mut total = WorkerStats::default();
        for rx in pending {
            if let Ok(stats) = rx.await {
                total += stats;
            }
        }
        total
    }

    pub fn reply_stats(&self) -> ReplyStatsSnapshot {
        self.composer.stats()
    }

    pub fn config(&self) -> &FlowMgrConfig {
        &self.config
    }

    /// Stops every partition and waits for it to exit.
    ///
    /// Requests still queued or in flight are answered with
    /// `INTERNAL_ERROR`. Returns the reply counters once every partition has
    /// exited, so those answers are included.
    pub async fn shutdown(self) -> ReplyStatsSnapshot {
        info!("Shutting down flow daemon");
        self.router.broadcast(|_| WorkerEvent::Shutdown);
        let Self {
            router,
            workers,
            composer,
            ..
        } = self;
        drop(router);
        for handle in workers {
            if let Err(err) = handle.await {
                error!("Partition task failed: {}", err);
            }
        }
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "FlowDaemon", "daemon_stop")
            .with_outcome(AuditOutcome::Success);
        audit_log!(record);
        composer.stats()
    }
}
