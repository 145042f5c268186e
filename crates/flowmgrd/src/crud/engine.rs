//! Per-partition flow lifecycle state machine.
//!
//! One engine is owned by each partition worker and sees every mutating
//! request, path result and switch ack for the flow ids of its partition.
//! The worker guarantees at most one mutating operation per flow id is
//! started at a time; the engine tracks it from path computation through
//! ack correlation to the single reply.

use super::commands::{install_commands, remove_commands, remove_on};
use super::resources::{Allocation, ResourcePool};
use super::validation::{topology_changed, validate_flow};
use super::{FlowRepository, PathReply, PathRequest, SpeakerSink};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::cache_sync::{RuleTarget, SyncAction};
use crate::error::{FlowError, FlowResult};
use crate::messaging::{AckOutcome, FlowRequest, FlowResponse, SpeakerAck, SpeakerCommand, StreamType};
use crate::reply::Responder;
use crate::transaction::{
    Completion, CompletionOutcome, OperationId, Transaction, TransactionTracker,
};
use flow_types::{
    Cookie, Direction, Flow, FlowPair, FlowState, InstallFlow, PathInfo, RemoveFlow, SwitchCommand,
    SwitchId,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const AUDIT_SOURCE: &str = "flowmgrd";

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for all switch acks of one operation.
    pub transaction_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

/// What the worker has to do next for a flow id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The request was answered; the flow id is free again.
    Done,
    /// Run the path computer and post the result back.
    AwaitingPath {
        operation_id: OperationId,
        request: PathRequest,
    },
    /// Commands are out; the flow id stays busy until acks arrive.
    AwaitingAcks,
    /// The event did not belong to any active operation.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ComputingPath,
    AwaitingAcks,
    /// New rules are in; stale rules are being removed.
    Removing,
}

/// State of the one mutating operation of a flow id.
#[derive(Debug)]
struct ActiveOperation {
    operation_id: OperationId,
    stream: StreamType,
    phase: Phase,
    responder: Responder,
    /// Stored pair before the operation started; `None` for CREATE.
    prior: Option<FlowPair>,
    /// CREATE or UPDATE payload.
    request: Option<Flow>,
    /// Pair the operation is installing.
    target: Option<FlowPair>,
    /// Ids allocated by this operation, released on failure.
    allocation: Option<Allocation>,
    /// Tracked commands by transaction id.
    commands: Vec<SpeakerCommand>,
    /// Stale rules to remove once every install is acked.
    removals: Vec<SwitchCommand>,
}

impl ActiveOperation {
    fn audit_category(&self) -> AuditCategory {
        match self.stream {
            StreamType::Create => AuditCategory::FlowCreate,
            StreamType::Delete => AuditCategory::FlowDelete,
            StreamType::Push | StreamType::Unpush | StreamType::Sync => AuditCategory::RuleSync,
            _ => AuditCategory::FlowModify,
        }
    }
}

/// Flow CRUD state machine for one partition.
pub struct CrudEngine {
    store: Arc<dyn FlowRepository>,
    resources: Arc<ResourcePool>,
    speaker: Arc<dyn SpeakerSink>,
    config: EngineConfig,
    tracker: TransactionTracker,
    active: HashMap<String, ActiveOperation>,
    next_operation: u64,
}

impl CrudEngine {
    pub fn new(
        store: Arc<dyn FlowRepository>,
        resources: Arc<ResourcePool>,
        speaker: Arc<dyn SpeakerSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            resources,
            speaker,
            config,
            tracker: TransactionTracker::new(),
            active: HashMap::new(),
            next_operation: 0,
        }
    }

    /// Returns true while a mutating operation is in flight for the id.
    pub fn is_active(&self, flow_id: &str) -> bool {
        self.active.contains_key(flow_id)
    }

    /// Number of mutating operations in flight.
    pub fn open_operations(&self) -> usize {
        self.active.len()
    }

    /// Number of switch acks still outstanding.
    pub fn pending_transactions(&self) -> usize {
        self.tracker.pending_count()
    }

    fn next_operation_id(&mut self) -> OperationId {
        self.next_operation += 1;
        OperationId(self.next_operation)
    }

    /// Starts a request. Read-only requests are answered at once.
    pub fn start(&mut self, request: FlowRequest, responder: Responder) -> Progress {
        let flow_id = request.flow_id().to_string();
        let stream = request.stream_type();
        if stream.is_read_only() {
            self.answer_query(request, responder);
            return Progress::Done;
        }
        if self.active.contains_key(&flow_id) {
            error!("Flow {}: {} started while another operation is active", flow_id, stream);
            responder.failure(&FlowError::internal(format!(
                "flow {} already has an operation in progress",
                flow_id
            )));
            return Progress::Done;
        }
        debug!("Flow {}: starting {}", flow_id, stream);

        let operation_id = self.next_operation_id();
        let started = match request {
            FlowRequest::Create(flow) => self.start_create(flow),
            FlowRequest::Update(flow) => self.start_update(flow),
            FlowRequest::Reroute { flow_id } => self.start_reroute(&flow_id),
            FlowRequest::Delete { flow_id } => self.stored(&flow_id).and_then(|prior| {
                let commands = pair_commands(&prior, remove_commands)?;
                Ok(Started::Dispatch {
                    prior: Some(prior),
                    target: None,
                    commands,
                })
            }),
            FlowRequest::Restore { flow_id } => self.stored(&flow_id).and_then(|prior| {
                let commands = pair_commands(&prior, install_commands)?;
                let mut target = prior.clone();
                target.set_state(FlowState::InProgress);
                self.store.put(target.clone());
                Ok(Started::Dispatch {
                    prior: Some(prior),
                    target: Some(target),
                    commands,
                })
            }),
            FlowRequest::Push { flow_id } => self.stored(&flow_id).and_then(|prior| {
                let commands = pair_commands(&prior, install_commands)?;
                Ok(Started::Dispatch {
                    prior: Some(prior),
                    target: None,
                    commands,
                })
            }),
            FlowRequest::Unpush { flow_id } => self.stored(&flow_id).and_then(|prior| {
                let commands = pair_commands(&prior, remove_commands)?;
                Ok(Started::Dispatch {
                    prior: Some(prior),
                    target: None,
                    commands,
                })
            }),
            FlowRequest::Sync { flow_id, action } => self.start_sync(&flow_id, action),
            FlowRequest::Read { .. } | FlowRequest::Path { .. } | FlowRequest::Status { .. } => {
                Err(FlowError::internal("read-only request reached the mutating path"))
            }
        };

        match started {
            Err(err) => {
                responder.failure(&err.for_flow(&flow_id));
                Progress::Done
            }
            Ok(Started::Answered(response)) => {
                responder.success(response);
                Progress::Done
            }
            Ok(Started::NeedsPath { prior, request, path_request }) => {
                let operation = ActiveOperation {
                    operation_id,
                    stream,
                    phase: Phase::ComputingPath,
                    responder,
                    prior,
                    request,
                    target: None,
                    allocation: None,
                    commands: Vec::new(),
                    removals: Vec::new(),
                };
                Self::audit_started(&operation, &flow_id);
                self.active.insert(flow_id, operation);
                Progress::AwaitingPath {
                    operation_id,
                    request: path_request,
                }
            }
            Ok(Started::Dispatch { prior, target, commands }) => {
                let operation = ActiveOperation {
                    operation_id,
                    stream,
                    phase: Phase::AwaitingAcks,
                    responder,
                    prior,
                    request: None,
                    target,
                    allocation: None,
                    commands: Vec::new(),
                    removals: Vec::new(),
                };
                Self::audit_started(&operation, &flow_id);
                self.dispatch(flow_id, operation, commands)
            }
        }
    }

    fn stored(&self, flow_id: &str) -> FlowResult<FlowPair> {
        self.store
            .get(flow_id)
            .ok_or_else(|| FlowError::not_found(flow_id))
    }

    fn start_create(&mut self, flow: Flow) -> FlowResult<Started> {
        validate_flow(&flow)?;
        if self.store.contains(&flow.flow_id) {
            return Err(FlowError::already_exists(&flow.flow_id));
        }
        let path_request = PathRequest::for_flow(&flow)?;
        Ok(Started::NeedsPath {
            prior: None,
            request: Some(flow),
            path_request,
        })
    }

    fn start_update(&mut self, flow: Flow) -> FlowResult<Started> {
        validate_flow(&flow)?;
        let prior = self.stored(&flow.flow_id)?;
        if !topology_changed(&prior.forward, &flow) {
            let mut updated = prior;
            let stamp = now();
            for half in [&mut updated.forward, &mut updated.reverse] {
                half.description = flow.description.clone();
                half.last_updated = Some(stamp.clone());
            }
            self.store.put(updated.clone());
            info!("Flow {}: updated in place", flow.flow_id);
            audit_log!(AuditRecord::for_flow(
                AuditCategory::FlowModify,
                AUDIT_SOURCE,
                "update_in_place",
                &flow.flow_id
            )
            .with_outcome(AuditOutcome::Success));
            return Ok(Started::Answered(FlowResponse::Flow(updated)));
        }
        let path_request = PathRequest::for_flow(&flow)?;
        Ok(Started::NeedsPath {
            prior: Some(prior),
            request: Some(flow),
            path_request,
        })
    }

    fn start_reroute(&mut self, flow_id: &str) -> FlowResult<Started> {
        let prior = self.stored(flow_id)?;
        let path_request = PathRequest::for_flow(&prior.forward)?;
        let mut rerouting = prior.clone();
        rerouting.set_state(FlowState::Rerouting);
        self.store.put(rerouting);
        Ok(Started::NeedsPath {
            prior: Some(prior),
            request: None,
            path_request,
        })
    }

    fn start_sync(&mut self, flow_id: &str, action: SyncAction) -> FlowResult<Started> {
        let prior = self.stored(flow_id)?;
        match action {
            SyncAction::MarkDown { missing } => {
                let mut down = prior;
                down.set_state(FlowState::Down);
                down.forward.last_updated = Some(now());
                down.reverse.last_updated = down.forward.last_updated.clone();
                self.store.put(down.clone());
                warn!(
                    "Flow {}: marked DOWN, {} rule(s) missing",
                    flow_id,
                    missing.len()
                );
                audit_log!(AuditRecord::for_flow(
                    AuditCategory::RuleSync,
                    AUDIT_SOURCE,
                    "invalidate",
                    flow_id
                )
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({ "missing_rules": missing.len() })));
                Ok(Started::Answered(FlowResponse::Flow(down)))
            }
            SyncAction::Resync { install, remove } => {
                let mut commands = Vec::new();
                for target in &install {
                    commands.extend(resync_install(&prior, target)?);
                }
                for target in &remove {
                    commands.push(remove_on(prior.get(target.direction), &target.switch_id));
                }
                if commands.is_empty() {
                    debug!("Flow {}: nothing to resync", flow_id);
                    return Ok(Started::Answered(FlowResponse::Flow(prior)));
                }
                Ok(Started::Dispatch {
                    prior: Some(prior),
                    target: None,
                    commands,
                })
            }
        }
    }

    /// Feeds back the result of a path computation.
    pub fn on_path_computed(&mut self, reply: PathReply) -> Progress {
        let matches = self.active.get(&reply.flow_id).is_some_and(|op| {
            op.operation_id == reply.operation_id && op.phase == Phase::ComputingPath
        });
        if !matches {
            debug!(
                "Flow {}: dropping path result for inactive {}",
                reply.flow_id, reply.operation_id
            );
            return Progress::Ignored;
        }
        let Some(mut operation) = self.active.remove(&reply.flow_id) else {
            return Progress::Ignored;
        };
        let flow_id = reply.flow_id;

        let path = match reply.result {
            Ok(path) => path,
            Err(err) => {
                self.fail_before_dispatch(&flow_id, operation, err);
                return Progress::Done;
            }
        };

        let stream = operation.stream;
        let planned = match stream {
            StreamType::Create => self.plan_create(&mut operation, path),
            StreamType::Update => self.plan_update(&mut operation, path),
            StreamType::Reroute => match self.plan_reroute(&mut operation, path) {
                Ok(None) => {
                    let Some(prior) = operation.prior.take() else {
                        return Progress::Done;
                    };
                    self.store.put(prior.clone());
                    info!("Flow {}: path unchanged, not rerouted", flow_id);
                    operation.responder.success(FlowResponse::Rerouted {
                        flow: prior,
                        rerouted: false,
                    });
                    return Progress::Done;
                }
                Ok(Some(commands)) => Ok(commands),
                Err(err) => Err(err),
            },
            other => Err(FlowError::internal(format!("{} does not compute paths", other))),
        };

        match planned {
            Ok(commands) => {
                operation.phase = Phase::AwaitingAcks;
                self.dispatch(flow_id, operation, commands)
            }
            Err(err) => {
                self.fail_before_dispatch(&flow_id, operation, err);
                Progress::Done
            }
        }
    }

    fn plan_create(
        &mut self,
        operation: &mut ActiveOperation,
        path: PathInfo,
    ) -> FlowResult<Vec<SwitchCommand>> {
        let request = operation
            .request
            .as_ref()
            .ok_or_else(|| FlowError::internal("create without payload"))?;
        check_path(request, &path)?;
        let allocation = self.resources.allocate(request.is_one_switch_flow())?;
        operation.allocation = Some(allocation);

        let mut pair = build_pair(request, path, &allocation);
        self.store.put(pair.clone());
        pair.set_state(FlowState::InProgress);
        self.store.put(pair.clone());

        let commands = pair_commands(&pair, install_commands)?;
        operation.target = Some(pair);
        Ok(commands)
    }

    fn plan_update(
        &mut self,
        operation: &mut ActiveOperation,
        path: PathInfo,
    ) -> FlowResult<Vec<SwitchCommand>> {
        let (Some(request), Some(prior)) = (operation.request.as_ref(), operation.prior.as_ref())
        else {
            return Err(FlowError::internal("update without payload"));
        };
        check_path(request, &path)?;
        let allocation = self.resources.allocate(request.is_one_switch_flow())?;
        operation.allocation = Some(allocation);

        let mut pair = build_pair(request, path, &allocation);
        pair.set_state(FlowState::InProgress);
        self.store.put(pair.clone());

        let commands = pair_commands(&pair, install_commands)?;
        // The new cookie differs, so every old rule is stale.
        operation.removals = pair_commands(prior, remove_commands)?;
        operation.target = Some(pair);
        Ok(commands)
    }

    /// `Ok(None)` when the new path equals the stored one.
    fn plan_reroute(
        &mut self,
        operation: &mut ActiveOperation,
        path: PathInfo,
    ) -> FlowResult<Option<Vec<SwitchCommand>>> {
        let prior = operation
            .prior
            .as_ref()
            .ok_or_else(|| FlowError::internal("reroute without stored flow"))?;
        check_path(&prior.forward, &path)?;
        if path.path == prior.forward.flow_path.path {
            return Ok(None);
        }

        let mut target = prior.clone();
        target.reverse.flow_path = path.reversed();
        target.forward.flow_path = path;
        target.set_state(FlowState::Rerouting);
        self.store.put(target.clone());

        let commands = pair_commands(&target, install_commands)?;
        let mut removals = Vec::new();
        for ((_, old), (_, new)) in prior.halves().into_iter().zip(target.halves()) {
            let current = new.rule_switches();
            for switch_id in old.rule_switches() {
                if !current.contains(&switch_id) {
                    removals.push(remove_on(old, &switch_id));
                }
            }
        }
        operation.removals = removals;
        operation.target = Some(target);
        Ok(Some(commands))
    }

    /// Opens the transactions of an operation and sends its commands.
    fn dispatch(
        &mut self,
        flow_id: String,
        mut operation: ActiveOperation,
        commands: Vec<SwitchCommand>,
    ) -> Progress {
        let mut transactions = Vec::with_capacity(commands.len());
        let mut outbound = Vec::with_capacity(commands.len());
        for command in commands {
            let transaction = Transaction::new(&flow_id, command.switch_id().clone(), command.kind());
            outbound.push(SpeakerCommand {
                transaction_id: transaction.transaction_id,
                flow_id: flow_id.clone(),
                command,
            });
            transactions.push(transaction);
        }

        let deadline = Instant::now() + self.config.transaction_timeout;
        if let Err(err) = self
            .tracker
            .open(&flow_id, operation.operation_id, transactions, deadline)
        {
            if operation.phase == Phase::Removing {
                warn!("Flow {}: stale rules not removed: {}", flow_id, err);
                self.commit(&flow_id, operation);
            } else {
                self.fail_before_dispatch(&flow_id, operation, FlowError::internal(err.to_string()));
            }
            return Progress::Done;
        }
        info!(
            "Flow {}: {} sent {} command(s)",
            flow_id,
            operation.stream,
            outbound.len()
        );

        operation.commands = outbound.clone();
        self.active.insert(flow_id.clone(), operation);

        for command in outbound {
            if let Err(err) = self.speaker.send(command.clone()) {
                let failed = self.tracker.fail(
                    command.switch_id(),
                    &flow_id,
                    command.transaction_id,
                    &err.to_string(),
                );
                if let Some(completion) = failed {
                    return if self.finish(completion) {
                        Progress::Done
                    } else {
                        Progress::AwaitingAcks
                    };
                }
            }
        }
        Progress::AwaitingAcks
    }

    /// Feeds back one switch ack.
    pub fn on_ack(&mut self, ack: SpeakerAck) -> Progress {
        let completion = match &ack.outcome {
            AckOutcome::Success => self.tracker.ack(&ack.switch_id, &ack.flow_id, ack.transaction_id),
            AckOutcome::Failure(cause) => {
                self.tracker
                    .fail(&ack.switch_id, &ack.flow_id, ack.transaction_id, cause)
            }
        };
        match completion {
            Some(completion) => {
                if self.finish(completion) {
                    Progress::Done
                } else {
                    Progress::AwaitingAcks
                }
            }
            None if self.tracker.is_open(&ack.flow_id) => Progress::AwaitingAcks,
            None => Progress::Ignored,
        }
    }

    /// Fails operations whose ack deadline passed. Returns the flow ids
    /// whose operation ended.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let completions = self.tracker.expire(now);
        let mut finished = Vec::with_capacity(completions.len());
        for completion in completions {
            let flow_id = completion.flow_id.clone();
            if self.finish(completion) {
                finished.push(flow_id);
            }
        }
        finished
    }

    /// Settles a completed transaction set. Returns false while the
    /// operation still waits for acks of a follow-up set.
    fn finish(&mut self, completion: Completion) -> bool {
        let flow_id = completion.flow_id.clone();
        let Some(mut operation) = self.active.remove(&flow_id) else {
            warn!("Flow {}: completion without active operation", flow_id);
            return true;
        };
        if operation.operation_id != completion.operation_id {
            warn!(
                "Flow {}: completion of {} does not match active {}",
                flow_id, completion.operation_id, operation.operation_id
            );
            self.active.insert(flow_id, operation);
            return false;
        }

        match (completion.outcome.clone(), operation.phase) {
            (CompletionOutcome::Committed, Phase::AwaitingAcks) if !operation.removals.is_empty() => {
                let removals = std::mem::take(&mut operation.removals);
                info!(
                    "Flow {}: new rules installed, removing {} stale rule(s)",
                    flow_id,
                    removals.len()
                );
                operation.phase = Phase::Removing;
                return self.dispatch(flow_id, operation, removals) == Progress::Done;
            }
            (CompletionOutcome::Committed, _) => self.commit(&flow_id, operation),
            (CompletionOutcome::Failed { switches, .. }, Phase::Removing)
            | (CompletionOutcome::TimedOut { switches }, Phase::Removing) => {
                self.commit_with_leftovers(&flow_id, operation, &switches);
            }
            (CompletionOutcome::Failed { switches, cause }, _) => {
                let err = FlowError::TransactionFailed {
                    flow_id: flow_id.clone(),
                    switches,
                    cause,
                };
                self.roll_back(&flow_id, operation, &completion, err);
            }
            (CompletionOutcome::TimedOut { switches }, _) => {
                let err = FlowError::TransactionTimeout {
                    flow_id: flow_id.clone(),
                    switches,
                };
                self.roll_back(&flow_id, operation, &completion, err);
            }
        }
        true
    }

    /// Commits an operation whose new rules are in place although some
    /// stale rules could not be removed. Cache sync reports the leftovers.
    fn commit_with_leftovers(
        &mut self,
        flow_id: &str,
        operation: ActiveOperation,
        switches: &[SwitchId],
    ) {
        let leftovers: Vec<&str> = switches.iter().map(SwitchId::as_str).collect();
        warn!("Flow {}: stale rules left on {}", flow_id, leftovers.join(", "));
        audit_log!(AuditRecord::for_flow(
            AuditCategory::ErrorCondition,
            AUDIT_SOURCE,
            "remove_stale_rules",
            flow_id
        )
        .with_error(format!("stale rules left on {}", leftovers.join(", ")))
        .with_details(serde_json::json!({ "switches": leftovers })));
        self.commit(flow_id, operation);
    }

    fn commit(&mut self, flow_id: &str, operation: ActiveOperation) {
        let category = operation.audit_category();
        let ActiveOperation {
            stream,
            responder,
            prior,
            target,
            ..
        } = operation;

        let response = match (stream, prior, target) {
            (StreamType::Delete, Some(prior), _) => {
                self.store.remove(flow_id);
                self.resources.release(&Allocation::of_pair(&prior));
                FlowResponse::Deleted(prior)
            }
            (StreamType::Create | StreamType::Update | StreamType::Restore | StreamType::Reroute, prior, Some(mut target)) => {
                target.set_state(FlowState::Up);
                let stamp = now();
                target.forward.last_updated = Some(stamp.clone());
                target.reverse.last_updated = Some(stamp);
                self.store.put(target.clone());
                if stream == StreamType::Update {
                    if let Some(prior) = prior {
                        self.resources.release(&Allocation::of_pair(&prior));
                    }
                }
                if stream == StreamType::Reroute {
                    FlowResponse::Rerouted {
                        flow: target,
                        rerouted: true,
                    }
                } else {
                    FlowResponse::Flow(target)
                }
            }
            (_, Some(prior), _) => FlowResponse::Flow(prior),
            (stream, None, _) => {
                responder.failure(&FlowError::internal(format!(
                    "{} committed without a flow record",
                    stream
                )));
                return;
            }
        };

        info!("Flow {}: {} committed", flow_id, stream);
        audit_log!(AuditRecord::for_flow(category, AUDIT_SOURCE, stream.to_string(), flow_id)
            .with_outcome(AuditOutcome::Success)
            .with_correlation_id(responder.correlation_id()));
        responder.success(response);
    }

    fn roll_back(
        &mut self,
        flow_id: &str,
        operation: ActiveOperation,
        completion: &Completion,
        err: FlowError,
    ) {
        let category = operation.audit_category();
        let ActiveOperation {
            stream,
            responder,
            prior,
            allocation,
            commands,
            ..
        } = operation;

        match stream {
            StreamType::Create | StreamType::Update => {
                self.clean_up_acked(flow_id, completion, &commands, prior.as_ref());
                match prior {
                    Some(prior) => self.store.put(prior),
                    None => {
                        self.store.remove(flow_id);
                    }
                }
                if let Some(allocation) = allocation {
                    self.resources.release(&allocation);
                }
            }
            StreamType::Reroute => {
                self.clean_up_acked(flow_id, completion, &commands, prior.as_ref());
                if let Some(prior) = prior {
                    self.store.put(prior);
                }
            }
            StreamType::Restore => {
                if let Some(prior) = prior {
                    self.store.put(prior);
                }
            }
            _ => {}
        }

        audit_log!(AuditRecord::for_flow(category, AUDIT_SOURCE, stream.to_string(), flow_id)
            .with_outcome(AuditOutcome::Failure)
            .with_error(err.to_string())
            .with_correlation_id(responder.correlation_id()));
        responder.failure(&err);
    }

    /// Undoes installs that switches already accepted. A rule that replaced
    /// one of the prior pair (same switch and cookie) gets the prior rule
    /// back; any other rule is removed. Cleanup commands are not tracked.
    fn clean_up_acked(
        &self,
        flow_id: &str,
        completion: &Completion,
        commands: &[SpeakerCommand],
        prior: Option<&FlowPair>,
    ) {
        let previous = match prior.map(|prior| pair_commands(prior, install_commands)) {
            Some(Ok(previous)) => previous,
            Some(Err(err)) => {
                warn!("Flow {}: prior rules cannot be rebuilt: {}", flow_id, err);
                Vec::new()
            }
            None => Vec::new(),
        };
        for transaction in completion.acked() {
            let Some(sent) = commands
                .iter()
                .find(|c| c.transaction_id == transaction.transaction_id)
            else {
                continue;
            };
            let SwitchCommand::Install(install) = &sent.command else {
                continue;
            };
            let replaced = previous.iter().find(|command| {
                matches!(command, SwitchCommand::Install(old)
                    if old.switch_id == install.switch_id && old.cookie == install.cookie)
            });
            let command = match replaced {
                Some(old) => {
                    debug!("Flow {}: restoring prior rule on {}", flow_id, install.switch_id);
                    old.clone()
                }
                None => {
                    debug!("Flow {}: cleaning up rule on {}", flow_id, install.switch_id);
                    SwitchCommand::Remove(removal_of(install))
                }
            };
            let cleanup = SpeakerCommand {
                transaction_id: uuid::Uuid::new_v4(),
                flow_id: flow_id.to_string(),
                command,
            };
            if let Err(err) = self.speaker.send(cleanup) {
                warn!("Flow {}: cleanup on {} not sent: {}", flow_id, install.switch_id, err);
            }
        }
    }

    fn fail_before_dispatch(&mut self, flow_id: &str, operation: ActiveOperation, err: FlowError) {
        if let Some(allocation) = operation.allocation {
            self.resources.release(&allocation);
        }
        match &operation.prior {
            Some(prior) => self.store.put(prior.clone()),
            None if operation.stream == StreamType::Create => {
                self.store.remove(flow_id);
            }
            None => {}
        }
        audit_log!(AuditRecord::for_flow(
            operation.audit_category(),
            AUDIT_SOURCE,
            operation.stream.to_string(),
            flow_id
        )
        .with_outcome(AuditOutcome::Failure)
        .with_error(err.to_string()));
        operation.responder.failure(&err.for_flow(flow_id));
    }

    fn audit_started(operation: &ActiveOperation, flow_id: &str) {
        audit_log!(AuditRecord::for_flow(
            operation.audit_category(),
            AUDIT_SOURCE,
            operation.stream.to_string(),
            flow_id
        )
        .with_outcome(AuditOutcome::InProgress)
        .with_correlation_id(operation.responder.correlation_id()));
    }

    /// Answers READ, PATH and STATUS from the current record.
    pub fn answer_query(&self, request: FlowRequest, responder: Responder) {
        let flow_id = request.flow_id().to_string();
        let Some(pair) = self.store.get(&flow_id) else {
            responder.failure(&FlowError::not_found(flow_id));
            return;
        };
        let response = match request {
            FlowRequest::Path { .. } => FlowResponse::Path {
                flow_id,
                forward: pair.forward.flow_path.clone(),
                reverse: pair.reverse.flow_path.clone(),
            },
            FlowRequest::Status { .. } => FlowResponse::Status {
                state: pair.state(),
                in_flight: self.active.get(&flow_id).map(|op| op.stream),
                flow_id,
            },
            _ => FlowResponse::Flow(pair),
        };
        responder.success(response);
    }
}

/// Result of the synchronous first step of a request.
enum Started {
    Answered(FlowResponse),
    NeedsPath {
        prior: Option<FlowPair>,
        request: Option<Flow>,
        path_request: PathRequest,
    },
    Dispatch {
        prior: Option<FlowPair>,
        target: Option<FlowPair>,
        commands: Vec<SwitchCommand>,
    },
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn pair_commands(
    pair: &FlowPair,
    build: fn(&Flow) -> FlowResult<Vec<SwitchCommand>>,
) -> FlowResult<Vec<SwitchCommand>> {
    let mut commands = build(&pair.forward)?;
    commands.extend(build(&pair.reverse)?);
    Ok(commands)
}

fn check_path(flow: &Flow, path: &PathInfo) -> FlowResult<()> {
    let (src, dst) = flow.endpoints()?;
    path.validate(src, dst)
        .map_err(|e| FlowError::path_computation(&flow.flow_id, e.to_string()))
}

fn build_pair(request: &Flow, path: PathInfo, allocation: &Allocation) -> FlowPair {
    let mut forward = request.clone();
    forward.cookie = Cookie::encode(allocation.cookie, Direction::Forward);
    forward.meter_id = allocation.forward_meter;
    forward.transit_vlan = allocation.forward_vlan;
    forward.flow_path = path;
    forward.last_updated = Some(now());
    forward.state = FlowState::Allocated;
    let reverse = forward.mirrored(
        Cookie::encode(allocation.cookie, Direction::Reverse),
        allocation.reverse_meter,
        allocation.reverse_vlan,
    );
    FlowPair::new(forward, reverse)
}

fn resync_install(pair: &FlowPair, target: &RuleTarget) -> FlowResult<Vec<SwitchCommand>> {
    let commands = install_commands(pair.get(target.direction))?;
    let matching: Vec<SwitchCommand> = commands
        .into_iter()
        .filter(|c| c.switch_id() == &target.switch_id)
        .collect();
    if matching.is_empty() {
        warn!(
            "Flow {}: no {} rule on {}",
            pair.flow_id(),
            target.direction,
            target.switch_id
        );
    }
    Ok(matching)
}

fn removal_of(install: &InstallFlow) -> RemoveFlow {
    RemoveFlow {
        flow_name: install.flow_name.clone(),
        switch_id: install.switch_id.clone(),
        cookie: install.cookie,
        meter_id: install.kind.meter_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::crud::{ChannelSpeaker, InMemoryFlowStore};
    use crate::error::ErrorKind;
    use crate::messaging::Reply;
    use crate::reply::ReplyComposer;
    use flow_types::{CommandKind, PathNode};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct Harness {
        engine: CrudEngine,
        store: Arc<InMemoryFlowStore>,
        resources: Arc<ResourcePool>,
        composer: ReplyComposer,
        replies: mpsc::UnboundedReceiver<Reply>,
        commands: mpsc::UnboundedReceiver<SpeakerCommand>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryFlowStore::new());
            let resources = Arc::new(ResourcePool::new(&ResourceConfig::default()));
            let (speaker, commands) = ChannelSpeaker::channel();
            let (reply_tx, replies) = mpsc::unbounded_channel();
            let engine = CrudEngine::new(
                store.clone(),
                resources.clone(),
                Arc::new(speaker),
                EngineConfig::default(),
            );
            Self {
                engine,
                store,
                resources,
                composer: ReplyComposer::new(reply_tx),
                replies,
                commands,
            }
        }

        fn responder(&self, stream: StreamType) -> Responder {
            self.composer.responder("c-1", stream, Some("f1".to_string()))
        }

        fn start(&mut self, request: FlowRequest) -> Progress {
            let responder = self.responder(request.stream_type());
            self.engine.start(request, responder)
        }

        fn path(&mut self, progress: Progress, path: FlowResult<PathInfo>) -> Progress {
            let Progress::AwaitingPath { operation_id, request } = progress else {
                panic!("expected path request, got {:?}", progress);
            };
            self.engine.on_path_computed(PathReply {
                flow_id: request.flow_id,
                operation_id,
                result: path,
            })
        }

        fn sent(&mut self) -> Vec<SpeakerCommand> {
            let mut sent = Vec::new();
            while let Ok(command) = self.commands.try_recv() {
                sent.push(command);
            }
            sent
        }

        fn ack_all(&mut self) -> Progress {
            let mut progress = Progress::Ignored;
            for command in self.sent() {
                progress = self.engine.on_ack(SpeakerAck::success(&command));
            }
            progress
        }

        fn reply(&mut self) -> Reply {
            self.replies.try_recv().unwrap()
        }
    }

    fn sw(id: &str) -> SwitchId {
        SwitchId::new(id).unwrap()
    }

    fn request() -> Flow {
        let mut flow = Flow::new("f1");
        flow.source_switch = Some(sw("sw1"));
        flow.destination_switch = Some(sw("sw2"));
        flow.source_port = 10;
        flow.destination_port = 20;
        flow.bandwidth = 1000;
        flow
    }

    fn one_hop() -> PathInfo {
        PathInfo::new(vec![PathNode::new(sw("sw1"), 1, 0), PathNode::new(sw("sw2"), 2, 1)])
    }

    fn via_sw3() -> PathInfo {
        PathInfo::new(vec![
            PathNode::new(sw("sw1"), 5, 0),
            PathNode::new(sw("sw3"), 6, 1),
            PathNode::new(sw("sw3"), 7, 2),
            PathNode::new(sw("sw2"), 8, 3),
        ])
    }

    fn create(h: &mut Harness) -> FlowPair {
        let progress = h.start(FlowRequest::Create(request()));
        assert_eq!(h.path(progress, Ok(one_hop())), Progress::AwaitingAcks);
        assert_eq!(h.ack_all(), Progress::Done);
        let reply = h.reply();
        assert!(!reply.is_error());
        h.store.get("f1").unwrap()
    }

    fn mark_down(h: &mut Harness) {
        let action = SyncAction::MarkDown {
            missing: Vec::new(),
        };
        h.engine.start(
            FlowRequest::Sync {
                flow_id: "f1".to_string(),
                action,
            },
            Responder::silent(StreamType::Sync, "f1"),
        );
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Down);
    }

    fn cookie_of(command: &SpeakerCommand) -> Cookie {
        match &command.command {
            SwitchCommand::Install(rule) => rule.cookie,
            SwitchCommand::Remove(rule) => rule.cookie,
        }
    }

    #[test]
    fn test_create_commits() {
        let mut h = Harness::new();
        let progress = h.start(FlowRequest::Create(request()));
        assert_eq!(h.path(progress, Ok(one_hop())), Progress::AwaitingAcks);
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::InProgress);
        assert_eq!(h.engine.pending_transactions(), 4);

        let sent = h.sent();
        assert_eq!(sent.len(), 4);
        let (first, rest) = sent.split_first().unwrap();
        for command in rest {
            assert_eq!(h.engine.on_ack(SpeakerAck::success(command)), Progress::AwaitingAcks);
        }
        assert_eq!(h.engine.on_ack(SpeakerAck::success(first)), Progress::Done);

        let pair = h.store.get("f1").unwrap();
        assert_eq!(pair.state(), FlowState::Up);
        assert_eq!(pair.forward.flagless_cookie(), pair.reverse.flagless_cookie());
        assert!(pair.forward.cookie.is_forward().unwrap());
        assert!(pair.reverse.cookie.is_reverse().unwrap());
        assert_eq!(pair.reverse.source_switch, Some(sw("sw2")));
        assert!(matches!(
            h.reply().response(),
            Some(FlowResponse::Flow(_))
        ));
        assert_eq!(h.engine.open_operations(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let mut h = Harness::new();
        create(&mut h);
        assert_eq!(h.start(FlowRequest::Create(request())), Progress::Done);
        assert_eq!(
            h.reply().error().unwrap().error_type,
            ErrorKind::FlowAlreadyExists
        );
    }

    #[test]
    fn test_create_path_failure() {
        let mut h = Harness::new();
        let progress = h.start(FlowRequest::Create(request()));
        let progress = h.path(progress, Err(FlowError::path_computation("f1", "no route")));
        assert_eq!(progress, Progress::Done);
        assert_eq!(
            h.reply().error().unwrap().error_type,
            ErrorKind::PathComputationFailure
        );
        assert!(h.store.get("f1").is_none());
        assert_eq!(h.resources.usage(), (0, 0, 0));
    }

    #[test]
    fn test_create_install_failure_rolls_back() {
        let mut h = Harness::new();
        let progress = h.start(FlowRequest::Create(request()));
        h.path(progress, Ok(one_hop()));
        let sent = h.sent();
        h.engine.on_ack(SpeakerAck::success(&sent[0]));
        let failing = sent
            .iter()
            .find(|c| c.switch_id() == &sw("sw2"))
            .unwrap();
        assert_eq!(
            h.engine.on_ack(SpeakerAck::failure(failing, "table full")),
            Progress::Done
        );

        let reply = h.reply();
        let error = reply.error().unwrap();
        assert_eq!(error.error_type, ErrorKind::TransactionFailure);
        assert_eq!(error.switch_ids, vec![sw("sw2")]);
        assert!(h.store.get("f1").is_none());
        assert_eq!(h.resources.usage(), (0, 0, 0));
        assert_eq!(h.engine.pending_transactions(), 0);

        // The acked ingress rule is cleaned up.
        let cleanup = h.sent();
        assert_eq!(cleanup.len(), 1);
        assert_eq!(cleanup[0].switch_id(), sent[0].switch_id());
        assert_eq!(cleanup[0].command.kind(), CommandKind::Remove);

        // Late acks are ignored.
        assert_eq!(h.engine.on_ack(SpeakerAck::success(&sent[3])), Progress::Ignored);
    }

    #[test]
    fn test_create_times_out() {
        let mut h = Harness::new();
        let progress = h.start(FlowRequest::Create(request()));
        h.path(progress, Ok(one_hop()));
        h.sent();
        assert!(h.engine.expire(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(h.engine.expire(later), vec!["f1".to_string()]);
        let reply = h.reply();
        let error = reply.error().unwrap();
        assert_eq!(error.error_type, ErrorKind::TransactionTimeout);
        assert_eq!(error.switch_ids, vec![sw("sw1"), sw("sw2")]);
        assert!(h.store.get("f1").is_none());
    }

    #[test]
    fn test_delete() {
        let mut h = Harness::new();
        create(&mut h);
        let progress = h.start(FlowRequest::Delete {
            flow_id: "f1".to_string(),
        });
        assert_eq!(progress, Progress::AwaitingAcks);
        assert_eq!(h.ack_all(), Progress::Done);
        assert!(matches!(h.reply().response(), Some(FlowResponse::Deleted(_))));
        assert!(h.store.get("f1").is_none());
        assert_eq!(h.resources.usage(), (0, 0, 0));
    }

    #[test]
    fn test_delete_unknown() {
        let mut h = Harness::new();
        let progress = h.start(FlowRequest::Delete {
            flow_id: "f1".to_string(),
        });
        assert_eq!(progress, Progress::Done);
        assert_eq!(h.reply().error().unwrap().error_type, ErrorKind::FlowNotFound);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_delete_failure_keeps_flow() {
        let mut h = Harness::new();
        create(&mut h);
        h.start(FlowRequest::Delete {
            flow_id: "f1".to_string(),
        });
        let sent = h.sent();
        h.engine.on_ack(SpeakerAck::failure(&sent[1], "busy"));
        assert!(h.reply().is_error());
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Up);
    }

    #[test]
    fn test_update_description_in_place() {
        let mut h = Harness::new();
        create(&mut h);
        let mut changed = request();
        changed.description = "new name".to_string();
        assert_eq!(h.start(FlowRequest::Update(changed)), Progress::Done);
        assert!(h.sent().is_empty());
        assert_eq!(h.engine.pending_transactions(), 0);
        assert_eq!(h.store.get("f1").unwrap().reverse.description, "new name");
        assert!(!h.reply().is_error());
    }

    #[test]
    fn test_update_removes_old_rules_after_installs() {
        let mut h = Harness::new();
        let old = create(&mut h);
        let mut changed = request();
        changed.bandwidth = 5000;
        let progress = h.start(FlowRequest::Update(changed));
        assert_eq!(h.path(progress, Ok(one_hop())), Progress::AwaitingAcks);

        let installs = h.sent();
        assert_eq!(installs.len(), 4);
        assert!(installs.iter().all(|c| c.command.kind() == CommandKind::Install));
        for command in &installs {
            assert_eq!(h.engine.on_ack(SpeakerAck::success(command)), Progress::AwaitingAcks);
        }
        assert!(h.replies.try_recv().is_err());

        // The old cookie goes only after the new rules are in.
        let removes = h.sent();
        assert_eq!(removes.len(), 4);
        for command in &removes {
            assert_eq!(command.command.kind(), CommandKind::Remove);
            let cookie = cookie_of(command);
            assert!(cookie == old.forward.cookie || cookie == old.reverse.cookie);
        }
        assert_eq!(h.ack_all(), Progress::Done);

        let pair = h.store.get("f1").unwrap();
        assert_eq!(pair.state(), FlowState::Up);
        assert_eq!(pair.forward.bandwidth, 5000);
        assert_ne!(pair.forward.cookie, old.forward.cookie);
        assert_eq!(h.resources.usage(), (1, 2, 2));
        assert!(!h.reply().is_error());
    }

    #[test]
    fn test_update_install_failure_keeps_old_rules() {
        let mut h = Harness::new();
        let old = create(&mut h);
        let mut changed = request();
        changed.bandwidth = 5000;
        let progress = h.start(FlowRequest::Update(changed));
        h.path(progress, Ok(one_hop()));
        assert_eq!(h.resources.usage(), (2, 4, 4));

        let installs = h.sent();
        for command in &installs[..3] {
            h.engine.on_ack(SpeakerAck::success(command));
        }
        assert_eq!(
            h.engine.on_ack(SpeakerAck::failure(&installs[3], "table full")),
            Progress::Done
        );
        assert_eq!(
            h.reply().error().unwrap().error_type,
            ErrorKind::TransactionFailure
        );
        assert_eq!(h.store.get("f1").unwrap(), old);
        assert_eq!(h.resources.usage(), (1, 2, 2));

        // Only the accepted new rules are taken back; old rules were never touched.
        let cleanup = h.sent();
        assert_eq!(cleanup.len(), 3);
        for (command, install) in cleanup.iter().zip(&installs) {
            assert_eq!(command.command.kind(), CommandKind::Remove);
            assert_eq!(command.switch_id(), install.switch_id());
            assert_eq!(cookie_of(command), cookie_of(install));
        }
    }

    #[test]
    fn test_update_stale_removal_failure_still_commits() {
        let mut h = Harness::new();
        create(&mut h);
        let mut changed = request();
        changed.bandwidth = 5000;
        let progress = h.start(FlowRequest::Update(changed));
        h.path(progress, Ok(one_hop()));
        assert_eq!(h.ack_all(), Progress::AwaitingAcks);

        let removes = h.sent();
        for command in &removes[1..] {
            h.engine.on_ack(SpeakerAck::success(command));
        }
        assert_eq!(
            h.engine.on_ack(SpeakerAck::failure(&removes[0], "switch busy")),
            Progress::Done
        );
        assert!(!h.reply().is_error());
        let pair = h.store.get("f1").unwrap();
        assert_eq!(pair.state(), FlowState::Up);
        assert_eq!(pair.forward.bandwidth, 5000);
        assert_eq!(h.resources.usage(), (1, 2, 2));
        assert_eq!(h.engine.open_operations(), 0);
    }

    #[test]
    fn test_reroute_keeps_cookie() {
        let mut h = Harness::new();
        let old = create(&mut h);
        let progress = h.start(FlowRequest::Reroute {
            flow_id: "f1".to_string(),
        });
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Rerouting);
        assert_eq!(h.path(progress, Ok(via_sw3())), Progress::AwaitingAcks);
        assert_eq!(h.ack_all(), Progress::Done);

        let pair = h.store.get("f1").unwrap();
        assert_eq!(pair.forward.cookie, old.forward.cookie);
        assert_eq!(pair.forward.meter_id, old.forward.meter_id);
        assert_eq!(pair.state(), FlowState::Up);
        assert!(pair.forward.contains_switch(&sw("sw3")));
        assert!(matches!(
            h.reply().response(),
            Some(FlowResponse::Rerouted { rerouted: true, .. })
        ));
    }

    #[test]
    fn test_reroute_same_path() {
        let mut h = Harness::new();
        create(&mut h);
        let progress = h.start(FlowRequest::Reroute {
            flow_id: "f1".to_string(),
        });
        assert_eq!(h.path(progress, Ok(one_hop())), Progress::Done);
        assert!(h.sent().is_empty());
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Up);
        assert!(matches!(
            h.reply().response(),
            Some(FlowResponse::Rerouted { rerouted: false, .. })
        ));
    }

    #[test]
    fn test_reroute_failure_restores_prior_rules() {
        let mut h = Harness::new();
        let old = create(&mut h);
        let progress = h.start(FlowRequest::Reroute {
            flow_id: "f1".to_string(),
        });
        h.path(progress, Ok(via_sw3()));
        let installs = h.sent();
        assert_eq!(installs.len(), 6);

        // Forward ingress on sw1 is accepted, forward transit on sw3 is not.
        h.engine.on_ack(SpeakerAck::success(&installs[0]));
        assert_eq!(
            h.engine.on_ack(SpeakerAck::failure(&installs[1], "no space")),
            Progress::Done
        );
        assert_eq!(
            h.reply().error().unwrap().error_type,
            ErrorKind::TransactionFailure
        );
        assert_eq!(h.store.get("f1").unwrap(), old);
        assert_eq!(h.resources.usage(), (1, 2, 2));

        // The rerouted ingress shares the cookie, so the prior rule is put back.
        let cleanup = h.sent();
        assert_eq!(cleanup.len(), 1);
        let SwitchCommand::Install(restored) = &cleanup[0].command else {
            panic!("expected install, got {:?}", cleanup[0]);
        };
        assert_eq!(restored.switch_id, sw("sw1"));
        assert_eq!((restored.input_port, restored.output_port), (10, 1));
        assert_eq!(restored.cookie, old.forward.cookie);
    }

    #[test]
    fn test_reroute_removes_stale_after_installs() {
        let mut h = Harness::new();
        create(&mut h);
        let reroute = || FlowRequest::Reroute {
            flow_id: "f1".to_string(),
        };
        let progress = h.start(reroute());
        h.path(progress, Ok(via_sw3()));
        assert_eq!(h.ack_all(), Progress::Done);
        h.reply();

        let progress = h.start(reroute());
        assert_eq!(h.path(progress, Ok(one_hop())), Progress::AwaitingAcks);
        let installs = h.sent();
        assert_eq!(installs.len(), 4);
        assert!(installs.iter().all(|c| c.command.kind() == CommandKind::Install));
        for command in &installs {
            assert_eq!(h.engine.on_ack(SpeakerAck::success(command)), Progress::AwaitingAcks);
        }

        let removes = h.sent();
        assert_eq!(removes.len(), 2);
        for command in &removes {
            assert_eq!(command.switch_id(), &sw("sw3"));
            assert_eq!(command.command.kind(), CommandKind::Remove);
        }
        for command in &removes {
            h.engine.on_ack(SpeakerAck::success(command));
        }
        let pair = h.store.get("f1").unwrap();
        assert!(!pair.forward.contains_switch(&sw("sw3")));
        assert_eq!(pair.state(), FlowState::Up);
        assert!(matches!(
            h.reply().response(),
            Some(FlowResponse::Rerouted { rerouted: true, .. })
        ));
    }

    #[test]
    fn test_restore_commits() {
        let mut h = Harness::new();
        create(&mut h);
        mark_down(&mut h);
        let progress = h.start(FlowRequest::Restore {
            flow_id: "f1".to_string(),
        });
        assert_eq!(progress, Progress::AwaitingAcks);
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::InProgress);

        let sent = h.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|c| c.command.kind() == CommandKind::Install));
        for command in &sent {
            h.engine.on_ack(SpeakerAck::success(command));
        }
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Up);
        match h.reply().response() {
            Some(FlowResponse::Flow(pair)) => assert_eq!(pair.state(), FlowState::Up),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_restore_failure_keeps_flow_down() {
        let mut h = Harness::new();
        create(&mut h);
        mark_down(&mut h);
        h.start(FlowRequest::Restore {
            flow_id: "f1".to_string(),
        });
        let sent = h.sent();
        assert_eq!(
            h.engine.on_ack(SpeakerAck::failure(&sent[2], "port down")),
            Progress::Done
        );
        assert_eq!(
            h.reply().error().unwrap().error_type,
            ErrorKind::TransactionFailure
        );
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Down);
    }

    #[test]
    fn test_push_keeps_record() {
        let mut h = Harness::new();
        create(&mut h);
        mark_down(&mut h);
        let before = h.store.get("f1").unwrap();
        assert_eq!(
            h.start(FlowRequest::Push {
                flow_id: "f1".to_string()
            }),
            Progress::AwaitingAcks
        );
        let sent = h.sent();
        assert_eq!(sent.len(), 4);
        for command in &sent {
            assert_eq!(command.command.kind(), CommandKind::Install);
            let cookie = cookie_of(command);
            assert!(cookie == before.forward.cookie || cookie == before.reverse.cookie);
            h.engine.on_ack(SpeakerAck::success(command));
        }
        assert!(matches!(h.reply().response(), Some(FlowResponse::Flow(_))));
        assert_eq!(h.store.get("f1").unwrap(), before);
    }

    #[test]
    fn test_unpush_keeps_record() {
        let mut h = Harness::new();
        let old = create(&mut h);
        assert_eq!(
            h.start(FlowRequest::Unpush {
                flow_id: "f1".to_string()
            }),
            Progress::AwaitingAcks
        );
        let sent = h.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|c| c.command.kind() == CommandKind::Remove));
        for command in &sent {
            h.engine.on_ack(SpeakerAck::success(command));
        }
        assert!(!h.reply().is_error());
        assert_eq!(h.store.get("f1").unwrap(), old);
        assert_eq!(h.resources.usage(), (1, 2, 2));
    }

    #[test]
    fn test_path_reply() {
        let mut h = Harness::new();
        create(&mut h);
        assert_eq!(
            h.start(FlowRequest::Path {
                flow_id: "f1".to_string()
            }),
            Progress::Done
        );
        match h.reply().response() {
            Some(FlowResponse::Path { flow_id, forward, reverse }) => {
                assert_eq!(flow_id, "f1");
                assert_eq!(forward, &one_hop());
                assert_eq!(reverse, &one_hop().reversed());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_malformed_stored_path_rejected() {
        let mut h = Harness::new();
        let mut pair = create(&mut h);
        pair.forward.flow_path = PathInfo::new(vec![PathNode::new(sw("sw1"), 3, 0)]);
        h.store.put(pair);

        let progress = h.start(FlowRequest::Delete {
            flow_id: "f1".to_string(),
        });
        assert_eq!(progress, Progress::Done);
        assert_eq!(h.reply().error().unwrap().error_type, ErrorKind::InvalidArgument);
        assert!(h.sent().is_empty());
        assert_eq!(h.engine.open_operations(), 0);

        h.start(FlowRequest::Read {
            flow_id: "f1".to_string(),
        });
        assert!(!h.reply().is_error());
    }

    #[test]
    fn test_status_reports_in_flight() {
        let mut h = Harness::new();
        create(&mut h);
        h.start(FlowRequest::Push {
            flow_id: "f1".to_string(),
        });
        assert_eq!(
            h.start(FlowRequest::Status {
                flow_id: "f1".to_string()
            }),
            Progress::Done
        );
        match h.reply().response() {
            Some(FlowResponse::Status { state, in_flight, .. }) => {
                assert_eq!(*state, FlowState::Up);
                assert_eq!(*in_flight, Some(StreamType::Push));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_sync_mark_down() {
        let mut h = Harness::new();
        create(&mut h);
        let action = SyncAction::MarkDown {
            missing: vec![RuleTarget {
                direction: Direction::Forward,
                switch_id: sw("sw2"),
            }],
        };
        let responder = Responder::silent(StreamType::Sync, "f1");
        let progress = h.engine.start(
            FlowRequest::Sync {
                flow_id: "f1".to_string(),
                action,
            },
            responder,
        );
        assert_eq!(progress, Progress::Done);
        assert_eq!(h.store.get("f1").unwrap().state(), FlowState::Down);
    }

    #[test]
    fn test_sync_resync_targets_one_switch() {
        let mut h = Harness::new();
        create(&mut h);
        let action = SyncAction::Resync {
            install: vec![RuleTarget {
                direction: Direction::Reverse,
                switch_id: sw("sw1"),
            }],
            remove: vec![RuleTarget {
                direction: Direction::Forward,
                switch_id: sw("sw9"),
            }],
        };
        let progress = h.engine.start(
            FlowRequest::Sync {
                flow_id: "f1".to_string(),
                action,
            },
            Responder::silent(StreamType::Sync, "f1"),
        );
        assert_eq!(progress, Progress::AwaitingAcks);
        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].switch_id(), &sw("sw1"));
        assert_eq!(sent[1].switch_id(), &sw("sw9"));
    }
}
