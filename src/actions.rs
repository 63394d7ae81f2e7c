//! Action descriptors and dispatch
//!
//! An action is a named API command run against one row. The dispatcher marks
//! the row busy, issues the command and either reconciles the direct result or
//! hands the returned job id to the tracker. Job outcomes come back through
//! [`settle`].

use crate::api::{param, ApiError, CloudClient, Params};
use crate::format::{failure_message, success_message};
use crate::jobs::{JobEvent, JobId, JobOutcome, JobTracker};
use crate::panel::{EntityUpdate, PanelState, Reconciled, TargetRef};
use crate::validation::FieldSpec;
use log::{debug, info, warn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKey {
    Start,
    Stop,
    Reboot,
    Destroy,
    Recover,
    Expunge,
    ResetPassword,
    ChangeServiceOffering,
    Release,
    EnableStaticNat,
    DisableStaticNat,
    EnableVpn,
    DisableVpn,
    Enable,
    Disable,
    Edit,
    Delete,
    Scale,
    Upgrade,
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The response is the final result.
    Sync,
    /// The response carries a job id to poll; `None` uses the configured interval.
    Async { poll_interval: Option<Duration> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub update: EntityUpdate,
    /// Extra text for the success message, such as a generated password.
    pub note: Option<String>,
}

impl ActionOutcome {
    pub fn new(update: EntityUpdate) -> Self {
        Self { update, note: None }
    }
}

/// Turns the raw result (job result or sync envelope) into a row update.
pub type ResultHandler = fn(&ActionDescriptor, &Value) -> ActionOutcome;

/// Refuses an action for a snapshot before anything is sent.
pub type Precheck = fn(&Value) -> Result<(), String>;

pub struct ActionDescriptor {
    pub key: ActionKey,
    pub label: &'static str,
    pub command: &'static str,
    /// Parameter carrying the row's entity id; empty for creations.
    pub id_param: &'static str,
    /// Fixed parameters sent with every call, such as a target state.
    pub extra_params: &'static [(&'static str, &'static str)],
    pub completion: Completion,
    pub in_progress_text: &'static str,
    /// Key of the entity snapshot inside the result.
    pub result_key: &'static str,
    pub on_result: ResultHandler,
    pub confirmation: Option<&'static str>,
    pub precheck: Option<Precheck>,
    pub form: Option<&'static [FieldSpec]>,
    pub bulk: bool,
}

impl ActionDescriptor {
    pub fn is_async(&self) -> bool {
        matches!(self.completion, Completion::Async { .. })
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        match self.completion {
            Completion::Async { poll_interval } => poll_interval,
            Completion::Sync => None,
        }
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("command", &self.command)
            .field("completion", &self.completion)
            .finish()
    }
}

pub fn replace_entity(descriptor: &ActionDescriptor, result: &Value) -> ActionOutcome {
    match result.get(descriptor.result_key) {
        Some(entity) if entity.is_object() => {
            ActionOutcome::new(EntityUpdate::Replace(entity.clone()))
        }
        _ => ActionOutcome::new(EntityUpdate::Keep),
    }
}

pub fn remove_entity(_: &ActionDescriptor, _: &Value) -> ActionOutcome {
    ActionOutcome::new(EntityUpdate::Remove)
}

pub fn keep_entity(_: &ActionDescriptor, _: &Value) -> ActionOutcome {
    ActionOutcome::new(EntityUpdate::Keep)
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub target: TargetRef,
    pub descriptor: &'static ActionDescriptor,
    pub params: Params,
}

impl ActionRequest {
    pub fn new(target: TargetRef, descriptor: &'static ActionDescriptor) -> Self {
        Self {
            target,
            descriptor,
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug)]
pub enum DispatchResult {
    /// Nothing was sent; ask the user and dispatch again confirmed.
    NeedsConfirmation(String),
    /// Nothing was sent; the action does not apply to this row.
    Rejected(String),
    Tracking(JobId),
    Completed(Reconciled),
    Failed(ApiError),
}

#[derive(Debug)]
pub enum BulkDispatch {
    NeedsConfirmation(String),
    Dispatched(Vec<(TargetRef, DispatchResult)>),
}

/// Outcome of one settled job, for the caller's notifications.
#[derive(Debug)]
pub enum Settled {
    Succeeded {
        label: String,
        reconciled: Reconciled,
    },
    Failed {
        label: String,
        message: String,
        reconciled: Reconciled,
    },
    Abandoned {
        label: String,
        error: ApiError,
    },
}

pub struct Dispatcher {
    client: Arc<CloudClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<CloudClient>) -> Self {
        Self { client }
    }

    pub async fn dispatch(
        &self,
        tracker: &mut JobTracker,
        panels: &mut PanelState,
        request: ActionRequest,
        confirmed: bool,
    ) -> DispatchResult {
        let descriptor = request.descriptor;
        let target = request.target;

        if let Some(binding) = panels.binding(&target) {
            if binding.is_busy() {
                return DispatchResult::Rejected(
                    "Another action is still running for this item".to_string(),
                );
            }
            if let Some(check) = descriptor.precheck {
                if let Err(reason) = check(&binding.entity) {
                    return DispatchResult::Rejected(reason);
                }
            }
        }

        if let Some(prompt) = descriptor.confirmation {
            if !confirmed {
                return DispatchResult::NeedsConfirmation(prompt.to_string());
            }
        }

        panels.begin_action(&target, descriptor.in_progress_text);

        let mut params: Params = descriptor
            .extra_params
            .iter()
            .map(|(key, value)| param(key, value))
            .collect();
        params.extend(request.params);
        if !descriptor.id_param.is_empty() && !target.is_placeholder() {
            params.insert(0, param(descriptor.id_param, &target.entity_id));
        }

        debug!("Dispatching {} for {:?}", descriptor.command, target);
        let envelope = match self.client.execute(descriptor.command, &params).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("{} failed to start: {}", descriptor.label, err);
                panels.abort_action(&target);
                return DispatchResult::Failed(err);
            }
        };

        if !descriptor.is_async() {
            let reconciled = apply_success(panels, &target, descriptor, &envelope);
            return DispatchResult::Completed(reconciled);
        }

        let Some(job_id) = job_id_of(&envelope) else {
            warn!("{} returned no job id", descriptor.command);
            panels.abort_action(&target);
            return DispatchResult::Failed(ApiError::Malformed);
        };

        if let Err(err) = tracker.track(
            job_id.clone(),
            descriptor.label.to_string(),
            target.clone(),
            descriptor,
        ) {
            // The live poll settles only the row that registered the id first
            warn!("{}", err);
            panels.abort_action(&target);
            return DispatchResult::Rejected(err.to_string());
        }
        DispatchResult::Tracking(job_id)
    }

    /// Runs a creation against a placeholder row.
    pub async fn dispatch_create(
        &self,
        tracker: &mut JobTracker,
        panels: &mut PanelState,
        descriptor: &'static ActionDescriptor,
        params: Params,
    ) -> DispatchResult {
        let target = panels.insert_placeholder(descriptor.label);
        let request = ActionRequest::new(target, descriptor).with_params(params);
        self.dispatch(tracker, panels, request, true).await
    }

    /// Runs one action on every marked row in screen order, behind a single
    /// confirmation. The marks are cleared afterwards.
    pub async fn dispatch_bulk(
        &self,
        tracker: &mut JobTracker,
        panels: &mut PanelState,
        descriptor: &'static ActionDescriptor,
        confirmed: bool,
    ) -> BulkDispatch {
        if let Some(prompt) = descriptor.confirmation {
            if !confirmed {
                let count = panels.marked_count();
                return BulkDispatch::NeedsConfirmation(format!(
                    "{} ({} selected)",
                    prompt, count
                ));
            }
        }

        let targets = panels.marked_targets();
        panels.clear_marks();

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let request = ActionRequest::new(target.clone(), descriptor);
            let result = self.dispatch(tracker, panels, request, true).await;
            results.push((target, result));
        }
        info!(
            "Bulk {} dispatched to {} items",
            descriptor.label,
            results.len()
        );
        BulkDispatch::Dispatched(results)
    }
}

fn job_id_of(envelope: &Value) -> Option<JobId> {
    match envelope.get("jobid")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn apply_success(
    panels: &mut PanelState,
    target: &TargetRef,
    descriptor: &ActionDescriptor,
    result: &Value,
) -> Reconciled {
    let outcome = (descriptor.on_result)(descriptor, result);
    let message = success_message(descriptor.label, outcome.note.as_deref());
    panels.reconcile(target, true, message, outcome.update)
}

/// Applies a terminal job event. Events for jobs that are no longer tracked
/// (already settled, or abandoned by navigation) are dropped.
pub fn settle(
    tracker: &mut JobTracker,
    panels: &mut PanelState,
    event: JobEvent,
) -> Option<Settled> {
    let Some(job) = tracker.finish(&event.job_id) else {
        debug!("Dropping event for untracked job {}", event.job_id);
        return None;
    };

    Some(match event.outcome {
        JobOutcome::Succeeded(result) => {
            info!("Job {} ({}) succeeded", job.id, job.label);
            let reconciled = apply_success(panels, &job.target, job.action, &result);
            Settled::Succeeded {
                label: job.label,
                reconciled,
            }
        }
        JobOutcome::Failed(error_text) => {
            info!("Job {} ({}) failed: {}", job.id, job.label, error_text);
            let message = failure_message(&job.label, &error_text);
            let reconciled =
                panels.reconcile(&job.target, false, message.clone(), EntityUpdate::Keep);
            Settled::Failed {
                label: job.label,
                message,
                reconciled,
            }
        }
        JobOutcome::Abandoned(error) => {
            let message = failure_message(&job.label, &error.error_text());
            panels.reconcile(&job.target, false, message, EntityUpdate::Keep);
            Settled::Abandoned {
                label: job.label,
                error,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceKind;
    use crate::test_support::{job_reply, test_client, FakeTransport};
    use serde_json::json;

    fn vm(id: &str, state: &str) -> Value {
        json!({"id": id, "name": format!("vm-{}", id), "state": state, "passwordenabled": true})
    }

    fn descriptor(key: ActionKey) -> &'static ActionDescriptor {
        ResourceKind::Instance.descriptor(key).unwrap()
    }

    fn setup(
        rows: Vec<Value>,
    ) -> (
        Arc<FakeTransport>,
        Dispatcher,
        JobTracker,
        tokio::sync::mpsc::UnboundedReceiver<JobEvent>,
        PanelState,
    ) {
        let transport = FakeTransport::new();
        let client = test_client(transport.clone());
        let (tracker, events) = JobTracker::new(Arc::clone(&client), Duration::from_secs(3));
        let mut panels = PanelState::new(ResourceKind::Instance);
        panels.load_rows(rows);
        (transport, Dispatcher::new(client), tracker, events, panels)
    }

    fn target(id: &str) -> TargetRef {
        TargetRef::new(ResourceKind::Instance, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_instance_job_reconciles_row() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {"jobid": "job-1"}}),
        );
        transport.reply("queryAsyncJobResult:job-1", 200, job_reply(0, Value::Null));
        transport.reply(
            "queryAsyncJobResult:job-1",
            200,
            job_reply(1, json!({"virtualmachine": vm("42", "Running")})),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, false)
            .await;
        assert!(matches!(result, DispatchResult::Tracking(ref id) if id == "job-1"));
        assert!(panels.current().unwrap().is_busy());

        let event = events.recv().await.unwrap();
        let settled = settle(&mut tracker, &mut panels, event).unwrap();
        assert!(matches!(
            settled,
            Settled::Succeeded {
                reconciled: Reconciled::Displayed,
                ..
            }
        ));

        let binding = panels.current().unwrap();
        assert!(!binding.is_busy());
        assert_eq!(binding.entity["state"], "Running");
        assert_eq!(
            panels.banner().unwrap().message,
            "Start Instance succeeded"
        );

        let polls = transport.count("queryAsyncJobResult:job-1");
        assert_eq!(polls, 2);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.count("queryAsyncJobResult:job-1"), polls);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_keeps_snapshot_and_shows_error() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {"jobid": "job-1"}}),
        );
        transport.reply("queryAsyncJobResult:job-1", 200, job_reply(0, Value::Null));
        transport.reply(
            "queryAsyncJobResult:job-1",
            200,
            job_reply(2, json!({"errortext": "insufficient capacity"})),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        dispatcher
            .dispatch(&mut tracker, &mut panels, request, false)
            .await;
        let event = events.recv().await.unwrap();
        settle(&mut tracker, &mut panels, event);

        let binding = panels.current().unwrap();
        assert_eq!(binding.entity["state"], "Stopped");
        assert!(binding.has_error());
        assert!(binding
            .after_action
            .as_ref()
            .unwrap()
            .message
            .contains("insufficient capacity"));
        assert!(panels.banner().unwrap().is_error);
    }

    #[tokio::test]
    async fn test_unauthorized_initial_call_registers_nothing() {
        let (transport, dispatcher, mut tracker, _events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply("startVirtualMachine", 401, json!({}));

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, false)
            .await;

        assert!(matches!(result, DispatchResult::Failed(ApiError::Unauthorized)));
        assert!(!panels.current().unwrap().is_busy());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_required_sends_nothing() {
        let (transport, dispatcher, mut tracker, _events, mut panels) =
            setup(vec![vm("42", "Running")]);

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Stop));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, false)
            .await;

        assert!(matches!(result, DispatchResult::NeedsConfirmation(_)));
        assert!(transport.requests().is_empty());
        assert!(!panels.current().unwrap().is_busy());
    }

    #[tokio::test]
    async fn test_precheck_rejects_without_side_effects() {
        let (transport, dispatcher, mut tracker, _events, mut panels) = setup(vec![json!({
            "id": "42", "name": "vm-42", "state": "Stopped", "passwordenabled": false
        })]);

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::ResetPassword));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;

        assert!(matches!(result, DispatchResult::Rejected(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sync_action_reconciles_immediately() {
        let (transport, dispatcher, mut tracker, _events, mut panels) =
            setup(vec![vm("42", "Destroyed")]);
        transport.reply(
            "recoverVirtualMachine",
            200,
            json!({"recovervirtualmachineresponse": {"virtualmachine": vm("42", "Stopped")}}),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Recover));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;

        assert!(matches!(
            result,
            DispatchResult::Completed(Reconciled::Displayed)
        ));
        assert_eq!(panels.current().unwrap().entity["state"], "Stopped");
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_missing_job_id_restores_row() {
        let (transport, dispatcher, mut tracker, _events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {}}),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        let result = dispatcher
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;

        assert!(matches!(result, DispatchResult::Failed(ApiError::Malformed)));
        assert!(!panels.current().unwrap().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_stop_then_navigation_drops_outcomes() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("5", "Running"), vm("6", "Running")]);
        transport.reply(
            "stopVirtualMachine",
            200,
            json!({"stopvirtualmachineresponse": {"jobid": "job-5"}}),
        );
        transport.reply(
            "stopVirtualMachine",
            200,
            json!({"stopvirtualmachineresponse": {"jobid": "job-6"}}),
        );
        for job in ["job-5", "job-6"] {
            transport.reply(
                &format!("queryAsyncJobResult:{}", job),
                200,
                job_reply(0, Value::Null),
            );
        }

        panels.toggle_mark();
        panels.next();
        panels.toggle_mark();

        let stop = descriptor(ActionKey::Stop);
        let needs = dispatcher
            .dispatch_bulk(&mut tracker, &mut panels, stop, false)
            .await;
        assert!(matches!(needs, BulkDispatch::NeedsConfirmation(_)));

        let dispatched = dispatcher
            .dispatch_bulk(&mut tracker, &mut panels, stop, true)
            .await;
        let BulkDispatch::Dispatched(results) = dispatched else {
            panic!("expected dispatch");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(tracker.len(), 2);
        assert_eq!(panels.marked_count(), 0);

        // User leaves the section before either job finishes
        assert_eq!(tracker.cancel_all(), 2);
        let mut panels = PanelState::new(ResourceKind::IpAddress);

        for job in ["job-5", "job-6"] {
            transport.reply(
                &format!("queryAsyncJobResult:{}", job),
                200,
                job_reply(1, json!({"virtualmachine": vm("5", "Stopped")})),
            );
        }
        let polls = transport.count("queryAsyncJobResult:job-5");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.count("queryAsyncJobResult:job-5"), polls);
        assert!(events.try_recv().is_err());

        // A late event that slipped into the channel is still dropped
        let late = JobEvent {
            job_id: "job-6".to_string(),
            outcome: JobOutcome::Succeeded(json!({})),
        };
        assert!(settle(&mut tracker, &mut panels, late).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_while_polling_abandons_job() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {"jobid": "job-1"}}),
        );
        transport.fail(
            "queryAsyncJobResult:job-1",
            crate::api::TransportError::Connect("reset".to_string()),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        dispatcher
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;
        let event = events.recv().await.unwrap();
        let settled = settle(&mut tracker, &mut panels, event).unwrap();

        assert!(matches!(
            settled,
            Settled::Abandoned {
                error: ApiError::Network(_),
                ..
            }
        ));
        assert!(!panels.current().unwrap().is_busy());
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_is_exactly_once() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("42", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {"jobid": "job-1"}}),
        );
        transport.reply(
            "queryAsyncJobResult:job-1",
            200,
            job_reply(1, json!({"virtualmachine": vm("42", "Running")})),
        );

        let request = ActionRequest::new(target("42"), descriptor(ActionKey::Start));
        dispatcher
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;
        let event = events.recv().await.unwrap();
        let duplicate = event.clone();

        assert!(settle(&mut tracker, &mut panels, event).is_some());
        assert!(settle(&mut tracker, &mut panels, duplicate).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_job_id_releases_second_row() {
        let (transport, dispatcher, mut tracker, mut events, mut panels) =
            setup(vec![vm("1", "Stopped"), vm("2", "Stopped")]);
        transport.reply(
            "startVirtualMachine",
            200,
            json!({"startvirtualmachineresponse": {"jobid": "job-1"}}),
        );
        transport.reply(
            "queryAsyncJobResult:job-1",
            200,
            job_reply(1, json!({"virtualmachine": vm("1", "Running")})),
        );

        let first = dispatcher
            .dispatch(
                &mut tracker,
                &mut panels,
                ActionRequest::new(target("1"), descriptor(ActionKey::Start)),
                true,
            )
            .await;
        let second = dispatcher
            .dispatch(
                &mut tracker,
                &mut panels,
                ActionRequest::new(target("2"), descriptor(ActionKey::Start)),
                true,
            )
            .await;

        assert!(matches!(first, DispatchResult::Tracking(ref id) if id == "job-1"));
        assert!(matches!(second, DispatchResult::Rejected(_)));
        assert!(!panels.binding(&target("2")).unwrap().is_busy());
        assert_eq!(tracker.len(), 1);

        let event = events.recv().await.unwrap();
        settle(&mut tracker, &mut panels, event);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(tracker.is_empty());
        assert!(!panels.binding(&target("1")).unwrap().is_busy());
        assert!(!panels.binding(&target("2")).unwrap().is_busy());
        assert_eq!(panels.binding(&target("1")).unwrap().entity["state"], "Running");
    }
}
