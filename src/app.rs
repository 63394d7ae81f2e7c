//! Application state and business logic
//!
//! This module holds the console state for one session: the section on
//! screen, its rows, the running jobs and the modal the user is looking at.
//! Key handlers in `main` call into it; `ui` renders it.

use crate::actions::{
    settle, ActionDescriptor, ActionKey, ActionRequest, BulkDispatch, DispatchResult, Dispatcher,
    Settled,
};
use crate::api::{ApiError, CloudClient};
use crate::cli::Config;
use crate::format::{error_notice, failure_message, success_message, ErrorNotice};
use crate::jobs::{JobEvent, JobId, JobTracker, TrackedJob};
use crate::panel::{PanelState, TargetRef};
use crate::resources::{fetch_page, PageRequest, ResourceKind};
use crate::validation::{load_choices, FieldSpec, Form, Rule};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const LOGIN_FORM: &[FieldSpec] = &[
    FieldSpec::text("username", "Username", &[Rule::Required]),
    FieldSpec::password("password", "Password", &[Rule::Required]),
    FieldSpec::text("domain", "Domain", &[]),
];

const OPERATION_HISTORY: usize = 10;

#[derive(Debug, Clone)]
pub enum StatusModalType {
    Info {
        message: String,
    },
    Error {
        title: String,
        details: String,
        suggestions: Vec<String>,
    },
    /// Any key leads to the login form.
    SessionExpired,
}

#[derive(Debug, Clone)]
pub enum PendingAction {
    Single(ActionRequest),
    Bulk(&'static ActionDescriptor),
}

#[derive(Debug, Clone)]
pub enum FormPurpose {
    Login,
    Action {
        target: TargetRef,
        descriptor: &'static ActionDescriptor,
    },
    Create(&'static ActionDescriptor),
}

#[derive(Debug)]
pub enum InputMode {
    Normal,
    ActionMenu,
    BulkMenu,
    Search(String),
    StatusModal(StatusModalType),
    Confirmation {
        message: String,
        pending: PendingAction,
    },
    Form {
        form: Form,
        purpose: FormPurpose,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Success,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct UserOperation {
    pub id: String,
    pub description: String,
    pub target: String,
    pub status: OperationStatus,
    pub started_at: Instant,
    pub completed_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

pub struct App {
    pub config: Config,
    client: Arc<CloudClient>,
    dispatcher: Dispatcher,
    tracker: JobTracker,
    job_events: mpsc::UnboundedReceiver<JobEvent>,
    pub section: ResourceKind,
    pub panels: PanelState,
    pub page_request: PageRequest,
    pub page_info: PageInfo,
    pub input_mode: InputMode,
    pub menu_selected: usize,
    pub message: Option<String>,
    pub account: Option<String>,
    pub user_operations: Vec<UserOperation>,
    job_operations: HashMap<JobId, String>,
    pub show_operation_sidebar: bool,
    pub last_refresh: Option<Instant>,
    pub should_quit: bool,
}

impl App {
    pub fn new(config: Config, client: Arc<CloudClient>) -> Self {
        let (tracker, job_events) = JobTracker::new(Arc::clone(&client), config.poll_interval);
        let section = ResourceKind::Instance;

        App {
            page_request: PageRequest::first(config.page_size),
            page_info: PageInfo {
                page: 1,
                has_prev: false,
                has_next: false,
            },
            config,
            dispatcher: Dispatcher::new(Arc::clone(&client)),
            client,
            tracker,
            job_events,
            section,
            panels: PanelState::new(section),
            input_mode: InputMode::Normal,
            menu_selected: 0,
            message: None,
            account: None,
            user_operations: Vec::new(),
            job_operations: HashMap::new(),
            show_operation_sidebar: false,
            last_refresh: None,
            should_quit: false,
        }
    }

    pub async fn initialize(&mut self) {
        info!("Initializing application against {}", self.client.endpoint());

        let credentials = self
            .config
            .username
            .clone()
            .zip(self.config.password.clone());
        match credentials {
            Some((username, password)) => {
                let domain = self.config.domain.clone();
                self.login(&username, &password, &domain).await;
            }
            None if self.client.has_session() => self.refresh().await,
            None => self.show_login(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.has_session()
    }

    pub fn show_login(&mut self) {
        let mut form = Form::new("Log in", LOGIN_FORM);
        if let Some(username) = self.config.username.clone() {
            form.set_text("username", &username);
            form.focus_next();
        }
        let domain = self.config.domain.clone();
        form.set_text("domain", &domain);
        self.input_mode = InputMode::Form {
            form,
            purpose: FormPurpose::Login,
        };
    }

    pub async fn login(&mut self, username: &str, password: &str, domain: &str) {
        let domain = if domain.trim().is_empty() { "/" } else { domain };
        match self.client.login(username, password, domain).await {
            Ok(info) => {
                info!("Logged in as {}", info.username);
                self.account = Some(if info.account.is_empty() {
                    info.username
                } else {
                    format!("{}@{}", info.username, info.account)
                });
                self.input_mode = InputMode::Normal;
                self.refresh().await;
            }
            Err(err) => {
                warn!("Login failed: {}", err);
                self.surface_error(err, |app, text| {
                    app.show_error(
                        "Login Failed".to_string(),
                        failure_message("Login", &text),
                        vec!["Press L to try again".to_string()],
                    )
                });
            }
        }
    }

    pub async fn logout(&mut self) {
        self.abandon_jobs();
        if let Err(err) = self.client.logout().await {
            debug!("Logout call failed: {}", err);
        }
        self.account = None;
        self.panels = PanelState::new(self.section);
        self.show_login();
    }

    /// Central handler for API errors. Session and connectivity failures are
    /// handled here; application errors go to the caller's continuation with
    /// the server's error text.
    pub fn surface_error<F>(&mut self, err: ApiError, continuation: F)
    where
        F: FnOnce(&mut App, String),
    {
        match err {
            ApiError::Unauthorized => {
                warn!("Session rejected by management server");
                self.abandon_jobs();
                self.client.set_session_key(None);
                self.account = None;
                self.show_status_modal(StatusModalType::SessionExpired);
            }
            ApiError::Network(_) => {
                let ErrorNotice {
                    title,
                    details,
                    suggestions,
                } = error_notice(&err);
                self.show_error(title, details, suggestions);
            }
            ApiError::Application { .. } | ApiError::Malformed => {
                continuation(self, err.error_text())
            }
        }
    }

    fn show_api_error(&mut self, err: ApiError) {
        let notice = error_notice(&err);
        self.surface_error(err, move |app, _| {
            app.show_error(notice.title, notice.details, notice.suggestions)
        });
    }

    pub async fn refresh(&mut self) {
        self.fetch(false).await;
    }

    async fn fetch(&mut self, keep_selection: bool) {
        self.last_refresh = Some(Instant::now());
        match fetch_page(&self.client, self.section, &self.page_request).await {
            Ok(page) => {
                debug!(
                    "Loaded {} {} (page {})",
                    page.entities.len(),
                    self.section.title(),
                    page.page
                );
                self.page_info = PageInfo {
                    page: page.page,
                    has_prev: page.has_prev,
                    has_next: page.has_next,
                };
                if keep_selection {
                    self.panels.refresh_rows(page.entities);
                } else {
                    self.panels.load_rows(page.entities);
                }
            }
            Err(err) => {
                warn!("Listing {} failed: {}", self.section.title(), err);
                self.show_api_error(err);
            }
        }
    }

    pub fn should_auto_refresh(&self) -> bool {
        match (self.config.refresh_interval, self.last_refresh) {
            (Some(interval), Some(last)) => last.elapsed() > interval,
            _ => false,
        }
    }

    pub async fn maybe_auto_refresh(&mut self) {
        if self.should_auto_refresh()
            && self.is_logged_in()
            && matches!(self.input_mode, InputMode::Normal)
        {
            self.fetch(true).await;
        }
    }

    /// Switches to another section. Every running job is abandoned.
    pub async fn navigate(&mut self, kind: ResourceKind) {
        if kind == self.section {
            return;
        }
        info!("Switching to {}", kind.title());
        self.abandon_jobs();
        self.section = kind;
        self.panels = PanelState::new(kind);
        self.page_request = PageRequest::first(self.config.page_size);
        self.input_mode = InputMode::Normal;
        self.refresh().await;
    }

    /// Stops polling every job and releases the rows waiting on them.
    fn abandon_jobs(&mut self) {
        let targets: Vec<TargetRef> = self
            .tracker
            .jobs()
            .into_iter()
            .map(|job| job.target.clone())
            .collect();
        self.tracker.cancel_all();
        for target in &targets {
            self.panels.abort_action(target);
        }
        let abandoned: Vec<String> = self.job_operations.drain().map(|(_, op)| op).collect();
        for op in abandoned {
            self.cancel_operation(&op);
        }
    }

    pub async fn next_section(&mut self) {
        let index = (self.section.index() + 1) % ResourceKind::ALL.len();
        self.navigate(ResourceKind::ALL[index]).await;
    }

    pub async fn previous_section(&mut self) {
        let len = ResourceKind::ALL.len();
        let index = (self.section.index() + len - 1) % len;
        self.navigate(ResourceKind::ALL[index]).await;
    }

    pub async fn next_page(&mut self) {
        if self.page_info.has_next {
            self.page_request.page += 1;
            self.refresh().await;
        }
    }

    pub async fn previous_page(&mut self) {
        if self.page_info.has_prev {
            self.page_request.page -= 1;
            self.refresh().await;
        }
    }

    pub fn start_search(&mut self) {
        let current = self.page_request.keyword.clone().unwrap_or_default();
        self.input_mode = InputMode::Search(current);
    }

    pub async fn apply_search(&mut self, keyword: String) {
        self.input_mode = InputMode::Normal;
        let keyword = keyword.trim().to_string();
        self.page_request.keyword = (!keyword.is_empty()).then_some(keyword);
        self.page_request.page = 1;
        self.refresh().await;
    }

    pub fn next(&mut self) {
        self.panels.next();
    }

    pub fn previous(&mut self) {
        self.panels.previous();
    }

    pub fn toggle_mark(&mut self) {
        self.panels.toggle_mark();
        self.panels.next();
    }

    /// Actions offered for the row under the cursor.
    pub fn current_actions(&self) -> Vec<&'static ActionDescriptor> {
        let Some(binding) = self.panels.current() else {
            return Vec::new();
        };
        if binding.is_busy() || binding.is_placeholder() {
            return Vec::new();
        }
        self.section
            .available_actions(&binding.entity)
            .into_iter()
            .filter_map(|key| self.section.descriptor(key))
            .collect()
    }

    pub fn bulk_actions(&self) -> Vec<&'static ActionDescriptor> {
        self.panels
            .bulk_actions()
            .iter()
            .filter_map(|key| self.section.descriptor(*key))
            .collect()
    }

    pub fn show_action_menu(&mut self) {
        if self.current_actions().is_empty() {
            self.message = Some("No actions available for this item".to_string());
            return;
        }
        self.menu_selected = 0;
        self.input_mode = InputMode::ActionMenu;
    }

    pub fn show_bulk_menu(&mut self) {
        if self.panels.marked_count() == 0 {
            self.message = Some("Mark rows with Space first".to_string());
            return;
        }
        if self.bulk_actions().is_empty() {
            self.message = Some("The marked items have no action in common".to_string());
            return;
        }
        self.menu_selected = 0;
        self.input_mode = InputMode::BulkMenu;
    }

    pub fn menu_next(&mut self, item_count: usize) {
        if item_count > 0 {
            self.menu_selected = (self.menu_selected + 1) % item_count;
        }
    }

    pub fn menu_previous(&mut self, item_count: usize) {
        if item_count > 0 {
            if self.menu_selected > 0 {
                self.menu_selected -= 1;
            } else {
                self.menu_selected = item_count - 1;
            }
        }
    }

    pub async fn run_menu_selection(&mut self) {
        let selected = match self.input_mode {
            InputMode::ActionMenu => self.current_actions().get(self.menu_selected).copied(),
            InputMode::BulkMenu => self.bulk_actions().get(self.menu_selected).copied(),
            _ => None,
        };
        let bulk = matches!(self.input_mode, InputMode::BulkMenu);
        self.input_mode = InputMode::Normal;
        match (selected, bulk) {
            (Some(descriptor), false) => self.trigger_action(descriptor.key).await,
            (Some(descriptor), true) => self.trigger_bulk(descriptor).await,
            (None, _) => {}
        }
    }

    /// Starts an action on the row under the cursor. Actions with
    /// parameters open their form first.
    pub async fn trigger_action(&mut self, key: ActionKey) {
        let Some(target) = self.panels.current_target() else {
            return;
        };
        let Some(descriptor) = self.section.descriptor(key) else {
            return;
        };

        if let Some(fields) = descriptor.form {
            let mut form = Form::new(descriptor.label, fields);
            if let Some(binding) = self.panels.current() {
                form.prefill(&binding.entity);
            }
            self.open_form(
                form,
                FormPurpose::Action { target, descriptor },
            )
            .await;
            return;
        }

        self.run_request(ActionRequest::new(target, descriptor), false)
            .await;
    }

    pub async fn trigger_create(&mut self) {
        let Some(descriptor) = self.section.descriptor(ActionKey::Create) else {
            self.message = Some(format!("{} cannot be created here", self.section.title()));
            return;
        };
        match descriptor.form {
            Some(fields) => {
                let form = Form::new(descriptor.label, fields);
                self.open_form(form, FormPurpose::Create(descriptor)).await;
            }
            None => self.run_create(descriptor, Vec::new()).await,
        }
    }

    pub async fn trigger_bulk(&mut self, descriptor: &'static ActionDescriptor) {
        self.run_bulk(descriptor, false).await;
    }

    async fn open_form(&mut self, mut form: Form, purpose: FormPurpose) {
        if let Err(err) = load_choices(&self.client, &mut form, 0).await {
            self.show_api_error(err);
            return;
        }
        self.input_mode = InputMode::Form { form, purpose };
    }

    pub fn form_input(&mut self, c: char) {
        if let InputMode::Form { form, .. } = &mut self.input_mode {
            form.push_char(c);
        }
    }

    pub fn form_backspace(&mut self) {
        if let InputMode::Form { form, .. } = &mut self.input_mode {
            form.pop_char();
        }
    }

    pub fn form_next_field(&mut self) {
        if let InputMode::Form { form, .. } = &mut self.input_mode {
            form.focus_next();
        }
    }

    pub fn form_previous_field(&mut self) {
        if let InputMode::Form { form, .. } = &mut self.input_mode {
            form.focus_previous();
        }
    }

    /// Changes the focused choice and reloads the lookups that depend on it.
    pub async fn form_cycle_choice(&mut self, forward: bool) {
        let mut result = Ok(());
        if let InputMode::Form { form, .. } = &mut self.input_mode {
            if let Some(changed) = form.cycle_choice(forward) {
                result = load_choices(&self.client, form, changed + 1).await;
            }
        }
        if let Err(err) = result {
            self.show_api_error(err);
        }
    }

    /// Validates the open form and runs what it was opened for. An invalid
    /// form stays open with its errors and nothing is sent.
    pub async fn submit_form(&mut self) {
        let (mut form, purpose) = match std::mem::replace(&mut self.input_mode, InputMode::Normal) {
            InputMode::Form { form, purpose } => (form, purpose),
            other => {
                self.input_mode = other;
                return;
            }
        };

        if !form.validate() {
            debug!("Form {} has invalid fields", form.title);
            self.input_mode = InputMode::Form { form, purpose };
            return;
        }

        match purpose {
            FormPurpose::Login => {
                let username = form.value("username");
                let password = form.value("password");
                let domain = form.value("domain");
                self.login(&username, &password, &domain).await;
            }
            FormPurpose::Action { target, descriptor } => {
                let request = ActionRequest::new(target, descriptor).with_params(form.params());
                self.run_request(request, false).await;
            }
            FormPurpose::Create(descriptor) => {
                self.run_create(descriptor, form.params()).await;
            }
        }
    }

    pub async fn confirm(&mut self) {
        let mode = std::mem::replace(&mut self.input_mode, InputMode::Normal);
        match mode {
            InputMode::Confirmation {
                pending: PendingAction::Single(request),
                ..
            } => self.run_request(request, true).await,
            InputMode::Confirmation {
                pending: PendingAction::Bulk(descriptor),
                ..
            } => self.run_bulk(descriptor, true).await,
            other => self.input_mode = other,
        }
    }

    pub fn cancel_dialog(&mut self) {
        self.input_mode = InputMode::Normal;
        self.message = Some("Cancelled".to_string());
    }

    fn target_name(&self, target: &TargetRef) -> String {
        self.panels
            .binding(target)
            .map(|b| self.section.project_row(&b.entity).name)
            .unwrap_or_else(|| target.entity_id.clone())
    }

    async fn run_request(&mut self, request: ActionRequest, confirmed: bool) {
        let pending = request.clone();
        let name = self.target_name(&request.target);
        let result = self
            .dispatcher
            .dispatch(&mut self.tracker, &mut self.panels, request, confirmed)
            .await;
        self.record_result(pending, name, result);
    }

    async fn run_create(&mut self, descriptor: &'static ActionDescriptor, params: Vec<(String, String)>) {
        let result = self
            .dispatcher
            .dispatch_create(&mut self.tracker, &mut self.panels, descriptor, params)
            .await;
        let target = self
            .panels
            .rows()
            .first()
            .filter(|b| b.is_placeholder())
            .map(|b| TargetRef::new(self.section, b.entity_id.clone()))
            .unwrap_or_else(|| TargetRef::new(self.section, ""));
        let name = descriptor.label.to_string();
        self.record_result(ActionRequest::new(target, descriptor), name, result);
    }

    async fn run_bulk(&mut self, descriptor: &'static ActionDescriptor, confirmed: bool) {
        let targets = self.panels.marked_targets();
        let names: HashMap<String, String> = targets
            .iter()
            .map(|t| (t.entity_id.clone(), self.target_name(t)))
            .collect();

        let outcome = self
            .dispatcher
            .dispatch_bulk(&mut self.tracker, &mut self.panels, descriptor, confirmed)
            .await;
        match outcome {
            BulkDispatch::NeedsConfirmation(message) => {
                self.input_mode = InputMode::Confirmation {
                    message,
                    pending: PendingAction::Bulk(descriptor),
                };
            }
            BulkDispatch::Dispatched(results) => {
                for (target, result) in results {
                    let name = names
                        .get(&target.entity_id)
                        .cloned()
                        .unwrap_or_else(|| target.entity_id.clone());
                    self.record_result(ActionRequest::new(target, descriptor), name, result);
                }
            }
        }
    }

    fn record_result(&mut self, request: ActionRequest, name: String, result: DispatchResult) {
        let descriptor = request.descriptor;
        match result {
            DispatchResult::NeedsConfirmation(message) => {
                self.input_mode = InputMode::Confirmation {
                    message: format!("{}\n\n{}", message, name),
                    pending: PendingAction::Single(request),
                };
            }
            DispatchResult::Rejected(reason) => {
                self.message = Some(format!("{}: {}", descriptor.label, reason));
            }
            DispatchResult::Tracking(job_id) => {
                let op = self.register_operation(descriptor.label.to_string(), name);
                self.job_operations.insert(job_id, op);
            }
            DispatchResult::Completed(_) => {
                let op = self.register_operation(descriptor.label.to_string(), name);
                self.complete_operation(&op, true, None);
                self.message = Some(success_message(descriptor.label, None));
            }
            DispatchResult::Failed(err) => {
                let op = self.register_operation(descriptor.label.to_string(), name);
                self.complete_operation(&op, false, Some(err.error_text()));
                let label = descriptor.label;
                self.surface_error(err, move |app, text| {
                    app.show_error(
                        format!("{} Failed", label),
                        failure_message(label, &text),
                        Vec::new(),
                    )
                });
            }
        }
    }

    /// Applies every job outcome that arrived since the last tick.
    pub fn poll_job_events(&mut self) {
        while let Ok(event) = self.job_events.try_recv() {
            let job_id = event.job_id.clone();
            let Some(settled) = settle(&mut self.tracker, &mut self.panels, event) else {
                continue;
            };
            let op = self.job_operations.remove(&job_id);

            match settled {
                Settled::Succeeded { label, .. } => {
                    if let Some(op) = op {
                        self.complete_operation(&op, true, None);
                    }
                    self.message = Some(success_message(&label, None));
                }
                Settled::Failed { message, .. } => {
                    if let Some(op) = op {
                        self.complete_operation(&op, false, Some(message.clone()));
                    }
                    self.message = Some(message);
                }
                Settled::Abandoned { label, error } => {
                    if let Some(op) = op {
                        self.complete_operation(&op, false, Some(error.error_text()));
                    }
                    warn!("Lost track of {} job {}", label, job_id);
                    self.surface_error(error, move |app, text| {
                        app.show_error(
                            format!("{} Status Unknown", label),
                            failure_message(&label, &text),
                            vec!["Refresh the list to see the current state".to_string()],
                        )
                    });
                }
            }
        }
    }

    pub fn running_jobs(&self) -> Vec<&TrackedJob> {
        self.tracker.jobs()
    }

    pub fn running_job_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn show_status_modal(&mut self, modal_type: StatusModalType) {
        self.input_mode = InputMode::StatusModal(modal_type);
    }

    pub fn show_info(&mut self, message: String) {
        self.show_status_modal(StatusModalType::Info { message });
    }

    pub fn show_error(&mut self, title: String, details: String, suggestions: Vec<String>) {
        self.show_status_modal(StatusModalType::Error {
            title,
            details,
            suggestions,
        });
    }

    pub fn close_modal(&mut self) {
        let expired = matches!(
            self.input_mode,
            InputMode::StatusModal(StatusModalType::SessionExpired)
        );
        self.input_mode = InputMode::Normal;
        if expired {
            self.show_login();
        }
    }

    pub fn clear_message(&mut self) {
        self.message = None;
    }

    pub fn show_help(&mut self) {
        self.show_info(
            "Keyboard Shortcuts:\n\
            \n\
            Navigation:\n\
              ↑/↓ or j/k   - Select row\n\
              Tab/S-Tab    - Next/previous section\n\
              [ / ]        - Previous/next page\n\
              /            - Search\n\
            \n\
            Actions:\n\
              Enter        - Actions for the selected row\n\
              Space        - Mark row for bulk action\n\
              b            - Bulk actions on marked rows\n\
              n            - Create\n\
              r            - Refresh list\n\
              Esc          - Dismiss notification\n\
            \n\
            System:\n\
              o            - Toggle operations sidebar\n\
              L            - Log in again\n\
              ?            - This help\n\
              q            - Quit"
                .to_string(),
        );
    }

    pub fn register_operation(&mut self, description: String, target: String) -> String {
        let operation_id = Uuid::new_v4().to_string();
        self.user_operations.push(UserOperation {
            id: operation_id.clone(),
            description,
            target,
            status: OperationStatus::Running,
            started_at: Instant::now(),
            completed_at: None,
        });

        if self.user_operations.len() > OPERATION_HISTORY {
            self.user_operations.remove(0);
        }

        operation_id
    }

    pub fn complete_operation(&mut self, operation_id: &str, success: bool, error: Option<String>) {
        if let Some(op) = self
            .user_operations
            .iter_mut()
            .find(|o| o.id == operation_id)
        {
            op.status = if success {
                OperationStatus::Success
            } else {
                OperationStatus::Failed(error.unwrap_or_default())
            };
            op.completed_at = Some(Instant::now());
        }
    }

    pub fn cancel_operation(&mut self, operation_id: &str) {
        if let Some(op) = self
            .user_operations
            .iter_mut()
            .find(|o| o.id == operation_id)
        {
            op.status = OperationStatus::Cancelled;
            op.completed_at = Some(Instant::now());
        }
    }

    pub fn operation_duration(op: &UserOperation) -> Duration {
        op.completed_at
            .map(|done| done.duration_since(op.started_at))
            .unwrap_or_else(|| op.started_at.elapsed())
    }
}
