//! Row bindings and outcome reconciliation
//!
//! `PanelState` holds the rows of the section on screen, which row the detail
//! pane is showing, the notification banner and the rows marked for bulk
//! actions. Action outcomes arrive here, possibly long after the user has
//! moved on, and are applied only to surfaces that still show the same entity.

use crate::actions::ActionKey;
use crate::resources::{text, ResourceKind};
use log::debug;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

const PLACEHOLDER_PREFIX: &str = "pending-";

/// Identifies the row an action was fired from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub kind: ResourceKind,
    pub entity_id: String,
}

impl TargetRef {
    pub fn new(kind: ResourceKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.entity_id.starts_with(PLACEHOLDER_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInfo {
    pub message: String,
    pub succeeded: bool,
}

/// What an action result does to the bound snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdate {
    Replace(Value),
    /// Overwrites the listed fields of the current snapshot.
    Merge(Value),
    Remove,
    Keep,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub entity_id: String,
    pub entity: Value,
    pub after_action: Option<ActionInfo>,
    pub in_progress: Option<String>,
    // Outcome hidden while an action runs, restored if the call never leaves
    saved_info: Option<ActionInfo>,
}

impl Binding {
    pub fn new(entity: Value) -> Self {
        Self {
            entity_id: text(&entity, "id"),
            entity,
            after_action: None,
            in_progress: None,
            saved_info: None,
        }
    }

    fn placeholder(label: &str) -> Self {
        Self {
            entity_id: format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()),
            entity: json!({ "name": label, "state": "Creating" }),
            after_action: None,
            in_progress: None,
            saved_info: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn has_error(&self) -> bool {
        matches!(self.after_action, Some(ActionInfo { succeeded: false, .. }))
    }

    pub fn is_placeholder(&self) -> bool {
        self.entity_id.starts_with(PLACEHOLDER_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub message: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Applied and copied into the banner of the detail pane.
    Displayed,
    /// Applied to the row only; shown when the row is selected again.
    Deferred,
    Removed,
    /// The target is no longer on screen.
    Stale,
}

#[derive(Debug)]
pub struct PanelState {
    kind: ResourceKind,
    rows: Vec<Binding>,
    cursor: usize,
    marked: BTreeSet<String>,
    bulk_actions: Vec<ActionKey>,
    banner: Option<Banner>,
}

impl PanelState {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            cursor: 0,
            marked: BTreeSet::new(),
            bulk_actions: Vec::new(),
            banner: None,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn rows(&self) -> &[Binding] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    /// Replaces the rows with a fresh page and selects the first one.
    ///
    /// Rows whose entity is still listed keep their running action and last
    /// outcome; everything else about them comes from the new snapshot.
    pub fn load_rows(&mut self, entities: Vec<Value>) {
        self.replace_rows(entities);
        self.cursor = 0;
        self.banner = None;
        self.select(0);
    }

    /// Same page fetched again. The cursor stays on its entity while that
    /// entity is still listed.
    pub fn refresh_rows(&mut self, entities: Vec<Value>) {
        let current = self.current().map(|b| b.entity_id.clone());
        self.replace_rows(entities);
        match current.and_then(|id| self.rows.iter().position(|b| b.entity_id == id)) {
            Some(index) => self.cursor = index,
            None => {
                self.cursor = 0;
                self.banner = None;
                self.select(0);
            }
        }
    }

    fn replace_rows(&mut self, entities: Vec<Value>) {
        let mut previous: HashMap<String, Binding> = self
            .rows
            .drain(..)
            .map(|b| (b.entity_id.clone(), b))
            .collect();

        self.rows = entities
            .into_iter()
            .map(|entity| {
                let mut binding = Binding::new(entity);
                if let Some(old) = previous.remove(&binding.entity_id) {
                    binding.after_action = old.after_action;
                    binding.in_progress = old.in_progress;
                    binding.saved_info = old.saved_info;
                }
                binding
            })
            .collect();

        // Placeholders of creations still running stay on top
        let pending: Vec<Binding> = previous
            .into_values()
            .filter(|b| b.is_placeholder() && b.is_busy())
            .collect();
        for binding in pending {
            self.rows.insert(0, binding);
        }

        let present: BTreeSet<String> = self.rows.iter().map(|b| b.entity_id.clone()).collect();
        self.marked.retain(|id| present.contains(id));
        self.recompute_bulk_actions();
    }

    /// Moves the detail pane to a row and shows that row's deferred outcome.
    pub fn select(&mut self, index: usize) {
        if index >= self.rows.len() {
            return;
        }
        self.cursor = index;
        self.banner = self.rows[index].after_action.as_ref().map(|info| Banner {
            message: info.message.clone(),
            is_error: !info.succeeded,
        });
    }

    pub fn next(&mut self) {
        if !self.rows.is_empty() {
            self.select((self.cursor + 1) % self.rows.len());
        }
    }

    pub fn previous(&mut self) {
        if !self.rows.is_empty() {
            let index = if self.cursor > 0 {
                self.cursor - 1
            } else {
                self.rows.len() - 1
            };
            self.select(index);
        }
    }

    pub fn current(&self) -> Option<&Binding> {
        self.rows.get(self.cursor)
    }

    pub fn current_target(&self) -> Option<TargetRef> {
        self.current()
            .map(|b| TargetRef::new(self.kind, b.entity_id.clone()))
    }

    pub fn is_current(&self, target: &TargetRef) -> bool {
        target.kind == self.kind
            && self
                .current()
                .map(|b| b.entity_id == target.entity_id)
                .unwrap_or(false)
    }

    fn position(&self, target: &TargetRef) -> Option<usize> {
        if target.kind != self.kind {
            return None;
        }
        self.rows.iter().position(|b| b.entity_id == target.entity_id)
    }

    pub fn binding(&self, target: &TargetRef) -> Option<&Binding> {
        self.position(target).map(|i| &self.rows[i])
    }

    /// Adds a row for an entity that does not exist yet and returns its target.
    pub fn insert_placeholder(&mut self, label: &str) -> TargetRef {
        let binding = Binding::placeholder(label);
        let target = TargetRef::new(self.kind, binding.entity_id.clone());
        if !self.rows.is_empty() {
            self.cursor += 1;
        }
        self.rows.insert(0, binding);
        target
    }

    /// Shows the spinner on a row and hides its previous outcome.
    pub fn begin_action(&mut self, target: &TargetRef, text: &str) -> bool {
        let Some(index) = self.position(target) else {
            return false;
        };
        let binding = &mut self.rows[index];
        binding.saved_info = binding.after_action.take();
        binding.in_progress = Some(text.to_string());
        if self.is_current(target) {
            self.banner = None;
        }
        true
    }

    /// Puts a row back the way it was before an action that never started.
    pub fn abort_action(&mut self, target: &TargetRef) {
        let Some(index) = self.position(target) else {
            return;
        };
        if self.rows[index].is_placeholder() {
            self.remove_row(index);
            return;
        }
        let binding = &mut self.rows[index];
        binding.in_progress = None;
        binding.after_action = binding.saved_info.take();
        if self.is_current(target) {
            self.select(self.cursor);
        }
    }

    /// Applies the outcome of an action to the row that fired it.
    pub fn reconcile(
        &mut self,
        target: &TargetRef,
        succeeded: bool,
        message: String,
        update: EntityUpdate,
    ) -> Reconciled {
        let Some(index) = self.position(target) else {
            debug!("Outcome for {:?} arrived after its row went away", target);
            return Reconciled::Stale;
        };
        let was_current = self.is_current(target);

        if succeeded && update == EntityUpdate::Remove {
            self.remove_row(index);
            if was_current {
                self.banner = Some(Banner {
                    message,
                    is_error: false,
                });
            }
            self.recompute_bulk_actions();
            return Reconciled::Removed;
        }

        let binding = &mut self.rows[index];
        binding.in_progress = None;
        binding.saved_info = None;
        if succeeded {
            if let EntityUpdate::Replace(entity) = update {
                let new_id = text(&entity, "id");
                if !new_id.is_empty() {
                    if self.marked.remove(&binding.entity_id) {
                        self.marked.insert(new_id.clone());
                    }
                    binding.entity_id = new_id;
                }
                binding.entity = entity;
            } else if let EntityUpdate::Merge(Value::Object(fields)) = update {
                if let Some(snapshot) = binding.entity.as_object_mut() {
                    snapshot.extend(fields);
                }
            }
        } else if binding.is_placeholder() {
            binding.entity["state"] = json!("Error");
        }
        binding.after_action = Some(ActionInfo {
            message: message.clone(),
            succeeded,
        });

        if !self.marked.is_empty() {
            self.recompute_bulk_actions();
        }

        if was_current {
            self.banner = Some(Banner {
                message,
                is_error: !succeeded,
            });
            Reconciled::Displayed
        } else {
            Reconciled::Deferred
        }
    }

    fn remove_row(&mut self, index: usize) {
        let removed = self.rows.remove(index);
        self.marked.remove(&removed.entity_id);
        if index < self.cursor || (self.cursor >= self.rows.len() && self.cursor > 0) {
            self.cursor -= 1;
        }
    }

    pub fn toggle_mark(&mut self) {
        let Some(binding) = self.current() else {
            return;
        };
        let id = binding.entity_id.clone();
        if !self.marked.remove(&id) {
            self.marked.insert(id);
        }
        self.recompute_bulk_actions();
    }

    pub fn is_marked(&self, entity_id: &str) -> bool {
        self.marked.contains(entity_id)
    }

    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    /// Marked rows in screen order.
    pub fn marked_targets(&self) -> Vec<TargetRef> {
        self.rows
            .iter()
            .filter(|b| self.marked.contains(&b.entity_id))
            .map(|b| TargetRef::new(self.kind, b.entity_id.clone()))
            .collect()
    }

    pub fn clear_marks(&mut self) {
        self.marked.clear();
        self.bulk_actions.clear();
    }

    /// Bulk actions every marked row currently allows.
    pub fn bulk_actions(&self) -> &[ActionKey] {
        &self.bulk_actions
    }

    fn recompute_bulk_actions(&mut self) {
        let kind = self.kind;
        let mut marked_rows = self
            .rows
            .iter()
            .filter(|b| self.marked.contains(&b.entity_id) && !b.is_busy());
        let allowed = match marked_rows.next() {
            Some(first) => {
                let mut allowed = kind.bulk_actions_for(&first.entity);
                for row in marked_rows {
                    let next = kind.bulk_actions_for(&row.entity);
                    allowed.retain(|key| next.contains(key));
                }
                allowed
            }
            None => Vec::new(),
        };
        // A busy marked row grays out every bulk action
        let any_busy = self
            .rows
            .iter()
            .any(|b| self.marked.contains(&b.entity_id) && b.is_busy());
        self.bulk_actions = if any_busy { Vec::new() } else { allowed };
    }
}
