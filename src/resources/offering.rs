//! Network, compute and disk offerings
//!
//! Offerings are administrator catalogue entries. Compute and disk offerings
//! carry no lifecycle state, so every listed one is treated as `Active`.

use super::{text, tone_for, ResourceSpec, RowView, StateTable};
use crate::actions::{remove_entity, replace_entity, ActionDescriptor, ActionKey, Completion};
use crate::format::truncate;
use crate::validation::{FieldSpec, Rule};
use serde_json::Value;

const NETWORK_STATES: StateTable = &[
    (
        "Enabled",
        &[ActionKey::Disable, ActionKey::Edit, ActionKey::Delete],
    ),
    (
        "Disabled",
        &[ActionKey::Enable, ActionKey::Edit, ActionKey::Delete],
    ),
    ("Inactive", &[ActionKey::Enable, ActionKey::Delete]),
];

const CATALOGUE_STATES: StateTable = &[
    ("Active", &[ActionKey::Edit, ActionKey::Delete]),
    ("Inactive", &[]),
];

const NAME_RULES: &[Rule] = &[Rule::Required, Rule::MaxLength(255)];

const EDIT_FORM: &[FieldSpec] = &[
    FieldSpec::text("name", "Name", NAME_RULES),
    FieldSpec::text("displaytext", "Description", NAME_RULES),
];

const COMPUTE_CREATE_FORM: &[FieldSpec] = &[
    FieldSpec::text("name", "Name", NAME_RULES),
    FieldSpec::text("displaytext", "Description", NAME_RULES),
    FieldSpec::text(
        "cpunumber",
        "CPU cores",
        &[
            Rule::Required,
            Rule::Integer {
                min: Some(1),
                max: Some(512),
            },
        ],
    ),
    FieldSpec::text(
        "cpuspeed",
        "CPU speed (MHz)",
        &[
            Rule::Required,
            Rule::Integer {
                min: Some(1),
                max: None,
            },
        ],
    ),
    FieldSpec::text(
        "memory",
        "Memory (MB)",
        &[
            Rule::Required,
            Rule::Integer {
                min: Some(32),
                max: None,
            },
        ],
    ),
];

const DISK_CREATE_FORM: &[FieldSpec] = &[
    FieldSpec::text("name", "Name", NAME_RULES),
    FieldSpec::text("displaytext", "Description", NAME_RULES),
    FieldSpec::text(
        "disksize",
        "Size (GB)",
        &[
            Rule::Required,
            Rule::Integer {
                min: Some(1),
                max: None,
            },
        ],
    ),
];

const fn sync_action(
    key: ActionKey,
    label: &'static str,
    command: &'static str,
    in_progress_text: &'static str,
    result_key: &'static str,
) -> ActionDescriptor {
    ActionDescriptor {
        key,
        label,
        command,
        id_param: "id",
        extra_params: &[],
        completion: Completion::Sync,
        in_progress_text,
        result_key,
        on_result: replace_entity,
        confirmation: None,
        precheck: None,
        form: None,
        bulk: false,
    }
}

const NETWORK_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        extra_params: &[("state", "Enabled")],
        bulk: true,
        ..sync_action(
            ActionKey::Enable,
            "Enable Network Offering",
            "updateNetworkOffering",
            "Enabling",
            "networkoffering",
        )
    },
    ActionDescriptor {
        extra_params: &[("state", "Disabled")],
        confirmation: Some("Please confirm that you want to disable this network offering."),
        bulk: true,
        ..sync_action(
            ActionKey::Disable,
            "Disable Network Offering",
            "updateNetworkOffering",
            "Disabling",
            "networkoffering",
        )
    },
    ActionDescriptor {
        form: Some(EDIT_FORM),
        ..sync_action(
            ActionKey::Edit,
            "Edit Network Offering",
            "updateNetworkOffering",
            "Saving",
            "networkoffering",
        )
    },
    ActionDescriptor {
        on_result: remove_entity,
        confirmation: Some("Please confirm that you want to delete this network offering."),
        ..sync_action(
            ActionKey::Delete,
            "Delete Network Offering",
            "deleteNetworkOffering",
            "Deleting",
            "networkoffering",
        )
    },
];

const COMPUTE_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        form: Some(EDIT_FORM),
        ..sync_action(
            ActionKey::Edit,
            "Edit Compute Offering",
            "updateServiceOffering",
            "Saving",
            "serviceoffering",
        )
    },
    ActionDescriptor {
        on_result: remove_entity,
        confirmation: Some("Please confirm that you want to delete this compute offering."),
        bulk: true,
        ..sync_action(
            ActionKey::Delete,
            "Delete Compute Offering",
            "deleteServiceOffering",
            "Deleting",
            "serviceoffering",
        )
    },
];

const DISK_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        form: Some(EDIT_FORM),
        ..sync_action(
            ActionKey::Edit,
            "Edit Disk Offering",
            "updateDiskOffering",
            "Saving",
            "diskoffering",
        )
    },
    ActionDescriptor {
        on_result: remove_entity,
        confirmation: Some("Please confirm that you want to delete this disk offering."),
        bulk: true,
        ..sync_action(
            ActionKey::Delete,
            "Delete Disk Offering",
            "deleteDiskOffering",
            "Deleting",
            "diskoffering",
        )
    },
];

static CREATE_COMPUTE: ActionDescriptor = ActionDescriptor {
    id_param: "",
    form: Some(COMPUTE_CREATE_FORM),
    ..sync_action(
        ActionKey::Create,
        "Create Compute Offering",
        "createServiceOffering",
        "Creating",
        "serviceoffering",
    )
};

static CREATE_DISK: ActionDescriptor = ActionDescriptor {
    id_param: "",
    form: Some(DISK_CREATE_FORM),
    ..sync_action(
        ActionKey::Create,
        "Create Disk Offering",
        "createDiskOffering",
        "Creating",
        "diskoffering",
    )
};

pub static NETWORK_SPEC: ResourceSpec = ResourceSpec {
    title: "Network Offerings",
    list_command: "listNetworkOfferings",
    list_key: "networkoffering",
    list_params: &[],
    default_state: "Inactive",
    states: NETWORK_STATES,
    actions: NETWORK_ACTIONS,
    create: None,
    row: network_row,
    detail_fields: network_detail,
};

pub static COMPUTE_SPEC: ResourceSpec = ResourceSpec {
    title: "Compute Offerings",
    list_command: "listServiceOfferings",
    list_key: "serviceoffering",
    list_params: &[("issystem", "false")],
    default_state: "Active",
    states: CATALOGUE_STATES,
    actions: COMPUTE_ACTIONS,
    create: Some(&CREATE_COMPUTE),
    row: compute_row,
    detail_fields: compute_detail,
};

pub static DISK_SPEC: ResourceSpec = ResourceSpec {
    title: "Disk Offerings",
    list_command: "listDiskOfferings",
    list_key: "diskoffering",
    list_params: &[],
    default_state: "Active",
    states: CATALOGUE_STATES,
    actions: DISK_ACTIONS,
    create: Some(&CREATE_DISK),
    row: disk_row,
    detail_fields: disk_detail,
};

fn catalogue_row(entity: &Value, secondary: String) -> RowView {
    let mut state = text(entity, "state");
    if state.is_empty() {
        state = "Active".to_string();
    }
    RowView {
        name: truncate(&text(entity, "name"), 32),
        tone: tone_for(&state, &["Active", "Enabled"], &["Disabled", "Inactive"], &[]),
        state,
        secondary: truncate(&secondary, 40),
    }
}

fn network_row(entity: &Value) -> RowView {
    let mut row = catalogue_row(entity, text(entity, "guestiptype"));
    if text(entity, "state").is_empty() {
        row.state = "Inactive".to_string();
        row.tone = super::Tone::Stopped;
    }
    row
}

fn compute_row(entity: &Value) -> RowView {
    let cpus = text(entity, "cpunumber");
    let memory = text(entity, "memory");
    let secondary = if cpus.is_empty() {
        text(entity, "displaytext")
    } else {
        format!("{} vCPU · {} MB", cpus, memory)
    };
    catalogue_row(entity, secondary)
}

fn disk_row(entity: &Value) -> RowView {
    let size = text(entity, "disksize");
    let secondary = if size.is_empty() || size == "0" {
        "Custom size".to_string()
    } else {
        format!("{} GB", size)
    };
    catalogue_row(entity, secondary)
}

fn network_detail(entity: &Value) -> Vec<(&'static str, String)> {
    vec![
        ("Name", text(entity, "name")),
        ("Description", text(entity, "displaytext")),
        ("ID", text(entity, "id")),
        ("State", text(entity, "state")),
        ("Guest IP type", text(entity, "guestiptype")),
        ("Traffic type", text(entity, "traffictype")),
        ("Availability", text(entity, "availability")),
        ("Default", text(entity, "isdefault")),
        ("Network rate (Mb/s)", text(entity, "networkrate")),
    ]
}

fn compute_detail(entity: &Value) -> Vec<(&'static str, String)> {
    vec![
        ("Name", text(entity, "name")),
        ("Description", text(entity, "displaytext")),
        ("ID", text(entity, "id")),
        ("CPU cores", text(entity, "cpunumber")),
        ("CPU speed (MHz)", text(entity, "cpuspeed")),
        ("Memory (MB)", text(entity, "memory")),
        ("Storage type", text(entity, "storagetype")),
        ("Offer HA", text(entity, "offerha")),
        ("Domain", text(entity, "domain")),
        ("Created", text(entity, "created")),
    ]
}

fn disk_detail(entity: &Value) -> Vec<(&'static str, String)> {
    vec![
        ("Name", text(entity, "name")),
        ("Description", text(entity, "displaytext")),
        ("ID", text(entity, "id")),
        ("Size (GB)", text(entity, "disksize")),
        ("Custom size", text(entity, "iscustomized")),
        ("Storage type", text(entity, "storagetype")),
        ("Domain", text(entity, "domain")),
        ("Created", text(entity, "created")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionRequest, DispatchResult, Dispatcher};
    use crate::jobs::JobTracker;
    use crate::panel::{PanelState, Reconciled, TargetRef};
    use crate::resources::{ResourceKind, Tone};
    use crate::test_support::{test_client, FakeTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_network_offering_state_filter() {
        let kind = ResourceKind::NetworkOffering;
        assert!(kind.allowed_actions("Enabled").contains(&ActionKey::Disable));
        assert!(!kind.allowed_actions("Enabled").contains(&ActionKey::Enable));
        assert!(kind.allowed_actions("Disabled").contains(&ActionKey::Enable));
    }

    #[test]
    fn test_stateless_offerings_are_active() {
        let offering = json!({"id": "so-1", "name": "small", "cpunumber": 1, "memory": 512});
        let kind = ResourceKind::ComputeOffering;
        assert_eq!(kind.state_of(&offering), "Active");
        assert_eq!(
            kind.available_actions(&offering),
            vec![ActionKey::Edit, ActionKey::Delete]
        );
        let row = compute_row(&offering);
        assert_eq!(row.secondary, "1 vCPU · 512 MB");
        assert_eq!(row.tone, Tone::Healthy);
        assert_eq!(disk_row(&json!({"name": "custom", "disksize": 0})).secondary, "Custom size");
    }

    #[tokio::test]
    async fn test_enable_sends_target_state() {
        let transport = FakeTransport::new();
        transport.reply(
            "updateNetworkOffering",
            200,
            json!({"updatenetworkofferingresponse": {"networkoffering": {
                "id": "no-1", "name": "isolated", "state": "Enabled"
            }}}),
        );
        let client = test_client(transport.clone());
        let (mut tracker, _events) = JobTracker::new(Arc::clone(&client), Duration::from_secs(3));
        let mut panels = PanelState::new(ResourceKind::NetworkOffering);
        panels.load_rows(vec![json!({"id": "no-1", "name": "isolated", "state": "Disabled"})]);

        let enable = ResourceKind::NetworkOffering
            .descriptor(ActionKey::Enable)
            .unwrap();
        let request = ActionRequest::new(
            TargetRef::new(ResourceKind::NetworkOffering, "no-1"),
            enable,
        );
        let result = Dispatcher::new(client)
            .dispatch(&mut tracker, &mut panels, request, false)
            .await;

        assert!(matches!(result, DispatchResult::Completed(Reconciled::Displayed)));
        assert_eq!(panels.current().unwrap().entity["state"], "Enabled");
        let query: Vec<(String, String)> =
            transport.requests()[0].url.query_pairs().into_owned().collect();
        assert!(query.contains(&("id".to_string(), "no-1".to_string())));
        assert!(query.contains(&("state".to_string(), "Enabled".to_string())));
    }
}
