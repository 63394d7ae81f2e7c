//! Virtual machine instances

use super::{first_text, flag, text, tone_for, ResourceSpec, RowView, StateTable};
use crate::actions::{
    remove_entity, replace_entity, ActionDescriptor, ActionKey, ActionOutcome, Completion,
};
use crate::format::truncate;
use crate::validation::{Dependency, FieldSpec, Lookup, Rule};
use serde_json::Value;

const ASYNC: Completion = Completion::Async {
    poll_interval: None,
};

const STATES: StateTable = &[
    (
        "Running",
        &[ActionKey::Stop, ActionKey::Reboot, ActionKey::Destroy],
    ),
    (
        "Stopped",
        &[
            ActionKey::Start,
            ActionKey::Destroy,
            ActionKey::ResetPassword,
            ActionKey::ChangeServiceOffering,
        ],
    ),
    ("Destroyed", &[ActionKey::Recover, ActionKey::Expunge]),
    ("Error", &[ActionKey::Destroy]),
    ("Starting", &[]),
    ("Stopping", &[]),
    ("Migrating", &[]),
    ("Expunging", &[]),
    ("Creating", &[]),
];

const SERVICE_OFFERING_LOOKUP: Lookup = Lookup {
    command: "listServiceOfferings",
    list_key: "serviceoffering",
    label_key: "displaytext",
    params: &[],
    depends_on: None,
};

const CHANGE_OFFERING_FORM: &[FieldSpec] = &[FieldSpec::choice(
    "serviceofferingid",
    "Service offering",
    SERVICE_OFFERING_LOOKUP,
    &[Rule::Required],
)];

const DEPLOY_FORM: &[FieldSpec] = &[
    FieldSpec::choice(
        "zoneid",
        "Zone",
        Lookup {
            command: "listZones",
            list_key: "zone",
            label_key: "name",
            params: &[("available", "true")],
            depends_on: None,
        },
        &[Rule::Required],
    ),
    FieldSpec::choice(
        "templateid",
        "Template",
        Lookup {
            command: "listTemplates",
            list_key: "template",
            label_key: "displaytext",
            params: &[("templatefilter", "executable")],
            depends_on: Some(Dependency {
                field: "zoneid",
                param: "zoneid",
            }),
        },
        &[Rule::Required],
    ),
    FieldSpec::choice(
        "serviceofferingid",
        "Service offering",
        Lookup {
            command: "listServiceOfferings",
            list_key: "serviceoffering",
            label_key: "displaytext",
            params: &[],
            depends_on: Some(Dependency {
                field: "zoneid",
                param: "zoneid",
            }),
        },
        &[Rule::Required],
    ),
    FieldSpec::text("name", "Name", &[Rule::Name, Rule::MaxLength(63)]),
    FieldSpec::text("displayname", "Display name", &[Rule::MaxLength(255)]),
];

fn password_enabled(entity: &Value) -> Result<(), String> {
    if flag(entity, "passwordenabled") {
        Ok(())
    } else {
        Err("The instance's template is not password enabled".to_string())
    }
}

// The new password is only ever returned in this result
fn with_new_password(descriptor: &ActionDescriptor, result: &Value) -> ActionOutcome {
    let mut outcome = replace_entity(descriptor, result);
    outcome.note = result
        .get(descriptor.result_key)
        .and_then(|vm| vm.get("password"))
        .and_then(Value::as_str)
        .map(|password| format!("New password: {}", password));
    outcome
}

const ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        key: ActionKey::Start,
        label: "Start Instance",
        command: "startVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Starting",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: None,
        precheck: None,
        form: None,
        bulk: true,
    },
    ActionDescriptor {
        key: ActionKey::Stop,
        label: "Stop Instance",
        command: "stopVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Stopping",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: Some("Please confirm that you want to stop this instance."),
        precheck: None,
        form: None,
        bulk: true,
    },
    ActionDescriptor {
        key: ActionKey::Reboot,
        label: "Reboot Instance",
        command: "rebootVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Rebooting",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: Some("Please confirm that you want to reboot this instance."),
        precheck: None,
        form: None,
        bulk: true,
    },
    ActionDescriptor {
        key: ActionKey::Destroy,
        label: "Destroy Instance",
        command: "destroyVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Destroying",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: Some("Please confirm that you want to destroy this instance."),
        precheck: None,
        form: None,
        bulk: true,
    },
    ActionDescriptor {
        key: ActionKey::Recover,
        label: "Recover Instance",
        command: "recoverVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: Completion::Sync,
        in_progress_text: "Recovering",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: Some("Please confirm that you want to recover this instance."),
        precheck: None,
        form: None,
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::Expunge,
        label: "Expunge Instance",
        command: "expungeVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Expunging",
        result_key: "virtualmachine",
        on_result: remove_entity,
        confirmation: Some("Expunged instances cannot be recovered. Continue?"),
        precheck: None,
        form: None,
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::ResetPassword,
        label: "Reset Password",
        command: "resetPasswordForVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Resetting password",
        result_key: "virtualmachine",
        on_result: with_new_password,
        confirmation: Some("Please confirm that you want to reset the password of this instance."),
        precheck: Some(password_enabled),
        form: None,
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::ChangeServiceOffering,
        label: "Change Service Offering",
        command: "changeServiceForVirtualMachine",
        id_param: "id",
        extra_params: &[],
        completion: Completion::Sync,
        in_progress_text: "Changing service offering",
        result_key: "virtualmachine",
        on_result: replace_entity,
        confirmation: None,
        precheck: None,
        form: Some(CHANGE_OFFERING_FORM),
        bulk: false,
    },
];

static DEPLOY: ActionDescriptor = ActionDescriptor {
    key: ActionKey::Create,
    label: "Create Instance",
    command: "deployVirtualMachine",
    id_param: "",
    extra_params: &[],
    completion: ASYNC,
    in_progress_text: "Creating",
    result_key: "virtualmachine",
    on_result: replace_entity,
    confirmation: None,
    precheck: None,
    form: Some(DEPLOY_FORM),
    bulk: false,
};

pub static SPEC: ResourceSpec = ResourceSpec {
    title: "Instances",
    list_command: "listVirtualMachines",
    list_key: "virtualmachine",
    list_params: &[("listall", "true")],
    default_state: "Creating",
    states: STATES,
    actions: ACTIONS,
    create: Some(&DEPLOY),
    row,
    detail_fields,
};

/// Address of the first NIC. Instances with several NICs show the default one first.
fn primary_ip(entity: &Value) -> String {
    entity
        .get("nic")
        .and_then(|nics| nics.get(0))
        .map(|nic| text(nic, "ipaddress"))
        .unwrap_or_default()
}

fn row(entity: &Value) -> RowView {
    let state = text(entity, "state");
    let mut secondary = primary_ip(entity);
    let zone = text(entity, "zonename");
    if !zone.is_empty() {
        if !secondary.is_empty() {
            secondary.push_str(" · ");
        }
        secondary.push_str(&zone);
    }
    RowView {
        name: truncate(&first_text(entity, &["displayname", "name", "id"]), 32),
        tone: tone_for(&state, &["Running"], &["Stopped", "Destroyed"], &["Error"]),
        state,
        secondary: truncate(&secondary, 40),
    }
}

fn detail_fields(entity: &Value) -> Vec<(&'static str, String)> {
    let memory = text(entity, "memory");
    vec![
        ("Name", text(entity, "name")),
        ("Display name", text(entity, "displayname")),
        ("ID", text(entity, "id")),
        ("Zone", text(entity, "zonename")),
        ("Template", first_text(entity, &["templatedisplaytext", "templatename"])),
        ("Service offering", text(entity, "serviceofferingname")),
        ("CPUs", text(entity, "cpunumber")),
        (
            "Memory",
            if memory.is_empty() {
                memory
            } else {
                format!("{} MB", memory)
            },
        ),
        ("IP address", primary_ip(entity)),
        ("Host", text(entity, "hostname")),
        ("HA enabled", text(entity, "haenable")),
        ("Account", text(entity, "account")),
        ("Created", text(entity, "created")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::EntityUpdate;
    use crate::resources::{ResourceKind, Tone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_state_filter() {
        let kind = ResourceKind::Instance;
        assert_eq!(
            kind.allowed_actions("Stopped"),
            &[
                ActionKey::Start,
                ActionKey::Destroy,
                ActionKey::ResetPassword,
                ActionKey::ChangeServiceOffering
            ]
        );
        assert!(!kind.allowed_actions("Stopped").contains(&ActionKey::Stop));
        assert!(!kind.allowed_actions("Stopped").contains(&ActionKey::Reboot));
        assert!(kind.allowed_actions("Starting").is_empty());
    }

    #[test]
    fn test_row_projection() {
        let vm = json!({
            "id": "42", "name": "i-2-42-VM", "displayname": "web-01", "state": "Running",
            "zonename": "zone-a", "nic": [{"ipaddress": "10.1.1.5"}, {"ipaddress": "10.2.0.9"}]
        });
        assert_eq!(
            row(&vm),
            RowView {
                name: "web-01".to_string(),
                state: "Running".to_string(),
                secondary: "10.1.1.5 · zone-a".to_string(),
                tone: Tone::Healthy,
            }
        );
        assert_eq!(row(&json!({"id": "7", "state": "Error"})).name, "7");
        assert_eq!(row(&json!({"id": "7", "state": "Error"})).tone, Tone::Failed);
    }

    #[test]
    fn test_detail_is_stable_across_refetch() {
        let vm = json!({"id": "42", "name": "web", "state": "Stopped", "memory": 2048});
        let first = ResourceKind::Instance.project_detail(&vm);
        let refetched: Value = serde_json::from_str(&vm.to_string()).unwrap();
        assert_eq!(ResourceKind::Instance.project_detail(&refetched), first);
        assert!(first.fields.contains(&("Memory", "2048 MB".to_string())));
    }

    #[test]
    fn test_reset_password_note() {
        let descriptor = ResourceKind::Instance
            .descriptor(ActionKey::ResetPassword)
            .unwrap();
        let result = json!({"virtualmachine": {"id": "42", "state": "Stopped", "password": "Xy7"}});
        let outcome = (descriptor.on_result)(descriptor, &result);
        assert_eq!(outcome.note.as_deref(), Some("New password: Xy7"));
        assert!(matches!(outcome.update, EntityUpdate::Replace(_)));

        assert!(password_enabled(&json!({"passwordenabled": true})).is_ok());
        assert!(password_enabled(&json!({})).is_err());
    }

    #[test]
    fn test_deploy_form_orders_dependencies_first() {
        let create = ResourceKind::Instance.descriptor(ActionKey::Create).unwrap();
        let form = create.form.unwrap();
        for (index, field) in form.iter().enumerate() {
            if let Some(dependency) = field.lookup.and_then(|l| l.depends_on) {
                let parent = form.iter().position(|f| f.key == dependency.field).unwrap();
                assert!(parent < index, "{} loads before {}", field.key, dependency.field);
            }
        }
    }
}
