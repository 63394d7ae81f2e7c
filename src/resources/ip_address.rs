//! Public IP addresses with their static NAT and remote access VPN

use super::{flag, text, tone_for, ResourceSpec, RowView, StateTable};
use crate::actions::{
    remove_entity, replace_entity, ActionDescriptor, ActionKey, ActionOutcome, Completion,
};
use crate::panel::EntityUpdate;
use crate::validation::{Dependency, FieldSpec, Lookup, Rule};
use serde_json::{json, Value};

const ASYNC: Completion = Completion::Async {
    poll_interval: None,
};

const STATES: StateTable = &[
    (
        "Allocated",
        &[
            ActionKey::Release,
            ActionKey::EnableStaticNat,
            ActionKey::DisableStaticNat,
            ActionKey::EnableVpn,
            ActionKey::DisableVpn,
        ],
    ),
    ("Reserved", &[ActionKey::Release]),
    ("Allocating", &[]),
    ("Releasing", &[]),
    ("Free", &[]),
];

const ACQUIRE_FORM: &[FieldSpec] = &[
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
        "networkid",
        "Network",
        Lookup {
            command: "listNetworks",
            list_key: "network",
            label_key: "name",
            params: &[("listall", "true")],
            depends_on: Some(Dependency {
                field: "zoneid",
                param: "zoneid",
            }),
        },
        &[],
    ),
];

const STATIC_NAT_FORM: &[FieldSpec] = &[FieldSpec::choice(
    "virtualmachineid",
    "Instance",
    Lookup {
        command: "listVirtualMachines",
        list_key: "virtualmachine",
        label_key: "displayname",
        params: &[("listall", "true"), ("state", "Running")],
        depends_on: None,
    },
    &[Rule::Required],
)];

fn not_source_nat(entity: &Value) -> Result<(), String> {
    if flag(entity, "issourcenat") {
        Err("Source NAT addresses are released with their network".to_string())
    } else {
        Ok(())
    }
}

fn can_enable_static_nat(entity: &Value) -> Result<(), String> {
    not_source_nat(entity)?;
    if flag(entity, "isstaticnat") {
        return Err("Static NAT is already enabled".to_string());
    }
    Ok(())
}

fn can_disable_static_nat(entity: &Value) -> Result<(), String> {
    if flag(entity, "isstaticnat") {
        Ok(())
    } else {
        Err("Static NAT is not enabled".to_string())
    }
}

fn can_enable_vpn(entity: &Value) -> Result<(), String> {
    if !flag(entity, "issourcenat") {
        return Err("Remote access VPN needs the source NAT address".to_string());
    }
    if flag(entity, "vpnenabled") {
        return Err("Remote access VPN is already enabled".to_string());
    }
    Ok(())
}

fn can_disable_vpn(entity: &Value) -> Result<(), String> {
    if flag(entity, "vpnenabled") {
        Ok(())
    } else {
        Err("Remote access VPN is not enabled".to_string())
    }
}

fn static_nat_enabled(_: &ActionDescriptor, _: &Value) -> ActionOutcome {
    ActionOutcome::new(EntityUpdate::Merge(json!({ "isstaticnat": true })))
}

fn static_nat_disabled(_: &ActionDescriptor, _: &Value) -> ActionOutcome {
    ActionOutcome::new(EntityUpdate::Merge(json!({
        "isstaticnat": false,
        "virtualmachineid": null,
        "virtualmachinename": null,
        "virtualmachinedisplayname": null,
    })))
}

fn vpn_enabled(descriptor: &ActionDescriptor, result: &Value) -> ActionOutcome {
    let vpn = result.get(descriptor.result_key);
    let mut outcome = ActionOutcome::new(EntityUpdate::Merge(json!({ "vpnenabled": true })));
    outcome.note = vpn
        .and_then(|vpn| vpn.get("presharedkey"))
        .and_then(Value::as_str)
        .map(|key| format!("Pre-shared key: {}", key));
    outcome
}

fn vpn_disabled(_: &ActionDescriptor, _: &Value) -> ActionOutcome {
    ActionOutcome::new(EntityUpdate::Merge(json!({ "vpnenabled": false })))
}

const ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        key: ActionKey::Release,
        label: "Release IP Address",
        command: "disassociateIpAddress",
        id_param: "id",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Releasing",
        result_key: "ipaddress",
        on_result: remove_entity,
        confirmation: Some("Please confirm that you want to release this IP address."),
        precheck: Some(not_source_nat),
        form: None,
        bulk: true,
    },
    ActionDescriptor {
        key: ActionKey::EnableStaticNat,
        label: "Enable Static NAT",
        command: "enableStaticNat",
        id_param: "ipaddressid",
        extra_params: &[],
        completion: Completion::Sync,
        in_progress_text: "Enabling static NAT",
        result_key: "success",
        on_result: static_nat_enabled,
        confirmation: None,
        precheck: Some(can_enable_static_nat),
        form: Some(STATIC_NAT_FORM),
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::DisableStaticNat,
        label: "Disable Static NAT",
        command: "disableStaticNat",
        id_param: "ipaddressid",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Disabling static NAT",
        result_key: "success",
        on_result: static_nat_disabled,
        confirmation: Some("Please confirm that you want to disable static NAT."),
        precheck: Some(can_disable_static_nat),
        form: None,
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::EnableVpn,
        label: "Enable Remote Access VPN",
        command: "createRemoteAccessVpn",
        id_param: "publicipid",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Enabling VPN",
        result_key: "remoteaccessvpn",
        on_result: vpn_enabled,
        confirmation: Some("Please confirm that you want to enable remote access VPN for this address."),
        precheck: Some(can_enable_vpn),
        form: None,
        bulk: false,
    },
    ActionDescriptor {
        key: ActionKey::DisableVpn,
        label: "Disable Remote Access VPN",
        command: "deleteRemoteAccessVpn",
        id_param: "publicipid",
        extra_params: &[],
        completion: ASYNC,
        in_progress_text: "Disabling VPN",
        result_key: "success",
        on_result: vpn_disabled,
        confirmation: Some("Please confirm that you want to disable remote access VPN."),
        precheck: Some(can_disable_vpn),
        form: None,
        bulk: false,
    },
];

static ACQUIRE: ActionDescriptor = ActionDescriptor {
    key: ActionKey::Create,
    label: "Acquire IP Address",
    command: "associateIpAddress",
    id_param: "",
    extra_params: &[],
    completion: ASYNC,
    in_progress_text: "Acquiring",
    result_key: "ipaddress",
    on_result: replace_entity,
    confirmation: None,
    precheck: None,
    form: Some(ACQUIRE_FORM),
    bulk: false,
};

pub static SPEC: ResourceSpec = ResourceSpec {
    title: "IP Addresses",
    list_command: "listPublicIpAddresses",
    list_key: "publicipaddress",
    list_params: &[("listall", "true"), ("allocatedonly", "true")],
    default_state: "Allocating",
    states: STATES,
    actions: ACTIONS,
    create: Some(&ACQUIRE),
    row,
    detail_fields,
};

fn nat_summary(entity: &Value) -> String {
    if flag(entity, "issourcenat") {
        "Source NAT".to_string()
    } else if flag(entity, "isstaticnat") {
        let vm = super::first_text(entity, &["virtualmachinedisplayname", "virtualmachinename"]);
        if vm.is_empty() {
            "Static NAT".to_string()
        } else {
            format!("Static NAT → {}", vm)
        }
    } else {
        String::new()
    }
}

fn row(entity: &Value) -> RowView {
    let state = text(entity, "state");
    let nat = nat_summary(entity);
    RowView {
        name: text(entity, "ipaddress"),
        tone: tone_for(&state, &["Allocated"], &["Free", "Reserved"], &[]),
        state,
        secondary: if nat.is_empty() {
            text(entity, "zonename")
        } else {
            nat
        },
    }
}

fn detail_fields(entity: &Value) -> Vec<(&'static str, String)> {
    vec![
        ("IP address", text(entity, "ipaddress")),
        ("ID", text(entity, "id")),
        ("Zone", text(entity, "zonename")),
        ("Network", text(entity, "associatednetworkname")),
        ("VLAN", text(entity, "vlanname")),
        ("Source NAT", text(entity, "issourcenat")),
        ("Static NAT", text(entity, "isstaticnat")),
        (
            "Instance",
            super::first_text(entity, &["virtualmachinedisplayname", "virtualmachinename"]),
        ),
        ("Remote access VPN", text(entity, "vpnenabled")),
        ("Account", text(entity, "account")),
        ("Allocated", text(entity, "allocated")),
    ]
}
