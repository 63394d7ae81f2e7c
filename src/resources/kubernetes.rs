//! Kubernetes clusters

use super::{first_text, text, tone_for, ResourceSpec, RowView, StateTable};
use crate::actions::{remove_entity, replace_entity, ActionDescriptor, ActionKey, Completion};
use crate::format::truncate;
use crate::validation::{Dependency, FieldSpec, Lookup, Rule};
use serde_json::Value;
use std::time::Duration;

// Cluster operations provision whole node pools; polling faster gains nothing
const CLUSTER_JOB: Completion = Completion::Async {
    poll_interval: Some(Duration::from_secs(10)),
};

const STATES: StateTable = &[
    (
        "Running",
        &[
            ActionKey::Stop,
            ActionKey::Scale,
            ActionKey::Upgrade,
            ActionKey::Delete,
        ],
    ),
    ("Stopped", &[ActionKey::Start, ActionKey::Delete]),
    ("Alert", &[ActionKey::Start, ActionKey::Stop, ActionKey::Delete]),
    ("Error", &[ActionKey::Delete]),
    ("Created", &[ActionKey::Start, ActionKey::Delete]),
    ("Starting", &[]),
    ("Stopping", &[]),
    ("Scaling", &[]),
    ("Upgrading", &[]),
    ("Destroying", &[]),
    ("Destroyed", &[]),
];

const NODE_COUNT: &[Rule] = &[
    Rule::Required,
    Rule::Integer {
        min: Some(1),
        max: Some(100),
    },
];

const SCALE_FORM: &[FieldSpec] = &[FieldSpec::text("size", "Worker nodes", NODE_COUNT)];

const UPGRADE_FORM: &[FieldSpec] = &[FieldSpec::choice(
    "kubernetesversionid",
    "Kubernetes version",
    Lookup {
        command: "listKubernetesSupportedVersions",
        list_key: "kubernetessupportedversion",
        label_key: "semanticversion",
        params: &[],
        depends_on: None,
    },
    &[Rule::Required],
)];

const CREATE_FORM: &[FieldSpec] = &[
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
        "kubernetesversionid",
        "Kubernetes version",
        Lookup {
            command: "listKubernetesSupportedVersions",
            list_key: "kubernetessupportedversion",
            label_key: "semanticversion",
            params: &[],
            depends_on: Some(Dependency {
                field: "zoneid",
                param: "zoneid",
            }),
        },
        &[Rule::Required],
    ),
    FieldSpec::choice(
        "serviceofferingid",
        "Node offering",
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
    FieldSpec::text(
        "name",
        "Name",
        &[Rule::Required, Rule::Name, Rule::MaxLength(40)],
    ),
    FieldSpec::text("description", "Description", &[Rule::MaxLength(255)]),
    FieldSpec::text("size", "Worker nodes", NODE_COUNT),
];

const fn cluster_action(
    key: ActionKey,
    label: &'static str,
    command: &'static str,
    in_progress_text: &'static str,
) -> ActionDescriptor {
    ActionDescriptor {
        key,
        label,
        command,
        id_param: "id",
        extra_params: &[],
        completion: CLUSTER_JOB,
        in_progress_text,
        result_key: "kubernetescluster",
        on_result: replace_entity,
        confirmation: None,
        precheck: None,
        form: None,
        bulk: false,
    }
}

const ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        bulk: true,
        ..cluster_action(
            ActionKey::Start,
            "Start Kubernetes Cluster",
            "startKubernetesCluster",
            "Starting",
        )
    },
    ActionDescriptor {
        confirmation: Some("Please confirm that you want to stop this Kubernetes cluster."),
        bulk: true,
        ..cluster_action(
            ActionKey::Stop,
            "Stop Kubernetes Cluster",
            "stopKubernetesCluster",
            "Stopping",
        )
    },
    ActionDescriptor {
        form: Some(SCALE_FORM),
        ..cluster_action(
            ActionKey::Scale,
            "Scale Kubernetes Cluster",
            "scaleKubernetesCluster",
            "Scaling",
        )
    },
    ActionDescriptor {
        form: Some(UPGRADE_FORM),
        confirmation: Some("Upgrading restarts every node of the cluster. Continue?"),
        ..cluster_action(
            ActionKey::Upgrade,
            "Upgrade Kubernetes Cluster",
            "upgradeKubernetesCluster",
            "Upgrading",
        )
    },
    ActionDescriptor {
        on_result: remove_entity,
        confirmation: Some("Please confirm that you want to delete this Kubernetes cluster."),
        ..cluster_action(
            ActionKey::Delete,
            "Delete Kubernetes Cluster",
            "deleteKubernetesCluster",
            "Deleting",
        )
    },
];

static CREATE: ActionDescriptor = ActionDescriptor {
    id_param: "",
    form: Some(CREATE_FORM),
    ..cluster_action(
        ActionKey::Create,
        "Create Kubernetes Cluster",
        "createKubernetesCluster",
        "Creating",
    )
};

pub static SPEC: ResourceSpec = ResourceSpec {
    title: "Kubernetes",
    list_command: "listKubernetesClusters",
    list_key: "kubernetescluster",
    list_params: &[("listall", "true")],
    default_state: "Created",
    states: STATES,
    actions: ACTIONS,
    create: Some(&CREATE),
    row,
    detail_fields,
};

fn row(entity: &Value) -> RowView {
    let state = text(entity, "state");
    let size = text(entity, "size");
    let version = text(entity, "kubernetesversionname");
    let secondary = match (size.is_empty(), version.is_empty()) {
        (false, false) => format!("{} nodes · {}", size, version),
        (false, true) => format!("{} nodes", size),
        (true, _) => version,
    };
    RowView {
        name: truncate(&first_text(entity, &["name", "id"]), 32),
        tone: tone_for(&state, &["Running"], &["Stopped", "Created"], &["Alert", "Error"]),
        state,
        secondary: truncate(&secondary, 40),
    }
}

fn detail_fields(entity: &Value) -> Vec<(&'static str, String)> {
    vec![
        ("Name", text(entity, "name")),
        ("Description", text(entity, "description")),
        ("ID", text(entity, "id")),
        ("Zone", text(entity, "zonename")),
        ("Kubernetes version", text(entity, "kubernetesversionname")),
        ("Worker nodes", text(entity, "size")),
        ("Control nodes", first_text(entity, &["controlnodes", "masternodes"])),
        ("Node offering", text(entity, "serviceofferingname")),
        ("Endpoint", text(entity, "endpoint")),
        ("Network", text(entity, "associatednetworkname")),
        ("Account", text(entity, "account")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{settle, ActionRequest, DispatchResult, Dispatcher};
    use crate::jobs::JobTracker;
    use crate::panel::{PanelState, TargetRef};
    use crate::resources::ResourceKind;
    use crate::test_support::{job_reply, test_client, FakeTransport};
    use crate::validation::Form;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_cluster_row() {
        let cluster = json!({
            "id": "k-1", "name": "prod", "state": "Alert", "size": 3,
            "kubernetesversionname": "1.28.4"
        });
        let row = row(&cluster);
        assert_eq!(row.secondary, "3 nodes · 1.28.4");
        assert_eq!(row.tone, super::super::Tone::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_uses_cluster_poll_interval() {
        let transport = FakeTransport::new();
        transport.reply(
            "scaleKubernetesCluster",
            200,
            json!({"scalekubernetesclusterresponse": {"jobid": "job-9"}}),
        );
        transport.reply(
            "queryAsyncJobResult:job-9",
            200,
            job_reply(1, json!({"kubernetescluster": {"id": "k-1", "state": "Running", "size": 5}})),
        );
        let client = test_client(transport.clone());
        let (mut tracker, mut events) = JobTracker::new(Arc::clone(&client), Duration::from_secs(3));
        let mut panels = PanelState::new(ResourceKind::KubernetesCluster);
        panels.load_rows(vec![json!({"id": "k-1", "state": "Running", "size": 3})]);

        let scale = ResourceKind::KubernetesCluster
            .descriptor(ActionKey::Scale)
            .unwrap();
        let mut form = Form::new(scale.label, scale.form.unwrap());
        form.set_text("size", "5");
        assert!(form.validate());

        let request = ActionRequest::new(TargetRef::new(ResourceKind::KubernetesCluster, "k-1"), scale)
            .with_params(form.params());
        let result = Dispatcher::new(client)
            .dispatch(&mut tracker, &mut panels, request, true)
            .await;
        assert!(matches!(result, DispatchResult::Tracking(_)));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(transport.count("queryAsyncJobResult:job-9"), 0);

        let event = events.recv().await.unwrap();
        settle(&mut tracker, &mut panels, event);
        assert_eq!(panels.current().unwrap().entity["size"], 5);
    }
}
