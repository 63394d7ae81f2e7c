//! Managed resource types
//!
//! Each resource type describes how it is listed, how a snapshot projects
//! into a row and a detail pane, which actions each state allows and how
//! those actions are dispatched.

pub mod instance;
pub mod ip_address;
pub mod kubernetes;
pub mod offering;

use crate::actions::{ActionDescriptor, ActionKey};
use crate::api::{param, ApiError, CloudClient, Params};
use crate::format::display_safe;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Instance,
    IpAddress,
    NetworkOffering,
    ComputeOffering,
    DiskOffering,
    KubernetesCluster,
}

/// State name to the actions it allows. States missing from the table allow nothing.
pub type StateTable = &'static [(&'static str, &'static [ActionKey])];

pub struct ResourceSpec {
    pub title: &'static str,
    pub list_command: &'static str,
    pub list_key: &'static str,
    pub list_params: &'static [(&'static str, &'static str)],
    /// Used when a snapshot carries no `state` field.
    pub default_state: &'static str,
    pub states: StateTable,
    pub actions: &'static [ActionDescriptor],
    pub create: Option<&'static ActionDescriptor>,
    pub row: fn(&Value) -> RowView,
    pub detail_fields: fn(&Value) -> Vec<(&'static str, String)>,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Instance,
        ResourceKind::IpAddress,
        ResourceKind::NetworkOffering,
        ResourceKind::ComputeOffering,
        ResourceKind::DiskOffering,
        ResourceKind::KubernetesCluster,
    ];

    pub fn spec(self) -> &'static ResourceSpec {
        match self {
            ResourceKind::Instance => &instance::SPEC,
            ResourceKind::IpAddress => &ip_address::SPEC,
            ResourceKind::NetworkOffering => &offering::NETWORK_SPEC,
            ResourceKind::ComputeOffering => &offering::COMPUTE_SPEC,
            ResourceKind::DiskOffering => &offering::DISK_SPEC,
            ResourceKind::KubernetesCluster => &kubernetes::SPEC,
        }
    }

    pub fn title(self) -> &'static str {
        self.spec().title
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }

    pub fn state_of(self, entity: &Value) -> String {
        let state = text(entity, "state");
        if state.is_empty() {
            self.spec().default_state.to_string()
        } else {
            state
        }
    }

    pub fn documented_states(self) -> impl Iterator<Item = &'static str> {
        self.spec().states.iter().map(|(state, _)| *state)
    }

    /// Table lookup from state to allowed actions; unknown states allow nothing.
    pub fn allowed_actions(self, state: &str) -> &'static [ActionKey] {
        self.spec()
            .states
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, actions)| *actions)
            .unwrap_or(&[])
    }

    pub fn descriptor(self, key: ActionKey) -> Option<&'static ActionDescriptor> {
        if key == ActionKey::Create {
            return self.spec().create;
        }
        self.spec().actions.iter().find(|d| d.key == key)
    }

    /// Actions the entity's state allows whose precheck also passes.
    pub fn available_actions(self, entity: &Value) -> Vec<ActionKey> {
        self.allowed_actions(&self.state_of(entity))
            .iter()
            .copied()
            .filter(|key| {
                self.descriptor(*key)
                    .map(|d| d.precheck.map(|check| check(entity).is_ok()).unwrap_or(true))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn bulk_actions_for(self, entity: &Value) -> Vec<ActionKey> {
        self.available_actions(entity)
            .into_iter()
            .filter(|key| self.descriptor(*key).map(|d| d.bulk).unwrap_or(false))
            .collect()
    }

    pub fn project_row(self, entity: &Value) -> RowView {
        (self.spec().row)(entity)
    }

    pub fn project_detail(self, entity: &Value) -> DetailView {
        let row = self.project_row(entity);
        DetailView {
            title: row.name,
            actions: self.available_actions(entity),
            state: self.state_of(entity),
            fields: (self.spec().detail_fields)(entity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Healthy,
    Stopped,
    Transitional,
    Failed,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    pub name: String,
    pub state: String,
    pub secondary: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailView {
    pub title: String,
    pub state: String,
    pub fields: Vec<(&'static str, String)>,
    pub actions: Vec<ActionKey>,
}

/// Display text of a snapshot field, sanitized. Missing and null give "".
pub fn text(entity: &Value, key: &str) -> String {
    match entity.get(key) {
        Some(Value::String(s)) => display_safe(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "Yes".to_string(),
        Some(Value::Bool(false)) => "No".to_string(),
        _ => String::new(),
    }
}

/// First non-empty field out of `keys`.
pub fn first_text(entity: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| text(entity, key))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

pub fn flag(entity: &Value, key: &str) -> bool {
    match entity.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub fn tone_for(state: &str, healthy: &[&str], stopped: &[&str], failed: &[&str]) -> Tone {
    if healthy.contains(&state) {
        Tone::Healthy
    } else if stopped.contains(&state) {
        Tone::Stopped
    } else if failed.contains(&state) {
        Tone::Failed
    } else if state.is_empty() {
        Tone::Neutral
    } else {
        Tone::Transitional
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    pub keyword: Option<String>,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            keyword: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub entities: Vec<Value>,
    pub page: u32,
    pub has_prev: bool,
    pub has_next: bool,
    pub count: Option<u64>,
}

/// Fetches one page of a resource list.
pub async fn fetch_page(
    client: &CloudClient,
    kind: ResourceKind,
    request: &PageRequest,
) -> Result<Page, ApiError> {
    let spec = kind.spec();
    let mut params: Params = spec
        .list_params
        .iter()
        .map(|(key, value)| param(key, value))
        .collect();
    params.push(param("page", request.page));
    params.push(param("pagesize", request.page_size));
    if let Some(keyword) = request.keyword.as_deref().filter(|k| !k.is_empty()) {
        params.push(param("keyword", keyword));
    }

    let envelope = client.execute(spec.list_command, &params).await?;
    let entities = envelope
        .get(spec.list_key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // A full page means there may be more
    let has_next = request.page_size > 0 && entities.len() >= request.page_size as usize;

    Ok(Page {
        page: request.page,
        has_prev: request.page > 1,
        has_next,
        count: envelope.get("count").and_then(Value::as_u64),
        entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_client, FakeTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_allowed_actions_total_over_documented_states() {
        for kind in ResourceKind::ALL {
            for state in kind.documented_states() {
                let actions = kind.allowed_actions(state);
                for key in actions {
                    assert!(
                        kind.descriptor(*key).is_some(),
                        "{:?} state {} allows {:?} without a descriptor",
                        kind,
                        state,
                        key
                    );
                }
            }
            assert!(kind.allowed_actions("NoSuchState").is_empty());
            assert!(kind.allowed_actions("").is_empty());
        }
    }

    #[test]
    fn test_projection_is_pure() {
        let entity = json!({
            "id": "42", "name": "web-01", "displayname": "Web 01", "state": "Running",
            "zonename": "zone-a", "nic": [{"ipaddress": "10.1.1.5"}]
        });
        for kind in ResourceKind::ALL {
            let first = kind.project_row(&entity);
            let _ = kind.project_detail(&json!({"id": "other"}));
            assert_eq!(kind.project_row(&entity), first);
            assert_eq!(kind.project_detail(&entity), kind.project_detail(&entity.clone()));
        }
    }

    #[test]
    fn test_text_sanitizes_and_formats() {
        let entity = json!({"name": "<b>x</b>", "cpu": 4, "ha": true, "none": null});
        assert_eq!(text(&entity, "name"), "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(text(&entity, "cpu"), "4");
        assert_eq!(text(&entity, "ha"), "Yes");
        assert_eq!(text(&entity, "none"), "");
        assert_eq!(text(&entity, "missing"), "");
    }

    #[tokio::test]
    async fn test_fetch_page_full_page_has_next() {
        let transport = FakeTransport::new();
        transport.reply(
            "listVirtualMachines",
            200,
            json!({"listvirtualmachinesresponse": {"count": 3, "virtualmachine": [
                {"id": "1"}, {"id": "2"}
            ]}}),
        );
        let client = test_client(transport.clone());

        let request = PageRequest {
            page: 1,
            page_size: 2,
            keyword: Some("web".to_string()),
        };
        let page = fetch_page(&client, ResourceKind::Instance, &request)
            .await
            .unwrap();

        assert_eq!(page.entities.len(), 2);
        assert!(page.has_next);
        assert!(!page.has_prev);
        assert_eq!(page.count, Some(3));

        let url = &transport.requests()[0].url;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&param("pagesize", 2)));
        assert!(pairs.contains(&param("keyword", "web")));
        assert!(pairs.contains(&param("listall", "true")));
    }

    #[tokio::test]
    async fn test_fetch_page_empty_envelope() {
        let transport = FakeTransport::new();
        transport.reply(
            "listKubernetesClusters",
            200,
            json!({"listkubernetesclustersresponse": {}}),
        );
        let client = test_client(transport);

        let request = PageRequest {
            page: 2,
            page_size: 20,
            keyword: None,
        };
        let page = fetch_page(&client, ResourceKind::KubernetesCluster, &request)
            .await
            .unwrap();
        assert!(page.entities.is_empty());
        assert!(!page.has_next);
        assert!(page.has_prev);
    }
}
