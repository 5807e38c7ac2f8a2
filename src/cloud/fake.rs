//! In-memory cloud backend for tests
//!
//! Records every call so tests can assert on ordering and call counts, and
//! lets resources sit in a pending state for a set number of reads.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CloudClient, ExternalResource, ListQuery, OperatingStatus, ProjectScope, ProvisioningStatus,
    Readiness, ResourceKind, ResourceSpec,
};
use crate::Error;

/// A call observed by the fake
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudEvent {
    List { kind: ResourceKind },
    Create { kind: ResourceKind, name: String },
    Retrieve { kind: ResourceKind, id: String, ready: bool },
    Destroy { kind: ResourceKind, id: String },
    EnableInternet { route_table: String },
}

struct Entry {
    kind: ResourceKind,
    resource: ExternalResource,
    pending_reads: u32,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    next_id: u32,
    events: Vec<CloudEvent>,
    create_failures: HashMap<String, String>,
    pending_on_create: HashMap<ResourceKind, u32>,
    lb_pending_after_child_destroy: Option<u32>,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

fn settled(kind: ResourceKind, mut r: ExternalResource) -> ExternalResource {
    match kind.readiness() {
        Readiness::Immediate => {}
        Readiness::ProvisioningActive => {
            r.provisioning_status = Some(ProvisioningStatus::Active);
        }
        Readiness::OnlineAndActive => {
            r.provisioning_status = Some(ProvisioningStatus::Active);
            r.operating_status = Some(OperatingStatus::Online);
        }
    }
    r
}

fn pending(kind: ResourceKind, mut r: ExternalResource) -> ExternalResource {
    if kind.readiness() != Readiness::Immediate {
        r.provisioning_status = Some(ProvisioningStatus::PendingCreate);
        r.operating_status = Some(OperatingStatus::Offline);
    }
    r
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(state: &mut State, kind: ResourceKind) -> String {
        state.next_id += 1;
        format!("{}-{}", kind.to_string().replace(' ', "-"), state.next_id)
    }

    /// Store a resource that turns ready after `pending_reads` retrieves
    pub fn insert(
        &self,
        kind: ResourceKind,
        mut resource: ExternalResource,
        pending_reads: u32,
    ) -> ExternalResource {
        let mut state = self.state.lock().unwrap();
        if resource.id.is_empty() {
            resource.id = Self::next_id(&mut state, kind);
        }
        state.entries.push(Entry {
            kind,
            resource: resource.clone(),
            pending_reads,
        });
        resource
    }

    /// Store a ready resource with the given name
    pub fn seed(&self, kind: ResourceKind, name: &str) -> ExternalResource {
        self.seed_pending(kind, name, 0)
    }

    /// Store a resource that is pending for the first `reads` retrieves
    pub fn seed_pending(&self, kind: ResourceKind, name: &str, reads: u32) -> ExternalResource {
        self.insert(
            kind,
            ExternalResource {
                name: name.to_string(),
                ..Default::default()
            },
            reads,
        )
    }

    /// Store a VPC with the given internet flag and route tables
    pub fn seed_network(&self, id: &str, internet_access: bool, route_tables: &[&str]) {
        self.insert(
            ResourceKind::Network,
            ExternalResource {
                id: id.to_string(),
                name: format!("vpc {id}"),
                internet_access: Some(internet_access),
                route_tables: route_tables.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            0,
        );
    }

    /// Store a subnet inside a VPC
    pub fn seed_subnet(&self, id: &str, vpc: &str) {
        self.insert(
            ResourceKind::Subnet,
            ExternalResource {
                id: id.to_string(),
                name: format!("subnet {id}"),
                vpc: Some(vpc.to_string()),
                ..Default::default()
            },
            0,
        );
    }

    /// Make every create of `name` fail until [`FakeCloud::heal`] is called
    pub fn fail_create(&self, name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(name.to_string(), message.to_string());
    }

    /// Stop injecting create failures
    pub fn heal(&self) {
        self.state.lock().unwrap().create_failures.clear();
    }

    /// Newly created resources of `kind` stay pending for `reads` retrieves
    pub fn pending_on_create(&self, kind: ResourceKind, reads: u32) {
        self.state
            .lock()
            .unwrap()
            .pending_on_create
            .insert(kind, reads);
    }

    /// Removing a listener or server group puts load balancers into a
    /// pending update for `reads` retrieves; destroys under a pending load
    /// balancer are rejected meanwhile
    pub fn lb_pending_after_child_destroy(&self, reads: u32) {
        self.state.lock().unwrap().lb_pending_after_child_destroy = Some(reads);
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn create_count(&self, kind: ResourceKind) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CloudEvent::Create { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn total_creates(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CloudEvent::Create { .. }))
            .count()
    }

    pub fn retrieve_count(&self, kind: ResourceKind) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CloudEvent::Retrieve { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn destroyed(&self, kind: ResourceKind) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                CloudEvent::Destroy { kind: k, id } if *k == kind => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current resources of a kind
    pub fn resources(&self, kind: ResourceKind) -> Vec<ExternalResource> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.resource.clone())
            .collect()
    }
}

fn record_from_spec(spec: &ResourceSpec) -> ExternalResource {
    let mut r = ExternalResource {
        name: spec.name().to_string(),
        ..Default::default()
    };
    if let ResourceSpec::SecurityGroupRule(rule) = spec {
        r.security_group = Some(rule.security_group.clone());
        r.direction = Some(rule.direction);
        r.protocol = rule.protocol;
        r.port_range_min = rule.port_range_min;
        r.port_range_max = rule.port_range_max;
        r.remote_group = rule.remote_group.clone();
    }
    r
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn list(
        &self,
        kind: ResourceKind,
        _scope: &ProjectScope,
        query: &ListQuery,
    ) -> Result<Vec<ExternalResource>, Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::List { kind });
        Ok(state
            .entries
            .iter()
            .filter(|e| e.kind == kind && query.matches(&e.resource))
            .map(|e| e.resource.clone())
            .collect())
    }

    async fn create(&self, _scope: &ProjectScope, spec: &ResourceSpec) -> Result<String, Error> {
        let kind = spec.kind();
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::Create {
            kind,
            name: spec.name().to_string(),
        });

        if let Some(message) = state.create_failures.get(spec.name()) {
            return Err(Error::transport(kind.to_string(), spec.name(), message.clone()));
        }

        let id = Self::next_id(&mut state, kind);
        let pending_reads = state.pending_on_create.get(&kind).copied().unwrap_or(0);
        let mut resource = record_from_spec(spec);
        resource.id = id.clone();
        state.entries.push(Entry {
            kind,
            resource,
            pending_reads,
        });
        Ok(id)
    }

    async fn retrieve(
        &self,
        kind: ResourceKind,
        _scope: &ProjectScope,
        id: &str,
    ) -> Result<ExternalResource, Error> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.kind == kind && e.resource.id == id)
        else {
            return Err(Error::not_found(kind.to_string(), id));
        };

        let observed = if entry.pending_reads > 0 {
            entry.pending_reads -= 1;
            pending(kind, entry.resource.clone())
        } else {
            settled(kind, entry.resource.clone())
        };
        let ready = kind.readiness().is_satisfied(&observed);
        state.events.push(CloudEvent::Retrieve {
            kind,
            id: id.to_string(),
            ready,
        });
        Ok(observed)
    }

    async fn destroy(
        &self,
        kind: ResourceKind,
        _scope: &ProjectScope,
        id: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::Destroy {
            kind,
            id: id.to_string(),
        });

        if let Some(reads) = state.lb_pending_after_child_destroy {
            let lb_pending = state
                .entries
                .iter()
                .any(|e| e.kind == ResourceKind::LoadBalancer && e.pending_reads > 0);
            if lb_pending {
                return Err(Error::transport(
                    kind.to_string(),
                    id,
                    "409 load balancer is PENDING_UPDATE",
                ));
            }
            if matches!(kind, ResourceKind::Listener | ResourceKind::ServerGroup) {
                for entry in state.entries.iter_mut() {
                    if entry.kind == ResourceKind::LoadBalancer {
                        entry.pending_reads = reads;
                    }
                }
            }
        }

        state
            .entries
            .retain(|e| !(e.kind == kind && e.resource.id == id));
        Ok(())
    }

    async fn enable_internet_access(
        &self,
        _scope: &ProjectScope,
        route_table_id: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::EnableInternet {
            route_table: route_table_id.to_string(),
        });
        for entry in state.entries.iter_mut() {
            if entry.kind == ResourceKind::Network
                && entry.resource.route_tables.iter().any(|r| r == route_table_id)
            {
                entry.resource.internet_access = Some(true);
            }
        }
        Ok(())
    }
}
