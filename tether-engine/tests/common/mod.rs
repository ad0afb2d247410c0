//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tether_engine::project::ObjectMeta;
use tether_engine::provider::ProviderName;
use tether_engine::remote::memory::MemoryRemote;
use tether_engine::spec::{
    CloudProviderIntegration, CustomRole, InheritedRole, NetworkPeer, PrivateEndpoint,
    ProjectSpec, TeamMembership,
};
use tether_engine::{
    Action, Context, CycleReport, ManagedProject, MemorySecretStore, ProjectReconciler,
    ReconcileConfig,
};

pub const PROJECT: &str = "p-integration";
pub const ORG: &str = "org-integration";

/// Engine wired to an in-memory remote.
pub struct Harness {
    pub remote: Arc<MemoryRemote>,
    pub secrets: Arc<MemorySecretStore>,
    pub reconciler: ProjectReconciler,
}

impl Harness {
    pub fn new() -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let reconciler =
            ProjectReconciler::new(remote.clone(), secrets.clone(), ReconcileConfig::default());
        Self {
            remote,
            secrets,
            reconciler,
        }
    }

    pub async fn cycle(&self, project: &mut ManagedProject) -> CycleReport {
        self.reconciler
            .reconcile(&Context::detached(), project)
            .await
            .expect("cycle was not cancelled")
    }

    /// Run cycles until one settles, failing after `max` attempts.
    pub async fn converge(&self, project: &mut ManagedProject, max: usize) -> CycleReport {
        for _ in 0..max {
            let report = self.cycle(project).await;
            if report.action == Action::Done {
                return report;
            }
        }
        panic!(
            "project did not converge in {max} cycles: {:?}",
            project.status.conditions
        );
    }
}

pub fn make_project(spec: ProjectSpec) -> ManagedProject {
    ManagedProject {
        metadata: ObjectMeta {
            name: "app".to_string(),
            namespace: "team-a".to_string(),
            generation: 1,
            ..Default::default()
        },
        spec,
        ..Default::default()
    }
}

pub fn make_spec() -> ProjectSpec {
    ProjectSpec {
        project_id: PROJECT.to_string(),
        organization_id: ORG.to_string(),
        ..Default::default()
    }
}

pub fn make_role(name: &str) -> CustomRole {
    CustomRole {
        name: name.to_string(),
        inherited_roles: vec![InheritedRole {
            name: "read".to_string(),
            database: "admin".to_string(),
        }],
        actions: vec![],
    }
}

pub fn make_aws_peer(vpc: &str) -> NetworkPeer {
    NetworkPeer {
        atlas_cidr_block: "192.168.0.0/21".to_string(),
        accepter_region_name: "eu-west-1".to_string(),
        aws_account_id: "123456789012".to_string(),
        route_table_cidr_block: "10.0.0.0/24".to_string(),
        vpc_id: vpc.to_string(),
        ..Default::default()
    }
}

pub fn make_aws_endpoint(region: &str, id: &str) -> PrivateEndpoint {
    PrivateEndpoint {
        provider: ProviderName::Aws,
        region: region.to_string(),
        id: id.to_string(),
        ..Default::default()
    }
}

pub fn make_integration(arn: &str) -> CloudProviderIntegration {
    CloudProviderIntegration {
        provider_name: ProviderName::Aws,
        iam_assumed_role_arn: arn.to_string(),
    }
}

pub fn make_team(name: &str, usernames: &[&str]) -> TeamMembership {
    TeamMembership {
        team_name: name.to_string(),
        usernames: usernames.iter().map(|u| u.to_string()).collect(),
        roles: Vec::new(),
    }
}

pub fn make_assigned_team(name: &str, usernames: &[&str], roles: &[&str]) -> TeamMembership {
    TeamMembership {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        ..make_team(name, usernames)
    }
}
