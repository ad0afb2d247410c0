//! Team memberships and project team assignments.
//!
//! Teams live at the organization level and are resolved by name. Member
//! removals and user lookups run as bounded concurrent batches; additions
//! go out in one call. Teams declared with roles are then assigned to the
//! project; a team whose roles changed is unassigned and assigned again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler, ReconcileConfig};
use crate::aggregate::{aggregate, Deletion, DeletionResult};
use crate::batch::run_bounded;
use crate::context::Context;
use crate::error::ApiResult;
use crate::remote::types::{CloudUser, ProjectTeam, Team};
use crate::remote::{list_all, TeamApi};
use crate::spec::TeamMembership;
use crate::state::Step;
use crate::status::{ConditionType, ProjectStatus, TeamStatus};
use crate::workflow::{Outcome, Reason};

fn fail(status: &mut TeamStatus, message: String) {
    status.phase = status.phase.next(&Step::Error);
    status.error_message = Some(match status.error_message.take() {
        Some(existing) => format!("{existing}; {message}"),
        None => message,
    });
}

fn role_set(roles: &[String]) -> BTreeSet<&str> {
    roles.iter().map(String::as_str).collect()
}

pub struct TeamReconciler {
    api: Arc<dyn TeamApi>,
    config: ReconcileConfig,
}

impl TeamReconciler {
    pub fn new(api: Arc<dyn TeamApi>, config: ReconcileConfig) -> Self {
        Self { api, config }
    }

    async fn find_team(&self, cx: &Context, org_id: &str, name: &str) -> ApiResult<Option<Team>> {
        match cx.call(self.api.get_team_by_name(org_id, name)).await {
            Ok(team) => Ok(Some(team)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn resolve_team(&self, cx: &Context, org_id: &str, name: &str) -> ApiResult<Team> {
        match self.find_team(cx, org_id, name).await? {
            Some(team) => Ok(team),
            None => {
                info!(parent: &cx.span, "Creating team {}", name);
                cx.call(self.api.create_team(org_id, name)).await
            }
        }
    }

    async fn sync_members(
        &self,
        cx: &Context,
        org_id: &str,
        team: &TeamMembership,
        previously: &BTreeSet<&str>,
    ) -> TeamStatus {
        let mut status = TeamStatus {
            team_name: team.team_name.clone(),
            ..Default::default()
        };
        let resolved = match self.resolve_team(cx, org_id, &team.team_name).await {
            Ok(resolved) => resolved,
            Err(e) => {
                fail(&mut status, format!("failed to resolve team: {e}"));
                return status;
            }
        };
        status.team_id = resolved.id.clone();

        let members: Vec<CloudUser> = match list_all(self.config.page_size, |page| {
            cx.call(self.api.list_team_users(org_id, &resolved.id, page))
        })
        .await
        {
            Ok(members) => members,
            Err(e) => {
                fail(&mut status, format!("failed to list members: {e}"));
                return status;
            }
        };

        let wanted: BTreeSet<&str> = team.usernames.iter().map(String::as_str).collect();
        let present: HashSet<&str> = members.iter().map(|m| m.username.as_str()).collect();
        let to_remove: Vec<CloudUser> = members
            .iter()
            .filter(|m| previously.contains(m.username.as_str()) && !wanted.contains(m.username.as_str()))
            .cloned()
            .collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|u| !present.contains(*u))
            .map(|u| u.to_string())
            .collect();
        let removing = to_remove.len();

        let mut errors = Vec::new();

        if !to_remove.is_empty() {
            info!(parent: &cx.span, "Removing {} member(s) from team {}", removing, team.team_name);
            let api = self.api.clone();
            let team_id = resolved.id.clone();
            let org = org_id.to_string();
            let removed = run_bounded(self.config.batch_limit, to_remove, move |user: CloudUser| {
                let api = api.clone();
                let team_id = team_id.clone();
                let org = org.clone();
                async move {
                    match cx.call(api.remove_team_user(&org, &team_id, &user.id)).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.is_not_found() => Ok(()),
                        Err(e) => Err(format!("failed to remove {}: {e}", user.username)),
                    }
                }
            })
            .await;
            if let Err(e) = removed {
                errors.push(e);
            }
        }

        let found = Arc::new(Mutex::new(Vec::with_capacity(missing.len())));
        if !missing.is_empty() {
            let api = self.api.clone();
            let sink = found.clone();
            let looked_up = run_bounded(self.config.batch_limit, missing, move |username: String| {
                let api = api.clone();
                let sink = sink.clone();
                async move {
                    let user = cx
                        .call(api.get_user_by_name(&username))
                        .await
                        .map_err(|e| format!("failed to look up user {username}: {e}"))?;
                    sink.lock().await.push(user.id);
                    Ok::<(), String>(())
                }
            })
            .await;
            if let Err(e) = looked_up {
                errors.push(e);
            }
        }

        let user_ids = std::mem::take(&mut *found.lock().await);
        if !user_ids.is_empty() {
            info!(parent: &cx.span, "Adding {} member(s) to team {}", user_ids.len(), team.team_name);
            if let Err(e) = cx
                .call(self.api.add_team_users(org_id, &resolved.id, &user_ids))
                .await
            {
                errors.push(format!("failed to add members: {e}"));
            }
        } else {
            debug!(parent: &cx.span, "Team {} has no members to add", team.team_name);
        }

        if errors.is_empty() {
            status.members = members.len() - removing + user_ids.len();
            status.phase = status.phase.next(&Step::Synced);
        } else {
            warn!(parent: &cx.span, "Team {} partially synced: {}", team.team_name, errors.join("; "));
            status.members = members.len();
            fail(&mut status, errors.join("; "));
        }
        status
    }

    /// Bring the project's team assignments in line with the declared roles.
    ///
    /// Assigned teams that were never recorded as owned are left alone.
    /// Returns the unassignments of teams no longer declared with roles.
    async fn sync_assignments(
        &self,
        cx: &Context,
        project_id: &str,
        org_id: &str,
        declared: &[&TeamMembership],
        statuses: &mut [TeamStatus],
        owned: &[TeamMembership],
    ) -> ApiResult<Vec<Deletion>> {
        let assigned: Vec<ProjectTeam> = list_all(self.config.page_size, |page| {
            cx.call(self.api.list_project_teams(project_id, page))
        })
        .await?;

        // team id -> index of the declared team that wants it assigned
        let mut wanted: BTreeMap<String, usize> = BTreeMap::new();
        for (i, (team, status)) in declared.iter().zip(statuses.iter()).enumerate() {
            if !team.roles.is_empty() && !status.team_id.is_empty() {
                wanted.insert(status.team_id.clone(), i);
            }
        }
        let wanted_names: HashSet<&str> = declared
            .iter()
            .filter(|t| !t.roles.is_empty())
            .map(|t| t.team_name.as_str())
            .collect();

        let mut deletions = Vec::new();
        let mut releasing: HashMap<String, String> = HashMap::new();
        for team in owned {
            if team.roles.is_empty() || wanted_names.contains(team.team_name.as_str()) {
                continue;
            }
            let known = declared
                .iter()
                .zip(statuses.iter())
                .find(|(d, s)| d.team_name == team.team_name && !s.team_id.is_empty())
                .map(|(_, s)| s.team_id.clone());
            let team_id = match known {
                Some(id) => id,
                None => match self.find_team(cx, org_id, &team.team_name).await {
                    Ok(Some(found)) => found.id,
                    Ok(None) => continue,
                    Err(e) => {
                        deletions.push(Deletion::new(
                            format!("team {} assignment", team.team_name),
                            DeletionResult::Failed(format!("failed to resolve team: {e}")),
                        ));
                        continue;
                    }
                },
            };
            releasing.insert(team_id, team.team_name.clone());
        }

        let mut settled = HashSet::new();
        for current in &assigned {
            if current.team_id.is_empty() {
                continue;
            }
            if let Some(&i) = wanted.get(&current.team_id) {
                if role_set(&current.role_names) == role_set(&declared[i].roles) {
                    settled.insert(current.team_id.clone());
                    continue;
                }
                info!(parent: &cx.span, "Roles of team {} changed, unassigning it for reassignment", declared[i].team_name);
                if let Err(e) = cx
                    .call(self.api.unassign_project_team(project_id, &current.team_id))
                    .await
                {
                    if !e.is_not_found() {
                        fail(&mut statuses[i], format!("failed to unassign for role change: {e}"));
                        settled.insert(current.team_id.clone());
                    }
                }
            } else if let Some(name) = releasing.get(&current.team_id) {
                info!(parent: &cx.span, "Unassigning team {} from project", name);
                let result = deletion_result(
                    cx.call(self.api.unassign_project_team(project_id, &current.team_id))
                        .await,
                );
                deletions.push(Deletion::new(format!("team {name} assignment"), result));
            }
        }

        for (team_id, &i) in &wanted {
            if settled.contains(team_id) && statuses[i].error_message.is_none() {
                statuses[i].roles = declared[i].roles.clone();
                statuses[i].roles.sort();
            }
        }

        let to_assign: Vec<(usize, ProjectTeam)> = wanted
            .iter()
            .filter(|(team_id, _)| !settled.contains(*team_id))
            .map(|(team_id, &i)| {
                (
                    i,
                    ProjectTeam {
                        team_id: team_id.clone(),
                        role_names: declared[i].roles.clone(),
                    },
                )
            })
            .collect();
        if to_assign.is_empty() {
            return Ok(deletions);
        }

        info!(parent: &cx.span, "Assigning {} team(s) to project", to_assign.len());
        let request: Vec<ProjectTeam> = to_assign.iter().map(|(_, t)| t.clone()).collect();
        match cx
            .call(self.api.assign_project_teams(project_id, &request))
            .await
        {
            Ok(()) => {
                for (i, team) in to_assign {
                    let mut roles = team.role_names;
                    roles.sort();
                    statuses[i].roles = roles;
                }
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to assign teams to project: {}", e);
                for (i, _) in to_assign {
                    fail(&mut statuses[i], format!("failed to assign team to project: {e}"));
                }
            }
        }
        Ok(deletions)
    }
}

#[async_trait]
impl CategoryReconciler for TeamReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::TeamsReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        let desired = &input.spec.teams;
        let owned = &input.owned.spec().teams;
        // Teams outlive the project: dropping one from the declaration only
        // withdraws its project assignment.
        if desired.is_empty() && owned.iter().all(|t| t.roles.is_empty()) {
            status.teams.clear();
            return Outcome::NotConfigured;
        }
        let org_id = input.spec.organization_id.as_str();
        if org_id.is_empty() {
            return Outcome::failed(Reason::TeamsNotReady, "organizationId is required to manage teams");
        }

        let mut seen = HashSet::new();
        let declared: Vec<&TeamMembership> = desired
            .iter()
            .filter(|t| seen.insert(t.team_name.as_str()))
            .collect();

        let mut statuses = Vec::with_capacity(declared.len());
        for team in &declared {
            let previously: BTreeSet<&str> = owned
                .iter()
                .filter(|o| o.team_name == team.team_name)
                .flat_map(|o| o.usernames.iter().map(String::as_str))
                .collect();
            statuses.push(self.sync_members(cx, org_id, team, &previously).await);
        }

        let outcome = match self
            .sync_assignments(cx, input.project_id, org_id, &declared, &mut statuses, owned)
            .await
        {
            Ok(deletions) => aggregate(&statuses, statuses.len(), &deletions, Reason::TeamsNotReady),
            Err(e) => Outcome::failed(Reason::TeamsNotReady, format!("failed to list project teams: {e}")),
        };
        status.teams = statuses;
        outcome
    }
}
