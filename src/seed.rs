//! JSON seed files: a whole office layout plus iterations and requests in one
//! document, cross-referenced by name instead of id.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
    #[error("duplicate {kind} '{name}'")]
    DuplicateKey { kind: &'static str, name: String },
    #[error("request {index}: {reason}")]
    BadRequest { index: usize, reason: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub groups: Vec<SeedGroup>,
    #[serde(default)]
    pub resources: Vec<SeedResource>,
    #[serde(default)]
    pub iterations: Vec<SeedIteration>,
    #[serde(default)]
    pub requests: Vec<SeedRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedGroup {
    pub name: String,
    /// Absent for top-level groups.
    #[serde(default)]
    pub top_group: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedResource {
    pub name: String,
    pub top_group: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedIteration {
    /// Label the requests of this file refer to.
    pub key: String,
    pub start_date: Day,
    pub end_date: Day,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<Ulid>,
    pub iteration: String,
    pub user: UserId,
    pub date: Day,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

/// Ids assigned during an import, by name.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub groups: BTreeMap<String, Ulid>,
    pub resources: BTreeMap<String, Ulid>,
    pub iterations: BTreeMap<String, Ulid>,
    pub requests: Vec<Ulid>,
}

impl Seed {
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn lookup(names: &HashMap<String, Ulid>, kind: &'static str, name: &str) -> Result<Ulid, SeedError> {
    names.get(name).copied().ok_or_else(|| SeedError::UnknownName {
        kind,
        name: name.to_string(),
    })
}

/// Load a seed into the store. Names may also refer to groups and resources
/// that already exist. Stops at the first rejected entry; earlier entries stay.
pub async fn import(store: &Store, seed: Seed) -> Result<ImportReport, SeedError> {
    let mut report = ImportReport::default();
    let mut group_ids: HashMap<String, Ulid> = store
        .list_resource_groups()
        .await
        .into_iter()
        .map(|g| (g.name, g.id))
        .collect();
    let mut resource_ids: HashMap<String, Ulid> = store
        .list_resources()
        .await
        .into_iter()
        .map(|r| (r.name, r.id))
        .collect();

    // Top-level groups first so member groups can reference them in any order
    let (tops, members): (Vec<_>, Vec<_>) = seed.groups.into_iter().partition(|g| g.top_group.is_none());
    for group in tops.into_iter().chain(members) {
        let top = match &group.top_group {
            Some(name) => Some(lookup(&group_ids, "resource group", name)?),
            None => None,
        };
        let id = Ulid::new();
        store
            .create_resource_group(id, group.name.clone(), top.is_none(), top)
            .await?;
        group_ids.insert(group.name.clone(), id);
        report.groups.insert(group.name, id);
    }

    for resource in seed.resources {
        let top = lookup(&group_ids, "resource group", &resource.top_group)?;
        let groups = resource
            .groups
            .iter()
            .map(|name| lookup(&group_ids, "resource group", name))
            .collect::<Result<Vec<_>, _>>()?;
        let id = Ulid::new();
        store.create_resource(id, resource.name.clone(), top, groups).await?;
        resource_ids.insert(resource.name.clone(), id);
        report.resources.insert(resource.name, id);
    }

    let mut iteration_ids = HashMap::new();
    for iteration in seed.iterations {
        if iteration_ids.contains_key(&iteration.key) {
            return Err(SeedError::DuplicateKey {
                kind: "iteration key",
                name: iteration.key,
            });
        }
        let id = Ulid::new();
        store
            .create_iteration(id, iteration.start_date, iteration.end_date)
            .await?;
        iteration_ids.insert(iteration.key.clone(), id);
        report.iterations.insert(iteration.key, id);
    }

    for (index, request) in seed.requests.into_iter().enumerate() {
        let target = match (&request.resource, &request.group) {
            (Some(name), None) => RequestTarget::Resource(lookup(&resource_ids, "resource", name)?),
            (None, Some(name)) => RequestTarget::Group(lookup(&group_ids, "resource group", name)?),
            (Some(_), Some(_)) => {
                return Err(SeedError::BadRequest {
                    index,
                    reason: "names both a resource and a group",
                });
            }
            (None, None) => {
                return Err(SeedError::BadRequest {
                    index,
                    reason: "names neither a resource nor a group",
                });
            }
        };
        let submitted = store
            .submit_request(NewRequest {
                id: request.id.unwrap_or_else(Ulid::new),
                iteration_id: lookup(&iteration_ids, "iteration", &request.iteration)?,
                user_id: request.user,
                date: request.date,
                target,
            })
            .await?;
        report.requests.push(submitted.id);
    }

    info!(
        groups = report.groups.len(),
        resources = report.resources.len(),
        iterations = report.iterations.len(),
        requests = report.requests.len(),
        "seed imported"
    );
    Ok(report)
}
