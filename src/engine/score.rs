use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Points awarded per matching clause. Clauses add up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Request names exactly this resource.
    pub exact_resource: u32,
    /// Requested resource shares a group with the candidate.
    pub shared_group: u32,
    /// Candidate belongs to the requested group.
    pub group_member: u32,
    /// Candidate sits under the request's top-level group.
    pub same_top_group: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            exact_resource: 2,
            shared_group: 10,
            group_member: 10,
            same_top_group: 5,
        }
    }
}

/// Resources and groups of one run, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<Ulid, Resource>,
    groups: BTreeMap<Ulid, ResourceGroup>,
}

impl ResourceGraph {
    pub fn new(resources: Vec<Resource>, groups: Vec<ResourceGroup>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.id, r)).collect(),
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
        }
    }

    pub fn resource(&self, id: &Ulid) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources in id order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn top_group_of(&self, resource_id: &Ulid) -> Option<Ulid> {
        self.resources.get(resource_id).map(|r| r.top_group_id)
    }

    /// Top-level group a request is scoped under: its resource's top group,
    /// or its group's top group.
    pub fn effective_top_group(&self, target: &RequestTarget) -> Result<Ulid, EngineError> {
        match target {
            RequestTarget::Resource(rid) => self
                .top_group_of(rid)
                .ok_or_else(|| EngineError::invariant(format!("request names unknown resource {rid}"))),
            RequestTarget::Group(gid) => self
                .groups
                .get(gid)
                .ok_or_else(|| EngineError::invariant(format!("request names unknown group {gid}")))?
                .top_group()
                .ok_or_else(|| EngineError::invariant(format!("group {gid} has no top-level group"))),
        }
    }
}

/// Affinity of `request` for `candidate`. Zero means unrelated.
///
/// Fails only when the request references something missing from `graph`.
pub fn score(
    request: &Request,
    candidate: &Resource,
    graph: &ResourceGraph,
    weights: &ScoreWeights,
) -> Result<u32, EngineError> {
    let mut points = 0u32;

    match &request.target {
        RequestTarget::Resource(rid) => {
            let wanted = graph
                .resource(rid)
                .ok_or_else(|| EngineError::invariant(format!("request names unknown resource {rid}")))?;
            if wanted.id == candidate.id {
                points = points.saturating_add(weights.exact_resource);
            }
            if wanted.shares_group_with(candidate) {
                points = points.saturating_add(weights.shared_group);
            }
        }
        RequestTarget::Group(gid) => {
            if candidate.is_member_of(gid) {
                points = points.saturating_add(weights.group_member);
            }
        }
    }

    if graph.effective_top_group(&request.target)? == candidate.top_group_id {
        points = points.saturating_add(weights.same_top_group);
    }

    Ok(points)
}
