use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

use super::score::{score, ResourceGraph, ScoreWeights};
use super::EngineError;

/// Scores keyed by (request id, resource id). Only positive scores are kept.
pub type ScoreMatrix = BTreeMap<(Ulid, Ulid), u32>;

/// What is already taken on a day before the greedy loop starts.
#[derive(Debug, Default, Clone)]
pub struct DayClaims {
    resources: HashSet<Ulid>,
    user_tops: HashSet<(UserId, Ulid)>,
}

impl DayClaims {
    /// Claims held by allocations committed earlier for the same day.
    pub fn from_allocations<'a>(
        allocations: impl IntoIterator<Item = &'a Allocation>,
        graph: &ResourceGraph,
    ) -> Result<Self, EngineError> {
        let mut claims = Self::default();
        for a in allocations {
            let top = graph.top_group_of(&a.resource_id).ok_or_else(|| {
                EngineError::invariant(format!(
                    "allocation {} references unknown resource {}",
                    a.id, a.resource_id
                ))
            })?;
            claims.claim(a.user_id, a.resource_id, top);
        }
        Ok(claims)
    }

    fn claim(&mut self, user_id: UserId, resource_id: Ulid, top_group: Ulid) {
        self.resources.insert(resource_id);
        self.user_tops.insert((user_id, top_group));
    }

    fn blocks(&self, user_id: UserId, resource: &Resource) -> bool {
        self.resources.contains(&resource.id)
            || self.user_tops.contains(&(user_id, resource.top_group_id))
    }
}

/// A committed (request, resource) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub request_id: Ulid,
    pub resource_id: Ulid,
    pub user_id: UserId,
    pub points: u32,
}

#[derive(Debug, Default)]
pub struct DayOutcome {
    pub matches: Vec<Match>,
    pub rounds: usize,
}

/// Score every (request, resource) pair of one day, skipping pairs `claims` rule out.
pub fn build_matrix(
    requests: &[Request],
    graph: &ResourceGraph,
    weights: &ScoreWeights,
    claims: &DayClaims,
) -> Result<ScoreMatrix, EngineError> {
    let mut matrix = ScoreMatrix::new();
    for request in requests {
        for resource in graph.resources() {
            if claims.blocks(request.user_id, resource) {
                continue;
            }
            let points = score(request, resource, graph, weights)?;
            if points > 0 {
                matrix.insert((request.id, resource.id), points);
            }
        }
    }
    Ok(matrix)
}

/// Greedy matching for one day.
///
/// Each round commits the highest-scoring pair, ties going to the lowest
/// request id and then the lowest resource id, and prunes every pair that
/// reuses the resource, the request, or the winner's (user, top group).
pub fn match_day(
    requests: &[Request],
    graph: &ResourceGraph,
    weights: &ScoreWeights,
    claims: &DayClaims,
) -> Result<DayOutcome, EngineError> {
    let mut matrix = build_matrix(requests, graph, weights, claims)?;
    let users: HashMap<Ulid, UserId> = requests.iter().map(|r| (r.id, r.user_id)).collect();
    let mut outcome = DayOutcome::default();

    loop {
        let Some((&(request_id, resource_id), &points)) =
            matrix.iter().min_by_key(|&(&key, &points)| (Reverse(points), key))
        else {
            break;
        };
        outcome.rounds += 1;
        let user_id = users[&request_id];
        let top = graph.top_group_of(&resource_id);

        matrix.retain(|&(r, x), _| {
            r != request_id
                && x != resource_id
                && !(users[&r] == user_id && graph.top_group_of(&x) == top)
        });

        outcome.matches.push(Match {
            request_id,
            resource_id,
            user_id,
            points,
        });
    }

    Ok(outcome)
}
