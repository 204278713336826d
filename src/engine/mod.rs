mod error;
mod matching;
mod repository;
mod score;

pub use error::EngineError;
pub use matching::{build_matrix, match_day, DayClaims, DayOutcome, Match, ScoreMatrix};
pub use repository::{AllocationStore, AllocationTxn};
pub use score::{score, ResourceGraph, ScoreWeights};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub weights: ScoreWeights,
}

/// A request accepted by intake, plus whatever its late allocation pass granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub request: Request,
    pub allocations: Vec<Allocation>,
}

/// Automatic allocation over an injected store.
pub struct AllocationEngine<S> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: AllocationStore> AllocationEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Allocate resources to the pending requests of an iteration, day by day.
    ///
    /// Returns only allocations created by this run. Every write of the run is
    /// committed together or not at all.
    pub async fn automatic_allocation(&self, criteria: Criteria) -> Result<Vec<Allocation>, EngineError> {
        let mode = if criteria.request_id.is_some() {
            "single_request"
        } else {
            "iteration"
        };
        let started = Instant::now();
        let result = self.run(criteria).await;
        metrics::histogram!(crate::observability::ALLOCATION_RUN_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_conflict() => "conflict",
            Err(_) => "error",
        };
        metrics::counter!(crate::observability::ALLOCATION_RUNS_TOTAL, "mode" => mode, "status" => status)
            .increment(1);
        if let Err(e) = &result {
            warn!(iteration_id = %criteria.iteration_id, mode, error = %e, "allocation run failed");
        }
        result
    }

    async fn run(&self, criteria: Criteria) -> Result<Vec<Allocation>, EngineError> {
        let iteration_id = criteria.iteration_id;
        let mut txn = self.store.begin(iteration_id).await?;
        let snapshot = txn.get_iteration(iteration_id).await?;
        let iteration = &snapshot.iteration;

        let eligible: Vec<Request> = match criteria.request_id {
            Some(request_id) => {
                let request = txn.get_request(request_id).await?;
                if request.iteration_id != iteration_id {
                    return Err(EngineError::InvalidInput(format!(
                        "request {request_id} does not belong to iteration {iteration_id}"
                    )));
                }
                if request.status.is_resolved() {
                    Vec::new()
                } else {
                    vec![request]
                }
            }
            None => snapshot
                .requests
                .iter()
                .filter(|r| !r.status.is_resolved())
                .cloned()
                .collect(),
        };

        let mut by_day: BTreeMap<Day, Vec<Request>> = BTreeMap::new();
        for request in eligible.iter() {
            if !iteration.contains(request.date) {
                return Err(EngineError::invariant(format!(
                    "request {} is dated {} outside iteration {} ({} - {})",
                    request.id, request.date, iteration_id, iteration.start_date, iteration.end_date
                )));
            }
            by_day.entry(request.date).or_default().push(request.clone());
        }

        let graph = ResourceGraph::new(
            txn.get_all_resources().await?,
            txn.get_all_resource_groups().await?,
        );

        let mut created = Vec::new();
        let mut won = HashSet::new();
        for (day, requests) in &by_day {
            let claims = DayClaims::from_allocations(
                snapshot.allocations.iter().filter(|a| a.date == *day),
                &graph,
            )?;
            let outcome = match_day(requests, &graph, &self.config.weights, &claims)?;
            metrics::histogram!(crate::observability::MATCHING_ROUNDS).record(outcome.rounds as f64);
            debug!(%day, requests = requests.len(), matched = outcome.matches.len(), rounds = outcome.rounds, "day matched");

            for m in outcome.matches {
                let allocation = txn
                    .create_allocation(NewAllocation {
                        iteration_id,
                        date: *day,
                        user_id: m.user_id,
                        resource_id: m.resource_id,
                        source_request_id: m.request_id,
                        points: m.points,
                    })
                    .await?;
                txn.update_request_status(m.request_id, RequestStatus::Completed)
                    .await?;
                won.insert(m.request_id);
                created.push(allocation);
            }
        }

        let mut declined = 0u64;
        for request in eligible.iter().filter(|r| !won.contains(&r.id)) {
            txn.update_request_status(request.id, RequestStatus::Declined)
                .await?;
            declined += 1;
        }

        if criteria.request_id.is_none() && !iteration.is_allocated {
            txn.mark_iteration_allocated(iteration_id).await?;
        }
        txn.commit().await?;

        metrics::counter!(crate::observability::ALLOCATIONS_CREATED_TOTAL).increment(created.len() as u64);
        metrics::counter!(crate::observability::REQUESTS_DECLINED_TOTAL).increment(declined);
        info!(
            %iteration_id,
            days = by_day.len(),
            allocated = created.len(),
            declined,
            "allocation run committed"
        );
        Ok(created)
    }

    /// Intake a request. Against an already allocated iteration the request
    /// gets its own allocation pass right away.
    ///
    /// Intake happens under the iteration's run lock, so a full run either
    /// sees the request or has already set the flag this call reads.
    pub async fn submit_request(&self, new: NewRequest) -> Result<Submission, EngineError> {
        let iteration_id = new.iteration_id;
        let (is_allocated, mut request) = {
            let mut txn = self.store.begin(iteration_id).await?;
            let is_allocated = txn.get_iteration(iteration_id).await?.iteration.is_allocated;
            (is_allocated, self.store.submit_request(new).await?)
        };
        if !is_allocated {
            return Ok(Submission {
                request,
                allocations: Vec::new(),
            });
        }

        info!(request_id = %request.id, %iteration_id, "late request, running single-request allocation");
        let allocations = self
            .automatic_allocation(Criteria::single_request(iteration_id, request.id))
            .await?;
        if let Some(updated) = self
            .store
            .get_iteration(iteration_id)
            .await?
            .requests
            .into_iter()
            .find(|r| r.id == request.id)
        {
            request = updated;
        }
        Ok(Submission {
            request,
            allocations,
        })
    }
}
