use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::StoreError;

/// Key of the (iteration, date, resource) uniqueness constraint.
pub(crate) type Slot = (Ulid, Day, Ulid);

/// The committed state. Every change goes through `check_batch` then `apply`.
#[derive(Debug, Default)]
pub struct Catalog {
    groups: BTreeMap<Ulid, ResourceGroup>,
    group_names: HashMap<String, Ulid>,
    resources: BTreeMap<Ulid, Resource>,
    resource_names: HashMap<String, Ulid>,
    iterations: BTreeMap<Ulid, Iteration>,
    requests: BTreeMap<Ulid, Request>,
    requests_by_iteration: HashMap<Ulid, BTreeSet<Ulid>>,
    allocations: BTreeMap<Ulid, Allocation>,
    allocations_by_iteration: HashMap<Ulid, BTreeSet<Ulid>>,
    slots: HashMap<Slot, Ulid>,
}

/// Writes staged earlier in the same batch that later writes must see.
#[derive(Default)]
pub(crate) struct Pending {
    pub(crate) slots: HashMap<Slot, Ulid>,
    pub(crate) allocation_ids: HashSet<Ulid>,
    pub(crate) resolved: HashSet<Ulid>,
}

impl Pending {
    pub(crate) fn record(&mut self, event: &Event) {
        match event {
            Event::AllocationCreated {
                id,
                iteration_id,
                date,
                resource_id,
                ..
            } => {
                self.slots.insert((*iteration_id, *date, *resource_id), *id);
                self.allocation_ids.insert(*id);
            }
            Event::RequestResolved { id, .. } => {
                self.resolved.insert(*id);
            }
            _ => {}
        }
    }
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn group(&self, id: &Ulid) -> Option<&ResourceGroup> {
        self.groups.get(id)
    }

    pub fn resource(&self, id: &Ulid) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn iteration(&self, id: &Ulid) -> Option<&Iteration> {
        self.iterations.get(id)
    }

    pub fn request(&self, id: &Ulid) -> Option<&Request> {
        self.requests.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ResourceGroup> {
        self.groups.values()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn iterations(&self) -> impl Iterator<Item = &Iteration> {
        self.iterations.values()
    }

    pub fn requests_of(&self, iteration_id: &Ulid) -> impl Iterator<Item = &Request> {
        self.requests_by_iteration
            .get(iteration_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.requests.get(id))
    }

    pub fn allocations_of(&self, iteration_id: &Ulid) -> impl Iterator<Item = &Allocation> {
        self.allocations_by_iteration
            .get(iteration_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.allocations.get(id))
    }

    pub fn slot_owner(&self, slot: &Slot) -> Option<Ulid> {
        self.slots.get(slot).copied()
    }

    pub fn iteration_snapshot(&self, id: &Ulid) -> Option<IterationSnapshot> {
        let iteration = self.iterations.get(id)?.clone();
        Some(IterationSnapshot {
            iteration,
            requests: self.requests_of(id).cloned().collect(),
            allocations: self.allocations_of(id).cloned().collect(),
        })
    }

    /// Top-level group a request target is scoped under.
    pub fn target_top_group(&self, target: &RequestTarget) -> Option<Ulid> {
        match target {
            RequestTarget::Resource(rid) => self.resources.get(rid).map(|r| r.top_group_id),
            RequestTarget::Group(gid) => self.groups.get(gid).and_then(|g| g.top_group()),
        }
    }

    // ── Validation ───────────────────────────────────────────

    /// Validate a batch in order; each event sees the ones staged before it.
    pub fn check_batch(&self, batch: &[Event]) -> Result<(), StoreError> {
        let mut pending = Pending::default();
        for event in batch {
            self.check(event, &pending)?;
            pending.record(event);
        }
        Ok(())
    }

    pub(crate) fn check(&self, event: &Event, pending: &Pending) -> Result<(), StoreError> {
        match event {
            Event::GroupCreated {
                id,
                name,
                is_top_level,
                top_group_id,
            } => {
                if self.groups.len() >= MAX_RESOURCE_GROUPS {
                    return Err(StoreError::LimitExceeded("too many resource groups"));
                }
                check_name(name)?;
                if self.groups.contains_key(id) {
                    return Err(StoreError::AlreadyExists { kind: "resource group", id: *id });
                }
                if let Some(existing) = self.group_names.get(name) {
                    return Err(StoreError::AlreadyExists {
                        kind: "resource group name",
                        id: *existing,
                    });
                }
                match (is_top_level, top_group_id) {
                    (true, None) => {}
                    (true, Some(top)) if top == id => {}
                    (true, Some(_)) => {
                        return Err(StoreError::invalid(
                            "a top-level group cannot reference another top group",
                        ));
                    }
                    (false, None) => {
                        return Err(StoreError::invalid(
                            "a member group must reference its top-level group",
                        ));
                    }
                    (false, Some(top)) => self.check_top_group(top)?,
                }
                Ok(())
            }
            Event::ResourceCreated {
                id,
                name,
                top_group_id,
                group_ids,
            } => {
                if self.resources.len() >= MAX_RESOURCES {
                    return Err(StoreError::LimitExceeded("too many resources"));
                }
                if group_ids.len() > MAX_GROUPS_PER_RESOURCE {
                    return Err(StoreError::LimitExceeded("too many groups on resource"));
                }
                check_name(name)?;
                if self.resources.contains_key(id) {
                    return Err(StoreError::AlreadyExists { kind: "resource", id: *id });
                }
                if let Some(existing) = self.resource_names.get(name) {
                    return Err(StoreError::AlreadyExists {
                        kind: "resource name",
                        id: *existing,
                    });
                }
                self.check_top_group(top_group_id)?;
                for gid in group_ids {
                    if !self.groups.contains_key(gid) {
                        return Err(StoreError::not_found("resource group", *gid));
                    }
                }
                Ok(())
            }
            Event::ResourceAssigned {
                resource_id,
                group_id,
            } => {
                let resource = self
                    .resources
                    .get(resource_id)
                    .ok_or(StoreError::not_found("resource", *resource_id))?;
                if !self.groups.contains_key(group_id) {
                    return Err(StoreError::not_found("resource group", *group_id));
                }
                if resource.is_member_of(group_id) {
                    return Err(StoreError::AlreadyExists {
                        kind: "group membership",
                        id: *group_id,
                    });
                }
                if resource.group_ids.len() >= MAX_GROUPS_PER_RESOURCE {
                    return Err(StoreError::LimitExceeded("too many groups on resource"));
                }
                Ok(())
            }
            Event::IterationCreated {
                id,
                start_date,
                end_date,
            } => {
                if self.iterations.len() >= MAX_ITERATIONS {
                    return Err(StoreError::LimitExceeded("too many iterations"));
                }
                if self.iterations.contains_key(id) {
                    return Err(StoreError::AlreadyExists { kind: "iteration", id: *id });
                }
                if start_date >= end_date {
                    return Err(StoreError::invalid("end_date must be later than start_date"));
                }
                if (*end_date - *start_date).num_days() + 1 > MAX_ITERATION_DAYS {
                    return Err(StoreError::LimitExceeded("iteration too long"));
                }
                Ok(())
            }
            Event::RequestSubmitted {
                id,
                iteration_id,
                user_id,
                date,
                target,
            } => {
                if self.requests.contains_key(id) {
                    return Err(StoreError::AlreadyExists { kind: "request", id: *id });
                }
                let iteration = self
                    .iterations
                    .get(iteration_id)
                    .ok_or(StoreError::not_found("iteration", *iteration_id))?;
                if !iteration.contains(*date) {
                    return Err(StoreError::invalid(format!(
                        "date {date} not within bounds: {} - {}",
                        iteration.start_date, iteration.end_date
                    )));
                }
                if self
                    .requests_by_iteration
                    .get(iteration_id)
                    .is_some_and(|ids| ids.len() >= MAX_REQUESTS_PER_ITERATION)
                {
                    return Err(StoreError::LimitExceeded("too many requests in iteration"));
                }
                match target {
                    RequestTarget::Resource(rid) if !self.resources.contains_key(rid) => {
                        return Err(StoreError::not_found("resource", *rid));
                    }
                    RequestTarget::Group(gid) if !self.groups.contains_key(gid) => {
                        return Err(StoreError::not_found("resource group", *gid));
                    }
                    _ => {}
                }
                let top = self.target_top_group(target);
                let duplicate = self.requests_of(iteration_id).any(|r| {
                    r.user_id == *user_id
                        && r.date == *date
                        && self.target_top_group(&r.target) == top
                });
                if duplicate {
                    return Err(StoreError::invalid(
                        "user already has a request for the given top resource group, date and iteration",
                    ));
                }
                Ok(())
            }
            Event::RequestResolved {
                id,
                iteration_id,
                status,
            } => {
                let request = self
                    .requests
                    .get(id)
                    .ok_or(StoreError::not_found("request", *id))?;
                if request.iteration_id != *iteration_id {
                    return Err(StoreError::invalid(format!(
                        "request {id} does not belong to iteration {iteration_id}"
                    )));
                }
                if !status.is_resolved() {
                    return Err(StoreError::invalid("a request cannot return to New"));
                }
                if request.status.is_resolved() || pending.resolved.contains(id) {
                    return Err(StoreError::AlreadyResolved(*id));
                }
                Ok(())
            }
            Event::AllocationCreated {
                id,
                iteration_id,
                date,
                user_id,
                resource_id,
                source_request_id,
                ..
            } => {
                if self.allocations.contains_key(id) || pending.allocation_ids.contains(id) {
                    return Err(StoreError::AlreadyExists { kind: "allocation", id: *id });
                }
                let iteration = self
                    .iterations
                    .get(iteration_id)
                    .ok_or(StoreError::not_found("iteration", *iteration_id))?;
                if !iteration.contains(*date) {
                    return Err(StoreError::invalid(format!(
                        "date {date} not within bounds: {} - {}",
                        iteration.start_date, iteration.end_date
                    )));
                }
                if !self.resources.contains_key(resource_id) {
                    return Err(StoreError::not_found("resource", *resource_id));
                }
                let request = self
                    .requests
                    .get(source_request_id)
                    .ok_or(StoreError::not_found("request", *source_request_id))?;
                if request.iteration_id != *iteration_id
                    || request.user_id != *user_id
                    || request.date != *date
                {
                    return Err(StoreError::invalid(format!(
                        "allocation does not match its source request {source_request_id}"
                    )));
                }
                let slot = (*iteration_id, *date, *resource_id);
                if let Some(existing) = self.slots.get(&slot).or_else(|| pending.slots.get(&slot)) {
                    return Err(StoreError::AllocationConflict {
                        resource_id: *resource_id,
                        date: *date,
                        existing: *existing,
                    });
                }
                Ok(())
            }
            Event::IterationAllocated { id } => {
                if !self.iterations.contains_key(id) {
                    return Err(StoreError::not_found("iteration", *id));
                }
                Ok(())
            }
        }
    }

    fn check_top_group(&self, id: &Ulid) -> Result<(), StoreError> {
        let group = self
            .groups
            .get(id)
            .ok_or(StoreError::not_found("resource group", *id))?;
        if !group.is_top_level {
            return Err(StoreError::invalid(format!(
                "resource group {id} is not top-level"
            )));
        }
        Ok(())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a validated (or replayed) event.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::GroupCreated {
                id,
                name,
                is_top_level,
                top_group_id,
            } => {
                self.group_names.insert(name.clone(), *id);
                self.groups.insert(
                    *id,
                    ResourceGroup {
                        id: *id,
                        name: name.clone(),
                        is_top_level: *is_top_level,
                        top_group_id: if *is_top_level { Some(*id) } else { *top_group_id },
                    },
                );
            }
            Event::ResourceCreated {
                id,
                name,
                top_group_id,
                group_ids,
            } => {
                self.resource_names.insert(name.clone(), *id);
                self.resources.insert(
                    *id,
                    Resource {
                        id: *id,
                        name: name.clone(),
                        top_group_id: *top_group_id,
                        group_ids: group_ids.iter().copied().collect(),
                    },
                );
            }
            Event::ResourceAssigned {
                resource_id,
                group_id,
            } => {
                if let Some(r) = self.resources.get_mut(resource_id) {
                    r.group_ids.insert(*group_id);
                }
            }
            Event::IterationCreated {
                id,
                start_date,
                end_date,
            } => {
                self.iterations.insert(
                    *id,
                    Iteration {
                        id: *id,
                        start_date: *start_date,
                        end_date: *end_date,
                        is_allocated: false,
                    },
                );
            }
            Event::RequestSubmitted {
                id,
                iteration_id,
                user_id,
                date,
                target,
            } => {
                self.requests.insert(
                    *id,
                    Request {
                        id: *id,
                        iteration_id: *iteration_id,
                        user_id: *user_id,
                        date: *date,
                        target: *target,
                        status: RequestStatus::New,
                    },
                );
                self.requests_by_iteration
                    .entry(*iteration_id)
                    .or_default()
                    .insert(*id);
            }
            Event::RequestResolved { id, status, .. } => {
                if let Some(r) = self.requests.get_mut(id) {
                    r.status = *status;
                }
            }
            Event::AllocationCreated {
                id,
                iteration_id,
                date,
                user_id,
                resource_id,
                source_request_id,
                points,
            } => {
                self.slots.insert((*iteration_id, *date, *resource_id), *id);
                self.allocations_by_iteration
                    .entry(*iteration_id)
                    .or_default()
                    .insert(*id);
                self.allocations.insert(
                    *id,
                    Allocation {
                        id: *id,
                        iteration_id: *iteration_id,
                        date: *date,
                        user_id: *user_id,
                        resource_id: *resource_id,
                        source_request_id: *source_request_id,
                        points: *points,
                    },
                );
            }
            Event::IterationAllocated { id } => {
                if let Some(it) = self.iterations.get_mut(id) {
                    it.is_allocated = true;
                }
            }
        }
    }

    /// Minimal event list that recreates the current state, in dependency order.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let (tops, members): (Vec<_>, Vec<_>) =
            self.groups.values().partition(|g| g.is_top_level);
        for g in tops.into_iter().chain(members) {
            events.push(Event::GroupCreated {
                id: g.id,
                name: g.name.clone(),
                is_top_level: g.is_top_level,
                top_group_id: g.top_group_id,
            });
        }
        for r in self.resources.values() {
            events.push(Event::ResourceCreated {
                id: r.id,
                name: r.name.clone(),
                top_group_id: r.top_group_id,
                group_ids: r.group_ids.iter().copied().collect(),
            });
        }
        for it in self.iterations.values() {
            events.push(Event::IterationCreated {
                id: it.id,
                start_date: it.start_date,
                end_date: it.end_date,
            });
        }
        for req in self.requests.values() {
            events.push(Event::RequestSubmitted {
                id: req.id,
                iteration_id: req.iteration_id,
                user_id: req.user_id,
                date: req.date,
                target: req.target,
            });
            if req.status.is_resolved() {
                events.push(Event::RequestResolved {
                    id: req.id,
                    iteration_id: req.iteration_id,
                    status: req.status,
                });
            }
        }
        events.extend(self.allocations.values().map(Event::from));
        for it in self.iterations.values().filter(|it| it.is_allocated) {
            events.push(Event::IterationAllocated { id: it.id });
        }
        events
    }
}
