use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day, the only time type. Allocations never span days.
pub type Day = NaiveDate;

/// Users are owned by an external directory; only their identity matters here.
pub type UserId = Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: Ulid,
    pub name: String,
    pub is_top_level: bool,
    /// Top-level ancestor. `None` only for top-level groups, which are their own top.
    pub top_group_id: Option<Ulid>,
}

impl ResourceGroup {
    /// The top-level group this group is scoped under.
    pub fn top_group(&self) -> Option<Ulid> {
        if self.is_top_level {
            Some(self.id)
        } else {
            self.top_group_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    /// Conflict scope: a user holds at most one resource per top group per day.
    pub top_group_id: Ulid,
    pub group_ids: BTreeSet<Ulid>,
}

impl Resource {
    pub fn shares_group_with(&self, other: &Resource) -> bool {
        !self.group_ids.is_disjoint(&other.group_ids)
    }

    pub fn is_member_of(&self, group_id: &Ulid) -> bool {
        self.group_ids.contains(group_id)
    }
}

/// Scheduling cycle over the inclusive range `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: Ulid,
    pub start_date: Day,
    pub end_date: Day,
    pub is_allocated: bool,
}

impl Iteration {
    pub fn contains(&self, day: Day) -> bool {
        self.start_date <= day && day <= self.end_date
    }

    /// Number of days covered, both ends included.
    pub fn len_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// What a request asks for: one exact resource, or any member of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestTarget {
    Resource(Ulid),
    Group(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    New,
    Completed,
    Declined,
}

impl RequestStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, RequestStatus::New)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Ulid,
    pub iteration_id: Ulid,
    pub user_id: UserId,
    pub date: Day,
    pub target: RequestTarget,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Ulid,
    pub iteration_id: Ulid,
    pub date: Day,
    pub user_id: UserId,
    pub resource_id: Ulid,
    pub source_request_id: Ulid,
    /// Score of the winning (request, resource) pair.
    pub points: u32,
}

/// Intake payload for a request. Status always starts at `New`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub id: Ulid,
    pub iteration_id: Ulid,
    pub user_id: UserId,
    pub date: Day,
    pub target: RequestTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAllocation {
    pub iteration_id: Ulid,
    pub date: Day,
    pub user_id: UserId,
    pub resource_id: Ulid,
    pub source_request_id: Ulid,
    pub points: u32,
}

/// Selects what an allocation run works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    pub iteration_id: Ulid,
    /// Restrict winners to this single (late) request.
    pub request_id: Option<Ulid>,
}

impl Criteria {
    pub fn iteration(iteration_id: Ulid) -> Self {
        Self {
            iteration_id,
            request_id: None,
        }
    }

    pub fn single_request(iteration_id: Ulid, request_id: Ulid) -> Self {
        Self {
            iteration_id,
            request_id: Some(request_id),
        }
    }
}

/// An iteration joined with everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationSnapshot {
    pub iteration: Iteration,
    pub requests: Vec<Request>,
    pub allocations: Vec<Allocation>,
}

/// The event types. Flat, no nesting. A WAL record is a batch of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GroupCreated {
        id: Ulid,
        name: String,
        is_top_level: bool,
        top_group_id: Option<Ulid>,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        top_group_id: Ulid,
        group_ids: Vec<Ulid>,
    },
    ResourceAssigned {
        resource_id: Ulid,
        group_id: Ulid,
    },
    IterationCreated {
        id: Ulid,
        start_date: Day,
        end_date: Day,
    },
    RequestSubmitted {
        id: Ulid,
        iteration_id: Ulid,
        user_id: UserId,
        date: Day,
        target: RequestTarget,
    },
    RequestResolved {
        id: Ulid,
        iteration_id: Ulid,
        status: RequestStatus,
    },
    AllocationCreated {
        id: Ulid,
        iteration_id: Ulid,
        date: Day,
        user_id: UserId,
        resource_id: Ulid,
        source_request_id: Ulid,
        points: u32,
    },
    IterationAllocated {
        id: Ulid,
    },
}

impl Event {
    /// Iteration an event belongs to, for notification routing.
    pub fn iteration_id(&self) -> Option<Ulid> {
        match self {
            Event::IterationCreated { id, .. } | Event::IterationAllocated { id } => Some(*id),
            Event::RequestSubmitted { iteration_id, .. }
            | Event::RequestResolved { iteration_id, .. }
            | Event::AllocationCreated { iteration_id, .. } => Some(*iteration_id),
            Event::GroupCreated { .. }
            | Event::ResourceCreated { .. }
            | Event::ResourceAssigned { .. } => None,
        }
    }
}

impl From<&Allocation> for Event {
    fn from(a: &Allocation) -> Self {
        Event::AllocationCreated {
            id: a.id,
            iteration_id: a.iteration_id,
            date: a.date,
            user_id: a.user_id,
            resource_id: a.resource_id,
            source_request_id: a.source_request_id,
            points: a.points,
        }
    }
}
