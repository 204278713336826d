use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{AllocationStore, AllocationTxn};
use crate::model::*;

use super::catalog::Pending;
use super::{Store, StoreError};

/// Staged writes of one allocation run.
///
/// Reads see the committed catalog with this transaction's own staged writes
/// laid over it. Writes are validated when staged and again at commit, against
/// whatever was committed in the meantime; commit is one WAL record.
pub struct StoreTxn<'a> {
    store: &'a Store,
    iteration_id: Ulid,
    staged: Vec<Event>,
    pending: Pending,
    finished: bool,
    _run_guard: OwnedMutexGuard<()>,
}

impl<'a> StoreTxn<'a> {
    pub(super) fn new(store: &'a Store, iteration_id: Ulid, run_guard: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            iteration_id,
            staged: Vec::new(),
            pending: Pending::default(),
            finished: false,
            _run_guard: run_guard,
        }
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    async fn stage(&mut self, event: Event) -> Result<(), StoreError> {
        self.store.catalog.read().await.check(&event, &self.pending)?;
        self.pending.record(&event);
        self.staged.push(event);
        Ok(())
    }

    fn overlay(&self, snapshot: &mut IterationSnapshot) {
        for event in &self.staged {
            match event {
                Event::RequestResolved { id, status, .. } => {
                    if let Some(r) = snapshot.requests.iter_mut().find(|r| r.id == *id) {
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
                } if *iteration_id == snapshot.iteration.id => {
                    snapshot.allocations.push(Allocation {
                        id: *id,
                        iteration_id: *iteration_id,
                        date: *date,
                        user_id: *user_id,
                        resource_id: *resource_id,
                        source_request_id: *source_request_id,
                        points: *points,
                    });
                }
                Event::IterationAllocated { id } if *id == snapshot.iteration.id => {
                    snapshot.iteration.is_allocated = true;
                }
                _ => {}
            }
        }
    }
}

impl Drop for StoreTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            warn!(
                iteration_id = %self.iteration_id,
                staged = self.staged.len(),
                "transaction rolled back"
            );
            metrics::counter!(crate::observability::TXN_ABORTS_TOTAL).increment(1);
        }
    }
}

#[async_trait]
impl AllocationTxn for StoreTxn<'_> {
    async fn get_iteration(&mut self, id: Ulid) -> Result<IterationSnapshot, StoreError> {
        let mut snapshot = self.store.get_iteration(id).await?;
        self.overlay(&mut snapshot);
        Ok(snapshot)
    }

    async fn get_all_resources(&mut self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.store.list_resources().await)
    }

    async fn get_all_resource_groups(&mut self) -> Result<Vec<ResourceGroup>, StoreError> {
        Ok(self.store.list_resource_groups().await)
    }

    async fn get_request(&mut self, id: Ulid) -> Result<Request, StoreError> {
        let mut request = self.store.get_request(id).await?;
        if self.pending.resolved.contains(&id) {
            for event in &self.staged {
                if let Event::RequestResolved { id: rid, status, .. } = event
                    && *rid == id
                {
                    request.status = *status;
                }
            }
        }
        Ok(request)
    }

    async fn create_allocation(&mut self, new: NewAllocation) -> Result<Allocation, StoreError> {
        let allocation = Allocation {
            id: Ulid::new(),
            iteration_id: new.iteration_id,
            date: new.date,
            user_id: new.user_id,
            resource_id: new.resource_id,
            source_request_id: new.source_request_id,
            points: new.points,
        };
        self.stage(Event::from(&allocation)).await?;
        Ok(allocation)
    }

    async fn update_request_status(&mut self, id: Ulid, status: RequestStatus) -> Result<(), StoreError> {
        let iteration_id = self.store.get_request(id).await?.iteration_id;
        self.stage(Event::RequestResolved {
            id,
            iteration_id,
            status,
        })
        .await
    }

    async fn mark_iteration_allocated(&mut self, id: Ulid) -> Result<(), StoreError> {
        self.stage(Event::IterationAllocated { id }).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::invalid("transaction already finished"));
        }
        if self.staged.is_empty() {
            self.finished = true;
            return Ok(());
        }
        let batch = std::mem::take(&mut self.staged);
        let count = batch.len();
        let mut catalog = self.store.catalog.write().await;
        if let Err(e) = self.store.persist_and_apply(&mut catalog, batch).await {
            self.finished = true;
            metrics::counter!(crate::observability::TXN_ABORTS_TOTAL).increment(1);
            warn!(iteration_id = %self.iteration_id, error = %e, "commit rejected");
            return Err(e);
        }
        self.finished = true;
        debug!(iteration_id = %self.iteration_id, events = count, "transaction committed");
        Ok(())
    }
}

#[async_trait]
impl AllocationStore for Store {
    async fn begin<'a>(&'a self, iteration_id: Ulid) -> Result<Box<dyn AllocationTxn + 'a>, StoreError> {
        Ok(Box::new(Store::begin(self, iteration_id).await))
    }

    async fn get_iteration(&self, id: Ulid) -> Result<IterationSnapshot, StoreError> {
        Store::get_iteration(self, id).await
    }

    async fn submit_request(&self, new: NewRequest) -> Result<Request, StoreError> {
        Store::submit_request(self, new).await
    }
}
