use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

/// Data access the allocation engine depends on.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Open the transactional scope of one allocation run.
    async fn begin<'a>(&'a self, iteration_id: Ulid) -> Result<Box<dyn AllocationTxn + 'a>, StoreError>;

    async fn get_iteration(&self, id: Ulid) -> Result<IterationSnapshot, StoreError>;

    async fn submit_request(&self, new: NewRequest) -> Result<Request, StoreError>;
}

/// One allocation run's view of the store. Writes stay staged until `commit`;
/// dropping the transaction without committing discards them.
#[async_trait]
pub trait AllocationTxn: Send {
    async fn get_iteration(&mut self, id: Ulid) -> Result<IterationSnapshot, StoreError>;

    async fn get_all_resources(&mut self) -> Result<Vec<Resource>, StoreError>;

    async fn get_all_resource_groups(&mut self) -> Result<Vec<ResourceGroup>, StoreError>;

    async fn get_request(&mut self, id: Ulid) -> Result<Request, StoreError>;

    /// Fails with `StoreError::AllocationConflict` if (iteration, date, resource) is taken.
    async fn create_allocation(&mut self, new: NewAllocation) -> Result<Allocation, StoreError>;

    async fn update_request_status(&mut self, id: Ulid, status: RequestStatus) -> Result<(), StoreError>;

    async fn mark_iteration_allocated(&mut self, id: Ulid) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
