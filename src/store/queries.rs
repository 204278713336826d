use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

impl Store {
    pub async fn get_iteration(&self, id: Ulid) -> Result<IterationSnapshot, StoreError> {
        self.catalog
            .read()
            .await
            .iteration_snapshot(&id)
            .ok_or(StoreError::not_found("iteration", id))
    }

    pub async fn get_request(&self, id: Ulid) -> Result<Request, StoreError> {
        self.catalog
            .read()
            .await
            .request(&id)
            .cloned()
            .ok_or(StoreError::not_found("request", id))
    }

    pub async fn list_iterations(&self) -> Vec<Iteration> {
        self.catalog.read().await.iterations().cloned().collect()
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        self.catalog.read().await.resources().cloned().collect()
    }

    pub async fn list_resource_groups(&self) -> Vec<ResourceGroup> {
        self.catalog.read().await.groups().cloned().collect()
    }

    /// Allocations of an iteration ordered by date, then resource.
    pub async fn list_allocations(&self, iteration_id: Ulid) -> Result<Vec<Allocation>, StoreError> {
        let catalog = self.catalog.read().await;
        if catalog.iteration(&iteration_id).is_none() {
            return Err(StoreError::not_found("iteration", iteration_id));
        }
        let mut allocations: Vec<Allocation> = catalog.allocations_of(&iteration_id).cloned().collect();
        allocations.sort_by_key(|a| (a.date, a.resource_id));
        Ok(allocations)
    }
}
