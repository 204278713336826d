use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

impl Store {
    pub async fn create_resource_group(
        &self,
        id: Ulid,
        name: String,
        is_top_level: bool,
        top_group_id: Option<Ulid>,
    ) -> Result<ResourceGroup, StoreError> {
        let mut catalog = self.catalog.write().await;
        let event = Event::GroupCreated {
            id,
            name,
            is_top_level,
            top_group_id,
        };
        self.persist_and_apply(&mut catalog, vec![event]).await?;
        catalog
            .group(&id)
            .cloned()
            .ok_or(StoreError::not_found("resource group", id))
    }

    pub async fn create_resource(
        &self,
        id: Ulid,
        name: String,
        top_group_id: Ulid,
        group_ids: Vec<Ulid>,
    ) -> Result<Resource, StoreError> {
        let mut catalog = self.catalog.write().await;
        let event = Event::ResourceCreated {
            id,
            name,
            top_group_id,
            group_ids,
        };
        self.persist_and_apply(&mut catalog, vec![event]).await?;
        catalog
            .resource(&id)
            .cloned()
            .ok_or(StoreError::not_found("resource", id))
    }

    pub async fn assign_resource_to_group(
        &self,
        resource_id: Ulid,
        group_id: Ulid,
    ) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write().await;
        let event = Event::ResourceAssigned {
            resource_id,
            group_id,
        };
        self.persist_and_apply(&mut catalog, vec![event]).await
    }

    pub async fn create_iteration(
        &self,
        id: Ulid,
        start_date: Day,
        end_date: Day,
    ) -> Result<Iteration, StoreError> {
        let mut catalog = self.catalog.write().await;
        let event = Event::IterationCreated {
            id,
            start_date,
            end_date,
        };
        self.persist_and_apply(&mut catalog, vec![event]).await?;
        catalog
            .iteration(&id)
            .cloned()
            .ok_or(StoreError::not_found("iteration", id))
    }

    /// Intake: validate and record a request in status `New`.
    pub async fn submit_request(&self, new: NewRequest) -> Result<Request, StoreError> {
        let mut catalog = self.catalog.write().await;
        let id = new.id;
        let event = Event::RequestSubmitted {
            id,
            iteration_id: new.iteration_id,
            user_id: new.user_id,
            date: new.date,
            target: new.target,
        };
        self.persist_and_apply(&mut catalog, vec![event]).await?;
        metrics::counter!(crate::observability::REQUESTS_SUBMITTED_TOTAL).increment(1);
        info!(request_id = %id, iteration_id = %new.iteration_id, date = %new.date, "request submitted");
        catalog
            .request(&id)
            .cloned()
            .ok_or(StoreError::not_found("request", id))
    }
}
