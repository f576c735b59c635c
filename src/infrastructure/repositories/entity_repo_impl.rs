// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::domain::models::entity::{Contact, Entity, EntityStatus};
use crate::domain::repositories::entity_repository::EntityRepository;
use crate::infrastructure::crypto::{FieldTag, SensitiveFields};
use crate::infrastructure::database::connection::{ConfigurationError, ConnectionRegistry};
use crate::infrastructure::database::index_audit::IndexAuditor;
use crate::infrastructure::database::repository::{
    Model, Repository, RepositoryConfig, RepositoryError,
};
use crate::infrastructure::database::store::{IndexModel, ReturnDocument};
use crate::utils::context::RequestContext;

impl SensitiveFields for Contact {
    fn sensitive_fields() -> Vec<FieldTag> {
        vec![FieldTag::leaf("phone_number"), FieldTag::leaf("email")]
    }
}

impl Model for Entity {
    const COLLECTION: &'static str = "entities";

    fn index_models() -> Vec<IndexModel> {
        vec![
            IndexModel::new(&[("status", 1), ("created_at", -1)]),
            IndexModel::new(&[("contact.phone_number", 1)]),
        ]
    }

    fn encrypted_fields() -> Vec<FieldTag> {
        vec![FieldTag::nested_from::<Contact>("contact")]
    }
}

/// 实体仓库实现
#[derive(Clone)]
pub struct EntityRepositoryImpl {
    repo: Repository<Entity>,
}

impl EntityRepositoryImpl {
    pub fn new(
        registry: &ConnectionRegistry,
        config: RepositoryConfig,
        auditor: Option<IndexAuditor>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            repo: Repository::new(registry, config, auditor)?,
        })
    }

    pub fn repository(&self) -> &Repository<Entity> {
        &self.repo
    }
}

#[async_trait]
impl EntityRepository for EntityRepositoryImpl {
    async fn create(&self, ctx: &RequestContext, entity: &Entity) -> Result<Entity, RepositoryError> {
        self.repo
            .query()
            .metric("entity_create")
            .create_one(ctx, entity)
            .await
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<Entity>, RepositoryError> {
        self.repo.find_by_id(ctx, id).await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: EntityStatus,
    ) -> Result<Option<Entity>, RepositoryError> {
        let update = json!({
            "$set": {
                "status": status.to_string(),
                "updated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            }
        });
        self.repo
            .query()
            .filter(("_id", Value::String(id.to_string())))
            .return_document(ReturnDocument::After)
            .metric("entity_update_status")
            .find_one_and_update(ctx, &update)
            .await
    }

    async fn find_by_phone(
        &self,
        ctx: &RequestContext,
        phone_number: &str,
    ) -> Result<Vec<Entity>, RepositoryError> {
        self.repo
            .query()
            .filter(("contact.phone_number", Value::String(phone_number.to_string())))
            .sort("created_at", -1)
            .find_many(ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::memory_store::MemoryDocumentStore;
    use crate::infrastructure::database::store::DocumentStore;
    use serde_json::Map;
    use std::sync::Arc;

    const KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    fn setup() -> (Arc<MemoryDocumentStore>, EntityRepositoryImpl) {
        let store = Arc::new(MemoryDocumentStore::new("core"));
        let registry = ConnectionRegistry::single(store.clone());
        let config = RepositoryConfig {
            environment: "TEST".to_string(),
            encrypt_key: KEY.to_string(),
            measure_latency: false,
        };
        (store, EntityRepositoryImpl::new(&registry, config, None).unwrap())
    }

    fn ctx() -> RequestContext {
        RequestContext::new().with_country("VN")
    }

    fn contact(phone: &str) -> Contact {
        Contact {
            phone_number: phone.to_string(),
            email: Some("a@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_contact_is_encrypted_at_rest() {
        let (store, repo) = setup();
        let created = repo.create(&ctx(), &Entity::new(contact("0901234567"))).await.unwrap();
        assert_eq!(created.contact.phone_number, "0901234567");
        assert!(created.created_at.is_some());

        let raw = store
            .find(Entity::COLLECTION, &Map::new(), &Default::default(), None)
            .await
            .unwrap();
        assert_eq!(raw.len(), 1);
        let stored_phone = raw[0]["contact"]["phone_number"].as_str().unwrap();
        assert_ne!(stored_phone, "0901234567");
        assert_eq!(raw[0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_find_by_phone_matches_encrypted_value() {
        let (_store, repo) = setup();
        repo.create(&ctx(), &Entity::new(contact("0901234567"))).await.unwrap();
        repo.create(&ctx(), &Entity::new(contact("0907654321"))).await.unwrap();

        let found = repo.find_by_phone(&ctx(), "0907654321").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contact.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_update_status_returns_new_document() {
        let (_store, repo) = setup();
        let created = repo.create(&ctx(), &Entity::new(contact("0901234567"))).await.unwrap();
        let id = created.id.clone().unwrap();

        let updated = repo
            .update_status(&ctx(), &id, EntityStatus::Blocked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, EntityStatus::Blocked);
        assert_eq!(updated.contact, created.contact);
        assert!(updated.updated_at >= created.updated_at);

        let missing = repo
            .update_status(&ctx(), "does-not-exist", EntityStatus::Accepted)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_declared_indexes_are_created() {
        let (store, repo) = setup();
        repo.repository().ensure_indexes().await.unwrap();
        let names: Vec<String> = store
            .list_indexes(Entity::COLLECTION, None)
            .await
            .unwrap()
            .iter()
            .map(IndexModel::resolved_name)
            .collect();
        assert!(names.iter().any(|n| n == "status_1_created_at_-1"));
        assert!(names.iter().any(|n| n == "contact.phone_number_1"));
    }
}
