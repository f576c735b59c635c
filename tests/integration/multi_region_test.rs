// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::sync::Arc;

use docvault::domain::models::entity::{Contact, Entity, EntityStatus};
use docvault::domain::repositories::entity_repository::EntityRepository;
use docvault::infrastructure::database::connection::{ConfigurationError, ConnectionRegistry};
use docvault::infrastructure::database::memory_store::MemoryDocumentStore;
use docvault::infrastructure::database::repository::RepositoryError;
use docvault::infrastructure::database::store::{DocumentStore, FindOptions, StoreError};
use docvault::infrastructure::repositories::entity_repo_impl::EntityRepositoryImpl;
use docvault::utils::context::RequestContext;
use serde_json::Map;

use super::helpers::{repository_config, sharded_registry, test_router};

fn entity(phone: &str) -> Entity {
    Entity::new(Contact {
        phone_number: phone.to_string(),
        email: None,
    })
}

async fn count(store: &MemoryDocumentStore) -> u64 {
    store
        .count("entities", &Map::new(), &FindOptions::default(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn writes_land_in_the_caller_region() {
    let (vn, sea, registry) = sharded_registry();
    let repo = EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap();

    let vn_ctx = RequestContext::new().with_country("VN");
    let th_ctx = RequestContext::new().with_country("TH");
    let sg_ctx = RequestContext::new().with_country("SG");

    let created = repo.create(&vn_ctx, &entity("0901")).await.unwrap();
    repo.create(&th_ctx, &entity("0902")).await.unwrap();
    repo.create(&sg_ctx, &entity("0903")).await.unwrap();

    assert_eq!(count(&vn).await, 1);
    assert_eq!(count(&sea).await, 2);

    // TH and SG share the SEA region, VN data is invisible there
    let id = created.id.unwrap();
    assert!(repo.get(&th_ctx, &id).await.unwrap().is_none());
    assert!(repo.get(&vn_ctx, &id).await.unwrap().is_some());
    assert_eq!(repo.find_by_phone(&sg_ctx, "0902").await.unwrap().len(), 1);
}

#[tokio::test]
async fn region_errors_are_returned_verbatim() {
    let (_vn, _sea, registry) = sharded_registry();
    let repo = EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap();

    let err = repo.get(&RequestContext::new(), "x").await.unwrap_err();
    assert!(matches!(err, RepositoryError::MissingRegion));

    let err = repo
        .update_status(&RequestContext::new().with_country("US"), "x", EntityStatus::Blocked)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::RegionNotFound(country) if country == "US"));
}

#[tokio::test]
async fn missing_region_connection_fails_construction() {
    let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
    stores.insert(
        "VN::core_test".to_string(),
        Arc::new(MemoryDocumentStore::new("VN::core_test")),
    );
    let registry = ConnectionRegistry::multi(stores, test_router());

    let err = EntityRepositoryImpl::new(&registry, repository_config(), None)
        .err()
        .unwrap();
    assert!(matches!(err, ConfigurationError::MissingConnection(name) if name == "SEA::core_test"));
}

#[tokio::test]
async fn transaction_commits_or_rolls_back_entity_writes() {
    let store = Arc::new(MemoryDocumentStore::new("core"));
    let registry = ConnectionRegistry::single(store.clone());
    let repo = Arc::new(EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap());
    let ctx = RequestContext::new();

    let rolled_back: Result<(), _> = registry
        .exec_transaction(&ctx, |tx| {
            let repo = repo.clone();
            async move {
                repo.create(&tx, &entity("0901")).await?;
                anyhow::bail!("abort")
            }
        })
        .await;
    assert!(rolled_back.is_err());
    assert_eq!(count(&store).await, 0);

    let committed = registry
        .exec_transaction(&ctx, |tx| {
            let repo = repo.clone();
            async move {
                let created = repo.create(&tx, &entity("0902")).await?;
                Ok::<_, anyhow::Error>(created.id)
            }
        })
        .await
        .unwrap();
    assert!(committed.is_some());
    assert_eq!(count(&store).await, 1);
}

#[tokio::test]
async fn multi_region_session_runs_in_caller_region() {
    let (vn, sea, registry) = sharded_registry();
    let repo = Arc::new(EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap());
    let session = registry.session_multi_conn(&["core_test"]).unwrap();
    assert_eq!(session.regions(), vec!["SEA", "VN"]);

    let th_ctx = RequestContext::new().with_country("TH");
    let rolled_back: Result<(), _> = session
        .exec_transaction(&th_ctx, |tx| {
            let repo = repo.clone();
            async move {
                repo.create(&tx, &entity("0901")).await?;
                anyhow::bail!("abort")
            }
        })
        .await;
    assert!(rolled_back.is_err());
    assert_eq!(count(&sea).await, 0);

    session
        .exec_transaction(&th_ctx, |tx| {
            let repo = repo.clone();
            async move {
                repo.create(&tx, &entity("0902")).await?;
                Ok::<_, anyhow::Error>(())
            }
        })
        .await
        .unwrap();
    assert_eq!(count(&sea).await, 1);
    assert_eq!(count(&vn).await, 0);
}

#[tokio::test]
async fn transaction_on_another_database_rejects_repository_writes() {
    let vn = Arc::new(MemoryDocumentStore::new("VN::core_test"));
    let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
    stores.insert("VN::core_test".to_string(), vn.clone());
    stores.insert(
        "SEA::core_test".to_string(),
        Arc::new(MemoryDocumentStore::new("SEA::core_test")),
    );
    stores.insert(
        "VN::ledger".to_string(),
        Arc::new(MemoryDocumentStore::new("VN::ledger")),
    );
    let registry = ConnectionRegistry::multi(stores, test_router());
    let repo = Arc::new(EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap());

    let session = registry.session_multi_conn(&["ledger"]).unwrap();
    let vn_ctx = RequestContext::new().with_country("VN");
    let result: Result<(), _> = session
        .exec_transaction(&vn_ctx, |tx| {
            let repo = repo.clone();
            async move {
                let err = repo.create(&tx, &entity("0901")).await.unwrap_err();
                assert!(matches!(err, RepositoryError::Store(StoreError::Session(_))));
                anyhow::bail!("abort")
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(count(&vn).await, 0);
}
