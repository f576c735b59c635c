// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use docvault::config::settings::DatabaseSettings;
use docvault::domain::models::entity::{Contact, Entity, EntityStatus};
use docvault::domain::repositories::entity_repository::EntityRepository;
use docvault::infrastructure::database::connection::ConnectionRegistry;
use docvault::infrastructure::database::region::RegionRouter;
use docvault::infrastructure::database::store::{DocumentStore, FindOptions};
use docvault::infrastructure::repositories::entity_repo_impl::EntityRepositoryImpl;
use docvault::utils::context::RequestContext;
use serde_json::Map;

use super::helpers::repository_config;

async fn sqlite_registry() -> ConnectionRegistry {
    let settings = DatabaseSettings {
        url: Some("sqlite::memory:".to_string()),
        name: Some("core".to_string()),
        ..Default::default()
    };
    ConnectionRegistry::connect(&settings, RegionRouter::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn entity_repository_on_sqlite() {
    let registry = sqlite_registry().await;
    registry.ping().await.unwrap();
    let repo = EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap();
    let ctx = RequestContext::new().with_country("VN");

    let created = repo
        .create(
            &ctx,
            &Entity::new(Contact {
                phone_number: "0901234567".to_string(),
                email: Some("a@example.com".to_string()),
            }),
        )
        .await
        .unwrap();
    let id = created.id.clone().unwrap();

    // ciphertext in the table
    let store = registry.single_store().unwrap();
    let raw = store
        .find("entities", &Map::new(), &FindOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(raw.len(), 1);
    assert_ne!(raw[0]["contact"]["phone_number"], "0901234567");

    assert_eq!(repo.get(&ctx, &id).await.unwrap(), Some(created.clone()));
    assert_eq!(repo.find_by_phone(&ctx, "0901234567").await.unwrap().len(), 1);

    let updated = repo
        .update_status(&ctx, &id, EntityStatus::Accepted)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, EntityStatus::Accepted);
    assert_eq!(updated.contact, created.contact);
}

#[tokio::test]
async fn sqlite_transaction_rolls_back() {
    let registry = sqlite_registry().await;
    let repo = std::sync::Arc::new(
        EntityRepositoryImpl::new(&registry, repository_config(), None).unwrap(),
    );
    let ctx = RequestContext::new();

    let result: Result<(), _> = registry
        .exec_transaction(&ctx, |tx| {
            let repo = repo.clone();
            async move {
                repo.create(
                    &tx,
                    &Entity::new(Contact {
                        phone_number: "0901".to_string(),
                        email: None,
                    }),
                )
                .await?;
                anyhow::bail!("abort")
            }
        })
        .await;
    assert!(result.is_err());
    assert!(repo.find_by_phone(&ctx, "0901").await.unwrap().is_empty());
}
