use std::collections::BTreeSet;

use wayfinder_core::models::{DuplicatePair, Service};
use wayfinder_core::testutil::{MockAdapter, raw_service};
use wayfinder_core::{AdapterRegistry, JobSpec, PipelineConfig, PipelineManager, ServiceStore};
use wayfinder_db::Database;

use crate::integration::common::{setup_repo, setup_test_db};

fn service(external_id: &str, name: &str, suburb: &str) -> Service {
    let mut service = Service::new("council", external_id, name);
    service.organization.name = "Logan City Council".into();
    service.location.suburb = Some(suburb.into());
    service.location.state = Some("QLD".into());
    service.categories.insert("Community".into());
    service.data_source.set_quality_score(0.6);
    service
}

#[tokio::test]
async fn upsert_inserts_then_updates_by_id() {
    let (repo, _container) = setup_repo().await;

    let mut pantry = service("17", "Valley Food Pantry", "Fortitude Valley");
    assert_eq!(repo.upsert(&[pantry.clone()]).await.unwrap(), 1);

    let first = repo.get(pantry.id).await.unwrap().expect("stored");
    assert_eq!(first.service, pantry);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    pantry.description = Some("Weekly hampers, no referral needed".into());
    pantry.data_source.set_quality_score(0.9);
    assert_eq!(repo.upsert(&[pantry.clone()]).await.unwrap(), 1);

    let second = repo.get(pantry.id).await.unwrap().expect("stored");
    assert_eq!(second.service.description, pantry.description);
    assert_eq!(second.service.quality_score(), 0.9);
    assert_eq!(second.first_seen_at, first.first_seen_at);
    assert!(second.updated_at > first.updated_at);
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn get_unknown_id_returns_none() {
    let (repo, _container) = setup_repo().await;

    let missing = repo.get(uuid::Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn find_collisions_ignores_case_and_spacing() {
    let (repo, _container) = setup_repo().await;

    repo.upsert(&[
        service("1", "Youth Drop-in Centre", "Logan Central"),
        service("2", "Youth Drop-in Centre", "Beenleigh"),
        service("3", "Legal Clinic", "Logan Central"),
    ])
    .await
    .unwrap();

    let hits = repo
        .find_collisions("  youth drop-in   CENTRE", "logan central")
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].service.external_id, "1");
}

#[tokio::test]
async fn duplicate_pairs_stored_once_per_unordered_pair() {
    let (repo, _container) = setup_repo().await;

    let a = service("1", "Brisbane Youth Legal Service", "Brisbane");
    let b = service("2", "Brisbane Youth Legal Svc", "Brisbane");
    let pair = DuplicatePair {
        service_a: a.id,
        service_b: b.id,
        confidence: 0.86,
        matched_fields: BTreeSet::from(["name".to_string(), "organization".to_string()]),
    };
    let reversed = DuplicatePair {
        service_a: b.id,
        service_b: a.id,
        confidence: 0.91,
        ..pair.clone()
    };

    repo.save_pairs(&[pair]).await.unwrap();
    repo.save_pairs(&[reversed]).await.unwrap();

    let pairs = repo.pairs_for(a.id).await.unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].confidence, 0.91);
    assert!(pairs[0].matched_fields.contains("organization"));
    assert_eq!(repo.pairs_for(b.id).await.unwrap(), pairs);
}

#[tokio::test]
async fn empty_batches_are_noops() {
    let (repo, _container) = setup_repo().await;

    assert_eq!(repo.upsert_services(&[]).await.unwrap(), 0);
    assert_eq!(repo.save_duplicate_pairs(&[]).await.unwrap(), 0);
    repo.health_check().await.unwrap();
}

#[tokio::test]
async fn pipeline_persists_through_repository() {
    let (pool, _container) = setup_test_db().await;
    let repo = Database::from_pool(pool).service_repo();

    let adapter = MockAdapter::new(
        "council",
        vec![
            raw_service("1", "Valley Food Pantry", "St Vincent de Paul", "Brisbane", "QLD"),
            raw_service("2", "Legal Advice Night", "Caxton Legal", "West End", "QLD"),
            raw_service("3", "", "Nameless Org", "Brisbane", "QLD"),
        ],
    );
    let manager = PipelineManager::new(
        PipelineConfig::default(),
        AdapterRegistry::new().with(adapter),
        repo.clone(),
    )
    .unwrap();

    let spec = JobSpec::new("council", 10).with_store_results(true);
    let output = manager.create_job(spec).unwrap().wait().await.unwrap();

    assert_eq!(output.result.services_stored, 2);
    assert_eq!(repo.count().await.unwrap(), 2);

    let hits = repo.find_collisions("Valley Food Pantry", "brisbane").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].service.organization.name, "St Vincent de Paul");

    manager.cleanup().await;
}

#[tokio::test]
async fn embedded_migrations_apply_over_existing_schema() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    db.migrate().await.unwrap();
    db.migrate().await.unwrap();
    db.service_repo().health_check().await.unwrap();
}
