use rstest::{fixture, rstest};
use uuid::Uuid;

use crate::api::models::users::Role;
use crate::db::errors::DbError;
use crate::db::models::{
    pages::PageUpsertDBRequest,
    referrals::{ReferralCreateDBRequest, ReferralStatus},
    settings::ActivationSettings,
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::db::store::{InMemoryStore, Store, constraints};

#[cfg(feature = "postgres")]
use crate::db::store::PostgresStore;

fn user_request(username: &str) -> UserCreateDBRequest {
    UserCreateDBRequest {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        display_name: None,
        password_hash: None,
        role: Role::Pending,
    }
}

async fn create_user<S: Store>(store: &S, username: &str) -> UserDBResponse {
    store.create_user(&user_request(username)).await.unwrap()
}

async fn record<S: Store>(store: &S, user: &UserDBResponse, code: &str, referrer: Option<&UserDBResponse>) {
    store
        .insert_referral(&ReferralCreateDBRequest {
            user_id: user.id,
            referral_code: code.to_string(),
            referrer_id: referrer.map(|r| r.id),
        })
        .await
        .unwrap();
}

#[fixture]
fn in_memory_store() -> InMemoryStore {
    InMemoryStore::new()
}

async fn run_test_create_user_enforces_unique_username_and_email<S: Store>(store: &S) {
    create_user(store, "alice").await;

    let err = store.create_user(&user_request("alice")).await.unwrap_err();
    assert!(err.is_unique_violation_on(constraints::USERS_USERNAME));

    let mut same_email = user_request("alice2");
    same_email.email = "alice@example.com".to_string();
    let err = store.create_user(&same_email).await.unwrap_err();
    assert!(err.is_unique_violation_on(constraints::USERS_EMAIL));

    let found = store.get_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(found.email, "alice@example.com");
    assert!(store.get_user_by_email("nobody@example.com").await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_create_user_enforces_unique_username_and_email(in_memory_store: InMemoryStore) {
    run_test_create_user_enforces_unique_username_and_email(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_create_user_enforces_unique_username_and_email_postgres(pool: sqlx::PgPool) {
    run_test_create_user_enforces_unique_username_and_email(&PostgresStore::new(pool)).await;
}

async fn run_test_referral_count_is_derived_from_confirmed_records<S: Store>(store: &S) {
    let referrer = create_user(store, "referrer").await;
    record(store, &referrer, "referrer-00000001", None).await;
    assert_eq!(store.referral_count(referrer.id).await.unwrap(), 0);

    for i in 0..3 {
        let referred = create_user(store, &format!("referred{i}")).await;
        record(store, &referred, &format!("referred{i}-0000000{i}"), Some(&referrer)).await;
    }

    let unrelated = create_user(store, "unrelated").await;
    record(store, &unrelated, "unrelated-00000009", None).await;

    assert_eq!(store.referral_count(referrer.id).await.unwrap(), 3);
    assert_eq!(store.referral_count(unrelated.id).await.unwrap(), 0);

    let own = store.get_referral(referrer.id).await.unwrap().unwrap();
    assert_eq!(own.status, ReferralStatus::Pending);
    assert_eq!(own.referrer_id, None);

    let referred = store.get_user_by_username("referred0").await.unwrap().unwrap();
    let edge = store.get_referral(referred.id).await.unwrap().unwrap();
    assert_eq!(edge.status, ReferralStatus::Confirmed);
    assert_eq!(edge.referrer_id, Some(referrer.id));

    assert_eq!(store.list_referrals().await.unwrap().len(), 5);
}

#[rstest]
#[tokio::test]
async fn test_referral_count_is_derived_from_confirmed_records(in_memory_store: InMemoryStore) {
    run_test_referral_count_is_derived_from_confirmed_records(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_referral_count_is_derived_from_confirmed_records_postgres(pool: sqlx::PgPool) {
    run_test_referral_count_is_derived_from_confirmed_records(&PostgresStore::new(pool)).await;
}

async fn run_test_referral_codes_are_unique<S: Store>(store: &S) {
    let first = create_user(store, "first").await;
    let second = create_user(store, "second").await;
    record(store, &first, "shared-code", None).await;

    assert!(store.referral_code_exists("shared-code").await.unwrap());
    assert!(!store.referral_code_exists("SHARED-CODE").await.unwrap());

    let err = store
        .insert_referral(&ReferralCreateDBRequest {
            user_id: second.id,
            referral_code: "shared-code".to_string(),
            referrer_id: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_unique_violation_on(constraints::REFERRALS_CODE));

    // A user owns at most one record, so a replayed attribution can't count twice
    let err = store
        .insert_referral(&ReferralCreateDBRequest {
            user_id: first.id,
            referral_code: "another-code".to_string(),
            referrer_id: Some(second.id),
        })
        .await
        .unwrap_err();
    assert!(err.is_unique_violation_on(constraints::REFERRALS_USER));
    assert_eq!(store.referral_count(second.id).await.unwrap(), 0);
}

#[rstest]
#[tokio::test]
async fn test_referral_codes_are_unique(in_memory_store: InMemoryStore) {
    run_test_referral_codes_are_unique(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_referral_codes_are_unique_postgres(pool: sqlx::PgPool) {
    run_test_referral_codes_are_unique(&PostgresStore::new(pool)).await;
}

async fn run_test_find_user_by_referral_code_is_exact<S: Store>(store: &S) {
    let owner = create_user(store, "owner").await;
    record(store, &owner, "owner-abcdef12", None).await;

    assert_eq!(store.find_user_by_referral_code("owner-abcdef12").await.unwrap(), Some(owner.id));
    assert_eq!(store.find_user_by_referral_code("owner-abcdef12").await.unwrap(), Some(owner.id));
    assert_eq!(store.find_user_by_referral_code("owner-abcdef1").await.unwrap(), None);
    assert_eq!(store.find_user_by_referral_code(" owner-abcdef12").await.unwrap(), None);
    assert_eq!(store.find_user_by_referral_code("").await.unwrap(), None);
}

#[rstest]
#[tokio::test]
async fn test_find_user_by_referral_code_is_exact(in_memory_store: InMemoryStore) {
    run_test_find_user_by_referral_code_is_exact(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_find_user_by_referral_code_is_exact_postgres(pool: sqlx::PgPool) {
    run_test_find_user_by_referral_code_is_exact(&PostgresStore::new(pool)).await;
}

async fn run_test_self_referral_is_rejected<S: Store>(store: &S) {
    let user = create_user(store, "narcissus").await;
    let err = store
        .insert_referral(&ReferralCreateDBRequest {
            user_id: user.id,
            referral_code: "narcissus-1".to_string(),
            referrer_id: Some(user.id),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::CheckViolation { .. }));
}

#[rstest]
#[tokio::test]
async fn test_self_referral_is_rejected(in_memory_store: InMemoryStore) {
    run_test_self_referral_is_rejected(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_self_referral_is_rejected_postgres(pool: sqlx::PgPool) {
    run_test_self_referral_is_rejected(&PostgresStore::new(pool)).await;
}

async fn run_test_transition_role_is_compare_and_set<S: Store>(store: &S) {
    let user = create_user(store, "candidate").await;

    assert!(store.transition_role(user.id, Role::Pending, Role::Active).await.unwrap());
    // Second attempt observes the role already moved
    assert!(!store.transition_role(user.id, Role::Pending, Role::Active).await.unwrap());
    assert!(!store.transition_role(Uuid::new_v4(), Role::Pending, Role::Active).await.unwrap());

    let user = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(user.role, Role::Active);

    let user = store.set_role(user.id, Role::Pending).await.unwrap();
    assert_eq!(user.role, Role::Pending);

    let err = store.set_role(Uuid::new_v4(), Role::Active).await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[rstest]
#[tokio::test]
async fn test_transition_role_is_compare_and_set(in_memory_store: InMemoryStore) {
    run_test_transition_role_is_compare_and_set(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_transition_role_is_compare_and_set_postgres(pool: sqlx::PgPool) {
    run_test_transition_role_is_compare_and_set(&PostgresStore::new(pool)).await;
}

async fn run_test_concurrent_transitions_flip_once<S: Store + Clone + 'static>(store: S) {
    let user_id = create_user(&store, "contended").await.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.transition_role(user_id, Role::Pending, Role::Active).await.unwrap()
        }));
    }

    let mut flipped = 0;
    for handle in handles {
        if handle.await.unwrap() {
            flipped += 1;
        }
    }
    assert_eq!(flipped, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_flip_once(in_memory_store: InMemoryStore) {
    run_test_concurrent_transitions_flip_once(in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_concurrent_transitions_flip_once_postgres(pool: sqlx::PgPool) {
    run_test_concurrent_transitions_flip_once(PostgresStore::new(pool)).await;
}

async fn run_test_settings_roundtrip<S: Store>(store: &S) {
    assert!(store.load_settings().await.unwrap().is_none());

    let settings = ActivationSettings {
        threshold: 5,
        auto_activation: true,
        email_subject: "Welcome".to_string(),
        email_body: "You're in".to_string(),
    };
    store.save_settings(&settings).await.unwrap();
    assert_eq!(store.load_settings().await.unwrap(), Some(settings.clone()));

    let lowered = ActivationSettings { threshold: 1, ..settings };
    store.save_settings(&lowered).await.unwrap();
    assert_eq!(store.load_settings().await.unwrap().unwrap().threshold, 1);

    let invalid = ActivationSettings { threshold: 0, ..lowered };
    assert!(matches!(store.save_settings(&invalid).await.unwrap_err(), DbError::CheckViolation { .. }));
}

#[rstest]
#[tokio::test]
async fn test_settings_roundtrip(in_memory_store: InMemoryStore) {
    run_test_settings_roundtrip(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_settings_roundtrip_postgres(pool: sqlx::PgPool) {
    run_test_settings_roundtrip(&PostgresStore::new(pool)).await;
}

async fn run_test_pages<S: Store>(store: &S) {
    let page = PageUpsertDBRequest {
        slug: "pending-account".to_string(),
        title: "Pending".to_string(),
        body: "Hold tight".to_string(),
    };
    assert!(store.create_page_if_missing(&page).await.unwrap());
    assert!(!store.create_page_if_missing(&page).await.unwrap());

    let replaced = store
        .upsert_page(&PageUpsertDBRequest {
            body: "Updated".to_string(),
            ..page.clone()
        })
        .await
        .unwrap();
    assert_eq!(replaced.body, "Updated");

    // Seeding never overwrites an edited page
    assert!(!store.create_page_if_missing(&page).await.unwrap());
    assert_eq!(store.get_page("pending-account").await.unwrap().unwrap().body, "Updated");
    assert!(store.get_page("missing").await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_pages(in_memory_store: InMemoryStore) {
    run_test_pages(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_pages_postgres(pool: sqlx::PgPool) {
    run_test_pages(&PostgresStore::new(pool)).await;
}

async fn run_test_purge_referral_data<S: Store>(store: &S) {
    let referrer = create_user(store, "referrer").await;
    let referred = create_user(store, "referred").await;
    record(store, &referrer, "referrer-1", None).await;
    record(store, &referred, "referred-1", Some(&referrer)).await;
    store
        .save_settings(&ActivationSettings {
            threshold: 2,
            auto_activation: true,
            email_subject: "s".to_string(),
            email_body: "b".to_string(),
        })
        .await
        .unwrap();
    for slug in ["pending-account", "about"] {
        store
            .upsert_page(&PageUpsertDBRequest {
                slug: slug.to_string(),
                title: slug.to_string(),
                body: "content".to_string(),
            })
            .await
            .unwrap();
    }

    store.purge_referral_data("pending-account").await.unwrap();

    assert!(store.list_referrals().await.unwrap().is_empty());
    assert!(store.load_settings().await.unwrap().is_none());
    assert!(store.get_page("pending-account").await.unwrap().is_none());
    // Operator content survives
    assert_eq!(store.get_page("about").await.unwrap().unwrap().body, "content");
    assert_eq!(store.referral_count(referrer.id).await.unwrap(), 0);
    let users = store.list_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.role == Role::Active));
}

#[rstest]
#[tokio::test]
async fn test_purge_referral_data(in_memory_store: InMemoryStore) {
    run_test_purge_referral_data(&in_memory_store).await;
}

#[cfg(feature = "postgres")]
#[sqlx::test]
async fn test_purge_referral_data_postgres(pool: sqlx::PgPool) {
    run_test_purge_referral_data(&PostgresStore::new(pool)).await;
}
