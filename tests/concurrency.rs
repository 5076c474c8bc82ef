mod helpers;

use arbiter::authz::types::{Effect, PolicyStatus, SubjectType};
use arbiter::errors::ArbiterError;
use arbiter::storage::{bindings, policies, rules};
use helpers::{PolicyBuilder, TestDb};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activate_exactly_one_wins() {
    let test_db = TestDb::new().await;
    let db = test_db.connection().clone();
    let policy = PolicyBuilder::new(1).allow("users", "read").create(&db).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        let id = policy.id.clone();
        handles.push(tokio::spawn(
            async move { policies::activate(&db, &id).await },
        ));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(p) => {
                assert_eq!(p.status, PolicyStatus::Active);
                wins += 1;
            }
            Err(ArbiterError::InvalidState { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_rule_racing_activation_is_included_or_rejected() {
    let test_db = TestDb::new().await;
    let db = test_db.connection().clone();

    for round in 0..5 {
        let policy = PolicyBuilder::new(100 + round).create(&db).await;

        let adder = {
            let db = db.clone();
            let id = policy.id.clone();
            tokio::spawn(async move {
                rules::add_rule(&db, &id, Effect::Allow, "users", "read", None).await
            })
        };
        let activator = {
            let db = db.clone();
            let id = policy.id.clone();
            tokio::spawn(async move { policies::activate(&db, &id).await })
        };

        let added = adder.await.expect("task panicked");
        activator
            .await
            .expect("task panicked")
            .expect("activation must succeed");

        let listed = rules::list_rules(&db, &policy.id).await.unwrap();
        let stored = policies::get(&db, &policy.id).await.unwrap();
        match added {
            Ok(rule) => {
                assert_eq!(listed.len(), 1);
                assert_eq!(listed[0].id, rule.id);
                assert_eq!(stored.allow_count, 1);
            }
            Err(ArbiterError::ImmutablePolicy { .. }) => {
                assert!(listed.is_empty());
                assert_eq!(stored.allow_count, 0);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rule_adds_keep_counts_consistent() {
    let test_db = TestDb::new().await;
    let db = test_db.connection().clone();
    let policy = PolicyBuilder::new(1).create(&db).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        let id = policy.id.clone();
        let effect = if i % 2 == 0 { Effect::Allow } else { Effect::Deny };
        handles.push(tokio::spawn(async move {
            rules::add_rule(&db, &id, effect, "users", &format!("action-{i}"), None).await
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked").expect("add_rule failed");
    }

    let stored = policies::get(&db, &policy.id).await.unwrap();
    assert_eq!(stored.allow_count, 4);
    assert_eq!(stored.deny_count, 4);

    let listed = rules::list_rules(&db, &policy.id).await.unwrap();
    assert_eq!(listed.len(), 8);
    let mut seqs: Vec<i64> = listed.iter().map(|r| r.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 8, "every rule gets its own sequence number");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_binding() {
    let test_db = TestDb::new().await;
    let db = test_db.connection().clone();
    let policy = PolicyBuilder::new(1).active().create(&db).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        let id = policy.id.clone();
        handles.push(tokio::spawn(async move {
            bindings::bind(&db, &id, SubjectType::Role, "staff").await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => created += 1,
            Err(ArbiterError::DuplicateBinding { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(
        bindings::list_bindings_for_policy(&db, &policy.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_same_number() {
    let test_db = TestDb::new().await;
    let db = test_db.connection().clone();

    let mut handles = Vec::new();
    for i in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            policies::create_draft(&db, 7, &format!("Contender {i}"), None).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => created += 1,
            Err(ArbiterError::DuplicateNumber(7)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
}
