// tests/usage_gate.rs
//
// Quota-gate atomicity: N concurrent requests against a counter sitting at
// limit - 1 must yield exactly one increment, regardless of interleaving.

use std::sync::Arc;

use chrono::Utc;
use insight_pipeline::limits::tier::{current_period, UsageMetric};
use insight_pipeline::limits::UsageGate;
use insight_pipeline::store::{InMemoryStore, UsageStore, UserProfile};
use rand::Rng;

fn plus_user(id: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        tier: "plus".into(),
        tier_expires_at: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_of_many_concurrent_increments_wins_at_the_boundary() {
    let store = InMemoryStore::shared();
    let gate = UsageGate::new(store.clone());
    let user = plus_user("boundary-user");
    let period = current_period(Utc::now());

    // Plus tier translation limit is 20; park the counter at 19.
    for _ in 0..19 {
        assert!(store
            .increment_if_below(&user.id, &period, UsageMetric::Translations, 20)
            .await
            .unwrap());
    }

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let gate = gate.clone();
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            // Random jitter to scramble task ordering across workers.
            let jitter = rand::rng().random_range(0..500u64);
            tokio::time::sleep(std::time::Duration::from_micros(jitter)).await;
            gate.check_and_increment(&user, UsageMetric::Translations)
                .await
                .unwrap()
                .allowed
        }));
    }

    let mut allowed = 0usize;
    for t in tasks {
        if t.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 1, "only the single remaining unit may be granted");

    let count = store
        .current_count(&user.id, &period, UsageMetric::Translations)
        .await
        .unwrap();
    assert_eq!(count, 20, "counter must never exceed the tier limit");
}

#[tokio::test]
async fn counters_are_scoped_per_metric_and_user() {
    let store = InMemoryStore::shared();
    let gate = UsageGate::new(store.clone());
    let a = plus_user("user-a");
    let b = plus_user("user-b");

    for _ in 0..20 {
        assert!(gate
            .check_and_increment(&a, UsageMetric::Translations)
            .await
            .unwrap()
            .allowed);
    }
    assert!(!gate
        .check_and_increment(&a, UsageMetric::Translations)
        .await
        .unwrap()
        .allowed);

    // Exhausting translations burns nothing from analyses, nor from user B.
    assert!(gate
        .check_and_increment(&a, UsageMetric::Analyses)
        .await
        .unwrap()
        .allowed);
    assert!(gate
        .check_and_increment(&b, UsageMetric::Translations)
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn expired_pass_is_gated_at_the_free_limits() {
    let store = InMemoryStore::shared();
    let gate = UsageGate::new(store);
    let user = UserProfile {
        id: "expired".into(),
        tier: "pro".into(),
        tier_expires_at: Some(Utc::now() - chrono::Duration::days(3)),
    };

    let d = gate
        .check_and_increment(&user, UsageMetric::Translations)
        .await
        .unwrap();
    assert!(!d.allowed);
    assert_eq!(d.limit, 0);
}
