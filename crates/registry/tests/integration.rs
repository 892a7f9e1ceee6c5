use registry::{
    ModelDescriptor, ProviderDescriptor, ProtocolKind, Registry, RegistrySettings, RollingStats,
};

fn model(name: &str, priority: i32) -> ModelDescriptor {
    ModelDescriptor {
        name: name.into(),
        memory_cost_mb: 100,
        priority,
        embeddings: false,
        loaded: false,
        stats: RollingStats::default(),
    }
}

fn provider(name: &str, creds: bool) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.into(),
        endpoint: format!("https://{name}.example"),
        has_credentials: creds,
        embeddings: false,
        healthy: true,
        stats: RollingStats::default(),
    }
}

fn names(ps: &[ProviderDescriptor]) -> Vec<&str> {
    ps.iter().map(|p| p.name.as_str()).collect()
}

/// Small deterministic generator so the op sequences are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[tokio::test]
async fn test_capacity_invariant_under_random_sequences() {
    for seed in 0..20u64 {
        let max = (seed % 4) as usize;
        let reg = Registry::new(
            (0..6).map(|i| model(&format!("m{i}"), i)).collect(),
            Vec::new(),
            RegistrySettings { max_concurrent_models: max, ema_weight: 0.3 },
        );
        let mut rng = Lcg(seed);

        for _ in 0..200 {
            let name = format!("m{}", rng.next() % 6);
            match rng.next() % 5 {
                0 | 1 => {
                    let _ = reg.mark_loaded(&name).await;
                }
                2 => {
                    let _ = reg.load_evicting(&name).await;
                }
                3 => {
                    let _ = reg.mark_unloaded(&name).await;
                }
                _ => {
                    let resident: Vec<String> =
                        (0..6).filter(|_| rng.next() % 2 == 0).map(|i| format!("m{i}")).collect();
                    reg.reconcile_loaded(&resident).await;
                }
            }
            let loaded = reg.loaded_count().await;
            assert!(loaded <= max, "seed {seed}: {loaded} loaded with cap {max}");
        }
    }
}

#[tokio::test]
async fn test_credential_gating() {
    let reg = Registry::new(
        Vec::new(),
        vec![provider("keyless", false), provider("keyed", true)],
        RegistrySettings::default(),
    );
    // make the keyless one look great; it must still never come back
    for _ in 0..5 {
        reg.record_attempt("keyless", true, 0.01).await.unwrap();
    }
    let ordered = reg.ordered_providers().await;
    assert_eq!(names(&ordered), vec!["keyed"]);
    assert_eq!(names(&reg.ordered_providers_for(ProtocolKind::ChatCompletion).await), vec!["keyed"]);
}

#[tokio::test]
async fn test_ordering_by_score() {
    let reg = Registry::new(
        Vec::new(),
        vec![provider("slow", true), provider("fast", true), provider("mid", true)],
        RegistrySettings { max_concurrent_models: 1, ema_weight: 1.0 },
    );
    // with weight 1.0 the score is exactly 1 / latency
    reg.record_attempt("fast", true, 1.0 / 0.9).await.unwrap();
    reg.record_attempt("mid", true, 2.0).await.unwrap();
    reg.record_attempt("slow", true, 5.0).await.unwrap();

    let ordered = reg.ordered_providers().await;
    assert_eq!(names(&ordered), vec!["fast", "mid", "slow"]);
    assert!((ordered[0].score() - 0.9).abs() < 1e-9);
    assert!((ordered[1].score() - 0.5).abs() < 1e-9);
    assert!((ordered[2].score() - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_ordering_reacts_to_failures() {
    let reg = Registry::new(
        Vec::new(),
        vec![provider("a", true), provider("b", true)],
        RegistrySettings::default(),
    );
    assert_eq!(names(&reg.ordered_providers().await), vec!["a", "b"]);

    reg.record_attempt("a", false, 0.5).await.unwrap();
    assert_eq!(names(&reg.ordered_providers().await), vec!["b", "a"]);

    // a recovers after a few good calls
    for _ in 0..5 {
        reg.record_attempt("a", true, 0.2).await.unwrap();
    }
    assert_eq!(names(&reg.ordered_providers().await), vec!["a", "b"]);
}

#[tokio::test]
async fn test_ties_broken_by_most_recent_success() {
    let reg = Registry::new(
        Vec::new(),
        vec![provider("first", true), provider("second", true)],
        RegistrySettings { max_concurrent_models: 1, ema_weight: 1.0 },
    );
    reg.record_attempt("first", true, 1.0).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    reg.record_attempt("second", true, 1.0).await.unwrap();

    assert_eq!(names(&reg.ordered_providers().await), vec!["second", "first"]);
}

#[tokio::test]
async fn test_unhealthy_providers_sort_last() {
    let reg = Registry::new(
        Vec::new(),
        vec![provider("a", true), provider("b", true)],
        RegistrySettings::default(),
    );
    reg.set_provider_health("a", false).await.unwrap();
    assert_eq!(names(&reg.ordered_providers().await), vec!["b", "a"]);
    assert!(reg.set_provider_health("zzz", true).await.is_err());
}

#[tokio::test]
async fn test_view_reports_scores() {
    let reg = Registry::new(
        vec![model("m", 1)],
        vec![provider("p", false)],
        RegistrySettings::default(),
    );
    let view = reg.view().await;
    assert_eq!(view.models.len(), 1);
    assert_eq!(view.providers[0].score, 1.0);
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["providers"][0]["name"], "p");
    assert_eq!(json["providers"][0]["has_credentials"], false);
}
