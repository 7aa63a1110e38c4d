//! Benchmarks for policy evaluation.
//!
//! The policy engine sits on the hot path of every mediated read; the
//! decision memo must make repeated evaluations effectively free.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rink_oms::{
    AccessLevel, ActorContext, PolicyEngine, PolicyRuleDef, Record, ScopeKind, SecurityPolicyDef,
};

fn wide_policy(rules: usize) -> SecurityPolicyDef {
    let mut all_rules = Vec::with_capacity(rules);
    for i in 0..rules {
        let mut rule = PolicyRuleDef::new(format!("role_{i}"), AccessLevel::Read);
        rule.priority = i as i32;
        rule.column_filters = vec!["salary".to_string(), "contract".to_string()];
        all_rules.push(rule);
    }
    let mut team_rule = PolicyRuleDef::new("coach", AccessLevel::Read);
    team_rule.scope = Some(ScopeKind::TeamScoped);
    team_rule.row_filter = Some("season = '2025-2026' AND ownerId = {user_id}".to_string());
    all_rules.push(team_rule);
    SecurityPolicyDef::global("bench_policy", all_rules)
}

fn bench_evaluate_access(c: &mut Criterion) {
    let policy = wide_policy(32);
    let coach = ActorContext::new("u-1", "coach").with_teams(vec!["MTL".into(), "TOR".into()]);

    let cold_engine = PolicyEngine::new();
    c.bench_function("evaluate_access_cold", |b| {
        b.iter(|| {
            cold_engine.clear_cache();
            black_box(cold_engine.evaluate_access(
                black_box(&coach),
                "read",
                "object",
                Some("P1"),
                Some(&policy),
            ))
        })
    });

    let warm_engine = PolicyEngine::new();
    warm_engine.evaluate_access(&coach, "read", "object", Some("P1"), Some(&policy));
    c.bench_function("evaluate_access_memoized", |b| {
        b.iter(|| {
            black_box(warm_engine.evaluate_access(
                black_box(&coach),
                "read",
                "object",
                Some("P1"),
                Some(&policy),
            ))
        })
    });
}

fn bench_column_filters(c: &mut Criterion) {
    let engine = PolicyEngine::new();
    let mut record = Record::new();
    for i in 0..40 {
        record = record.with(format!("field_{i}"), i);
    }
    let filters: Vec<String> = (0..10).map(|i| format!("field_{i}")).collect();

    c.bench_function("apply_column_filters_40_fields", |b| {
        b.iter(|| black_box(engine.apply_column_filters(black_box(&record), black_box(&filters))))
    });
}

criterion_group!(benches, bench_evaluate_access, bench_column_filters);
criterion_main!(benches);
