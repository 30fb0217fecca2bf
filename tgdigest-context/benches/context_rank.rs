use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tgdigest_context::ContextEngine;
use tgdigest_core::{ContextConfig, ConversationWindow, GroupId, Message, ReplyRef, TenantId, WindowId};

const PHRASES: [&str; 8] = [
    "the deploy to staging failed again on the migration step",
    "can someone review the billing refactor before lunch",
    "I pushed a fix for the flaky login test",
    "standup moved to 10:30 tomorrow",
    "the deploy to staging failed again on migration",
    "metrics dashboard shows p99 latency creeping up",
    "who owns the rollout checklist for friday",
    "thanks, looks good to me",
];

fn bench_window(n: usize) -> (ConversationWindow, Vec<Message>) {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    let window = ConversationWindow {
        window_id: WindowId::now_v7(),
        group_id: GroupId(1),
        tenant_id: TenantId::new("bench"),
        scopes: vec!["digest:deliver".to_string()],
        window_start: start,
        window_end: start + Duration::hours(12),
        message_count: n as u32,
        participant_count: 12,
    };
    let messages = (0..n)
        .map(|i| Message {
            id: i as i64,
            group_id: GroupId(1),
            tenant_id: TenantId::new("bench"),
            sender_username: Some(format!("member{}", i % 12)),
            sender_tg_id: (i % 12) as i64,
            posted_at: Some(start + Duration::minutes(i as i64)),
            content: format!("{} #{}", PHRASES[i % PHRASES.len()], i / PHRASES.len()),
            reply_to: (i % 5 == 0 && i > 0).then(|| ReplyRef {
                message_id: (i - 1) as i64,
            }),
            reaction_count: (i % 4) as u32,
            has_media: i % 9 == 0,
        })
        .collect();
    (window, messages)
}

fn bench_context_build(c: &mut Criterion) {
    let engine = ContextEngine::new(ContextConfig::default()).expect("build engine");
    let (window, messages) = bench_window(500);

    c.bench_function("context/build_500", |b| {
        b.iter(|| {
            let built = engine.build(&window, black_box(messages.clone()));
            black_box(built.stats.ranked_messages);
        });
    });
}

criterion_group!(benches, bench_context_build);
criterion_main!(benches);
