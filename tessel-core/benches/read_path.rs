use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;
use tessel_core::{codec, CacheKey, RequestContext, User, UserId, UserStatus};

fn sample_user() -> User {
    let now = Utc::now();
    User {
        id: UserId::new(42),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        age: 36,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

fn bench_codec(c: &mut Criterion) {
    let user = sample_user();
    let bytes = codec::encode(&user).expect("encode user");

    c.bench_function("codec/encode", |b| {
        b.iter(|| black_box(codec::encode(black_box(&user)).expect("encode")));
    });
    c.bench_function("codec/decode", |b| {
        b.iter(|| black_box(codec::decode(black_box(&bytes)).expect("decode")));
    });
    c.bench_function("cache_key/user", |b| {
        b.iter(|| black_box(CacheKey::user(black_box(user.id))));
    });
}

fn bench_context(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("build runtime");
    let ctx = RequestContext::background().with_timeout(Duration::from_secs(10));

    c.bench_function("context/detached", |b| {
        b.iter(|| black_box(ctx.detached(Duration::from_secs(5))));
    });
    c.bench_function("context/guard_ready", |b| {
        b.iter(|| runtime.block_on(ctx.guard(async { black_box(1u64) })));
    });
}

criterion_group!(benches, bench_codec, bench_context);
criterion_main!(benches);
