use chrono::{Duration, Local, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};

use tempbox::model::message::Message;
use tempbox::search::{apply_filter, build_view, DateFilter, FilterSpec, PageCursors, StatusFilter};
use tempbox::store::derive_id;

fn mailbox(n: usize) -> Vec<Message> {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let at = base - Duration::minutes(i as i64 * 7);
            let from = format!("sender{}@example.com", i % 50);
            let subject = format!("Order #{i} shipped");
            let mut m = Message::new_unread(
                derive_id(&at, &from),
                "default",
                &from,
                Some(&subject),
                Some("Your package is on its way. Track it with the link below."),
                at,
            );
            m.is_read = i % 3 == 0;
            m
        })
        .collect()
}

fn bench_filter(c: &mut Criterion) {
    let messages = mailbox(5_000);
    let now = Local::now();
    let spec = FilterSpec {
        status: StatusFilter::Unread,
        date: DateFilter::Month,
        search: "shipped".into(),
        ..Default::default()
    };

    c.bench_function("filter_5000_unread_month_search", |b| {
        b.iter(|| apply_filter(&messages, &spec, now))
    });
}

fn bench_view(c: &mut Criterion) {
    let messages = mailbox(5_000);
    let now = Local::now();
    let spec = FilterSpec::default();

    c.bench_function("build_view_5000", |b| {
        b.iter(|| build_view(&messages, &spec, PageCursors::default(), 20, now))
    });
}

criterion_group!(benches, bench_filter, bench_view);
criterion_main!(benches);
