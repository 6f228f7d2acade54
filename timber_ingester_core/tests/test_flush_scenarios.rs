use std::time::Duration;

use common::{create_ingester, entry, labels, tenant, test_options, ts, wait_for};

mod common;

#[tokio::test(start_paused = true)]
async fn test_idle_chunk_flushes() {
    let mut options = test_options();
    options.max_chunk_idle = Duration::from_secs(1);
    let (ingester, store, metrics) = create_ingester(options);

    ingester
        .push(&tenant(), labels("a"), &[entry(ts(0), "a log line")])
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    ingester.sweep_tenants(false, true);

    wait_for(|| store.chunks().len() == 1).await;

    let stored = &store.chunks()[0];
    assert_eq!(stored.tenant, tenant());
    assert_eq!(stored.labels.get("app"), Some("a"));
    assert_eq!(stored.labels.get("__name__"), Some("logs"));

    assert_eq!(
        metrics.counter("ingester_chunks_flushed_total", Some(("reason", "idle"))),
        1
    );

    let instance = ingester.get_instance_by_id(&tenant()).unwrap();
    let stream = instance
        .stream_by_fingerprint(labels("a").fingerprint())
        .unwrap();
    wait_for(|| stream.unflushed_chunk_count() == 0).await;
    assert_eq!(stream.chunk_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_spanning_max_age_flushes() {
    let mut options = test_options();
    options.max_chunk_age = Duration::from_secs(60 * 60);
    let (ingester, store, metrics) = create_ingester(options);

    // Entries spanning two hours in a single chunk.
    let entries: Vec<_> = (0..5)
        .map(|i| entry(ts(i * 30 * 60), "a log line"))
        .collect();
    ingester.push(&tenant(), labels("a"), &entries).unwrap();

    ingester.sweep_tenants(false, true);
    wait_for(|| store.chunks().len() == 1).await;

    let stored = &store.chunks()[0];
    assert_eq!(stored.through_ms - stored.from_ms, 2 * 60 * 60 * 1_000);

    assert_eq!(
        metrics.counter("ingester_chunks_flushed_total", Some(("reason", "max_age"))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_retries_failed_flush() {
    let (ingester, store, metrics) = create_ingester(test_options());

    ingester
        .push(&tenant(), labels("a"), &[entry(ts(0), "a log line")])
        .unwrap();

    store.fail_next_puts(1);
    ingester.flush().await;

    assert_eq!(store.chunks().len(), 1);
    assert_eq!(store.put_count(), 2);

    // The chunk was selected once per attempt.
    assert_eq!(
        metrics.counter("ingester_chunks_flushed_total", Some(("reason", "forced"))),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_chunk_flushes_after_cut() {
    let mut options = test_options();
    options.target_chunk_size = 64;
    let (ingester, store, metrics) = create_ingester(options);

    // Push enough to cut the first chunk and open a second one.
    for i in 0..8 {
        ingester
            .push(
                &tenant(),
                labels("a"),
                &[entry(ts(i), "0123456789abcdef0123456789abcdef")],
            )
            .unwrap();
    }

    let instance = ingester.get_instance_by_id(&tenant()).unwrap();
    let stream = instance
        .stream_by_fingerprint(labels("a").fingerprint())
        .unwrap();
    assert!(stream.chunk_count() > 1);

    ingester.sweep_tenants(false, true);
    wait_for(|| !store.chunks().is_empty()).await;

    assert!(
        metrics.counter("ingester_chunks_flushed_total", Some(("reason", "full"))) >= 1
    );
    // The open tail chunk stays in memory.
    assert!(stream.unflushed_chunk_count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_period_cut_flushes_as_synced() {
    let mut options = test_options();
    options.sync_period = Duration::from_secs(10);
    let (ingester, store, metrics) = create_ingester(options);

    ingester
        .push(
            &tenant(),
            labels("a"),
            &[entry(ts(1), "first window"), entry(ts(11), "second window")],
        )
        .unwrap();

    let instance = ingester.get_instance_by_id(&tenant()).unwrap();
    let stream = instance
        .stream_by_fingerprint(labels("a").fingerprint())
        .unwrap();
    assert_eq!(stream.chunk_count(), 2);

    ingester.sweep_tenants(false, true);
    wait_for(|| store.chunks().len() == 1).await;

    assert_eq!(
        metrics.counter("ingester_chunks_flushed_total", Some(("reason", "synced"))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_streams_of_multiple_tenants_flush_independently() {
    let mut options = test_options();
    options.max_chunk_idle = Duration::from_secs(1);
    let (ingester, store, metrics) = create_ingester(options);

    let other = timber_resources::TenantName::new_unchecked("globex");
    ingester
        .push(&tenant(), labels("a"), &[entry(ts(0), "acme line")])
        .unwrap();
    ingester
        .push(&other, labels("a"), &[entry(ts(0), "globex line")])
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    ingester.sweep_tenants(false, true);
    wait_for(|| store.chunks().len() == 2).await;

    assert_eq!(
        metrics.counter("ingester_chunks_stored_total", Some(("tenant", "acme"))),
        1
    );
    assert_eq!(
        metrics.counter("ingester_chunks_stored_total", Some(("tenant", "globex"))),
        1
    );
}
