//! Cache tiers, deduplication, cancellation and failure reporting.

mod common;

use common::{
    config, fake_registry, loader, recorder, request, wait_until, Behavior, Blob, Outcome, TIMEOUT,
};
use pictor_cache::DiskCacheStrategy;
use pictor_common::DataSource;
use pictor_engine::{Config, EngineError};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn test_concurrent_requests_share_one_decode() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let (registry, counters) = fake_registry(Behavior { gate: Some(gate_rx), ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (first, first_rx) = recorder();
    let (second, second_rx) = recorder();
    handle.load(request("a"), first);
    handle.load(request("a"), second);
    assert_eq!(handle.snapshot().unwrap().jobs.len(), 1);

    gate_tx.send(()).unwrap();
    let (a, source_a) = first_rx.recv_timeout(TIMEOUT).unwrap().ready();
    let (b, source_b) = second_rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert!(a.same_instance(&b));
    assert_eq!(source_a, DataSource::Local);
    assert_eq!(source_b, DataSource::Local);
    assert_eq!(counters.fetches(), 1);
    assert_eq!(counters.decodes(), 1);

    let snapshot = handle.snapshot().unwrap();
    assert_eq!(a.acquired(), 2);
    assert!(snapshot.jobs.is_empty());
    assert_eq!(snapshot.active, vec![a.key().clone()]);

    let key = a.key().clone();
    handle.release(a);
    assert_eq!(handle.snapshot().unwrap().memory, Vec::new());
    handle.release(b);
    let snapshot = handle.snapshot().unwrap();
    assert!(snapshot.active.is_empty());
    assert_eq!(snapshot.memory, vec![key]);
}

#[test]
fn test_active_resource_is_served_without_decoding() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback.clone());
    let (first, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    handle.load(request("a"), callback);
    let (second, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();

    assert_eq!(source, DataSource::MemoryCache);
    assert!(first.same_instance(&second));
    assert_eq!(counters.decodes(), 1);
}

#[test]
fn test_memory_cache_hit_moves_resource_back_to_active() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback.clone());
    let (first, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    let (key, id) = (first.key().clone(), first.id());
    handle.release(first);
    let snapshot = handle.snapshot().unwrap();
    assert_eq!((snapshot.active.len(), snapshot.memory.len()), (0, 1));

    handle.load(request("a"), callback);
    let (second, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert_eq!(source, DataSource::MemoryCache);
    assert_eq!(second.id(), id);
    assert_eq!(counters.decodes(), 1);

    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.active, vec![key]);
    assert!(snapshot.memory.is_empty());
    assert_eq!(snapshot.memory_stats.hit_count, 1);
}

#[test]
fn test_different_sizes_are_different_keys() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback.clone());
    handle.load(request("a").size(50, 50), callback);
    let (first, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    let (second, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert!(!first.same_instance(&second));
    assert_eq!(counters.decodes(), 2);
}

#[test]
fn test_skipping_memory_cache_decodes_every_time_and_recycles_on_release() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    for _ in 0..2 {
        handle.load(request("a").skip_memory_cache(true), callback.clone());
        let (resource, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
        assert_eq!(source, DataSource::Local);
        assert!(!resource.is_cacheable());
        handle.release(resource);
    }

    let snapshot = handle.snapshot().unwrap();
    assert!(snapshot.active.is_empty());
    assert!(snapshot.memory.is_empty());
    assert_eq!(counters.decodes(), 2);
    assert_eq!(counters.recycled(), 2);
}

#[test]
fn test_evicted_resources_are_recycled_exactly_once() {
    let (registry, counters) = fake_registry(Behavior { size: 60, ..Behavior::default() });
    let config = Config::builder().disk_cache_enabled(false).memory_cache_size(100).build().unwrap();
    let loader = loader(registry, config);
    let handle = loader.handle();

    let (callback, rx) = recorder();
    for url in ["a", "b"] {
        handle.load(request(url), callback.clone());
        let (resource, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
        handle.release(resource);
    }
    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.memory.len(), 1);
    assert_eq!(snapshot.memory_stats.eviction_count, 1);
    assert_eq!(counters.recycled(), 1);

    handle.clear_memory();
    assert!(handle.snapshot().unwrap().memory.is_empty());
    assert_eq!(counters.recycled(), 2);
}

#[test]
fn test_cancelling_the_only_consumer_cancels_the_job() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let (registry, counters) = fake_registry(Behavior { gate: Some(gate_rx), ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    let load = handle.load(request("a"), callback);
    assert!(wait_until(|| counters.fetches() == 1));
    load.cancel();
    assert!(handle.snapshot().unwrap().jobs.is_empty());
    assert!(wait_until(|| counters.cancels() == 1));

    gate_tx.send(()).unwrap();
    assert!(wait_until(|| counters.recycled() == 1), "late result is recycled");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    let snapshot = handle.snapshot().unwrap();
    assert!(snapshot.active.is_empty());
    assert!(snapshot.memory.is_empty());
}

#[test]
fn test_cancelling_one_consumer_keeps_the_job_for_the_other() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let (registry, counters) = fake_registry(Behavior { gate: Some(gate_rx), ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (cancelled, cancelled_rx) = recorder();
    let (kept, kept_rx) = recorder();
    let load = handle.load(request("a"), cancelled);
    handle.load(request("a"), kept);
    assert!(wait_until(|| counters.fetches() == 1));
    load.cancel();
    assert_eq!(handle.snapshot().unwrap().jobs.len(), 1);

    gate_tx.send(()).unwrap();
    let (resource, _) = kept_rx.recv_timeout(TIMEOUT).unwrap().ready();
    handle.snapshot().unwrap();
    assert_eq!(resource.acquired(), 1);
    assert!(cancelled_rx.try_recv().is_err());
    assert_eq!(counters.cancels(), 0);
}

#[test]
fn test_a_new_load_after_cancel_starts_a_new_job() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let (registry, counters) = fake_registry(Behavior { gate: Some(gate_rx), ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    let load = handle.load(request("a"), callback.clone());
    assert!(wait_until(|| counters.fetches() == 1));
    load.cancel();
    handle.load(request("a"), callback);
    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();

    let (resource, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert_eq!(source, DataSource::Local);
    handle.snapshot().unwrap();
    assert_eq!(resource.acquired(), 1);
    assert_eq!(counters.fetches(), 2);
}

#[test]
fn test_fetch_failure_reports_retryable_aggregate() {
    let (registry, counters) = fake_registry(Behavior { fail_fetch: true, ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (first, first_rx) = recorder();
    let (second, second_rx) = recorder();
    handle.load(request("a"), first);
    handle.load(request("a"), second);
    let error = first_rx.recv_timeout(TIMEOUT).unwrap().failed();
    second_rx.recv_timeout(TIMEOUT).unwrap().failed();

    assert!(matches!(error, EngineError::LoadFailed { .. }));
    let roots = error.root_causes();
    assert!(!roots.is_empty());
    assert!(roots.iter().all(|cause| matches!(cause, EngineError::Fetch(_))));
    assert!(error.is_retryable());
    assert_eq!(counters.decodes(), 0);
    assert!(handle.snapshot().unwrap().jobs.is_empty());
}

#[test]
fn test_decode_failure_is_fatal() {
    let (registry, _) = fake_registry(Behavior { fail_decode: true, ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback);
    let error = rx.recv_timeout(TIMEOUT).unwrap().failed();
    assert!(error.root_causes().iter().any(|cause| matches!(cause, EngineError::Decode { .. })));
    assert!(error.is_fatal());
}

#[test]
fn test_panicking_decoder_still_reports_failure() {
    let (registry, _) = fake_registry(Behavior { panic_decode: true, ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback);
    let error = rx.recv_timeout(TIMEOUT).unwrap().failed();
    assert!(error.root_causes().iter().any(|cause| cause.to_string().contains("decoder exploded")));
    assert!(handle.snapshot().unwrap().jobs.is_empty());
}

#[test]
fn test_missing_required_transformation_fails() {
    let (registry, _) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a").transformation_required(true), callback);
    let error = rx.recv_timeout(TIMEOUT).unwrap().failed();
    assert!(error
        .root_causes()
        .iter()
        .any(|cause| matches!(cause, EngineError::Transformation(_))));
}

#[test]
fn test_cache_only_request_never_fetches() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a").only_retrieve_from_cache(true), callback);
    rx.recv_timeout(TIMEOUT).unwrap().failed();
    assert_eq!(counters.fetches(), 0);
}

#[test]
fn test_forgotten_release_is_reclaimed_into_memory_cache() {
    let (registry, counters) = fake_registry(Behavior::default());
    let config = Config::builder()
        .disk_cache_enabled(false)
        .retention_allowed(true)
        .sweep_interval_ms(20)
        .build()
        .unwrap();
    let loader = loader(registry, config);
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback.clone());
    let (resource, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    let key = resource.key().clone();
    drop(resource);

    assert!(wait_until(|| handle.snapshot().unwrap().memory == vec![key.clone()]));
    assert!(handle.snapshot().unwrap().active.is_empty());

    handle.load(request("a"), callback);
    let (again, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert_eq!(source, DataSource::MemoryCache);
    assert!(!again.is_recyclable());
    assert_eq!(counters.decodes(), 1);
}

#[test]
fn test_forgotten_release_without_retention_leaves_active_table() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback);
    let (resource, _) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    drop(resource);

    assert!(wait_until(|| handle.snapshot().unwrap().active.is_empty()));
    assert!(handle.snapshot().unwrap().memory.is_empty());
    assert_eq!(counters.recycled(), 0);
}

#[test]
fn test_shutdown_fails_pending_loads() {
    let (gate_tx, gate_rx) = flume::unbounded();
    let (registry, counters) = fake_registry(Behavior { gate: Some(gate_rx), ..Behavior::default() });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    handle.load(request("a"), callback.clone());
    assert!(wait_until(|| counters.fetches() == 1));
    handle.shutdown();
    let error = rx.recv_timeout(TIMEOUT).unwrap().failed();
    assert!(matches!(error, EngineError::Shutdown));

    drop(gate_tx);
    loader.shutdown();
    handle.load(request("b"), callback);
    assert!(matches!(rx.recv_timeout(TIMEOUT).unwrap().failed(), EngineError::Shutdown));
}

#[tokio::test]
async fn test_load_async_resolves_and_reuses_memory_cache() {
    let (registry, counters) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let first = handle.load_async(request("a")).await.unwrap();
    assert_eq!(first.data_source, DataSource::Local);
    assert_eq!(first.resource.downcast::<common::Blob>().unwrap().name, "a");
    handle.release(first.resource);

    let second = handle.load_async(request("a")).await.unwrap();
    assert_eq!(second.data_source, DataSource::MemoryCache);
    assert_eq!(counters.decodes(), 1);
    handle.release(second.resource);
}

#[tokio::test]
async fn test_load_async_reports_failure() {
    let (registry, _) = fake_registry(Behavior { fail_decode: true, ..Behavior::default() });
    let loader = loader(registry, config());
    let result = loader.handle().load_async(request("a")).await;
    assert!(matches!(result, Err(EngineError::LoadFailed { .. })));
}

#[test]
fn test_fetcher_is_cleaned_up_once_for_every_outcome() {
    let cases = [
        ("success", Behavior::default(), true),
        ("failure", Behavior { fail_fetch: true, ..Behavior::default() }, false),
        ("no data", Behavior { no_data: true, ..Behavior::default() }, false),
    ];
    for (name, behavior, succeeds) in cases {
        let (registry, counters) = fake_registry(behavior);
        let loader = loader(registry, config());
        let handle = loader.handle();

        let (callback, rx) = recorder();
        handle.load(request("a"), callback);
        match rx.recv_timeout(TIMEOUT).unwrap() {
            Outcome::Ready(resource, _) => {
                assert!(succeeds, "{name} should fail");
                handle.release(resource);
            }
            Outcome::Failed(error) => {
                assert!(!succeeds, "{name} should succeed: {error:?}");
            }
        }
        assert!(wait_until(|| counters.cleanups() == 1), "{name}");
        handle.snapshot().unwrap();
        assert_eq!(counters.cleanups(), 1, "{name} cleaned up more than once");
    }
}

#[test]
fn test_cancelled_fetch_is_cleaned_up_when_it_reports() {
    let (registry, counters) = fake_registry(Behavior {
        report_after: Some(Duration::from_millis(300)),
        ..Behavior::default()
    });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    let load = handle.load(request("a").disk_cache_strategy(DiskCacheStrategy::None), callback);
    assert!(wait_until(|| counters.fetches() == 1));
    load.cancel();
    assert!(wait_until(|| counters.cancels() == 1));

    assert!(wait_until(|| counters.cleanups() == 1));
    assert_eq!(counters.decodes(), 0);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(counters.cleanups(), 1);
}

#[test]
fn test_fetch_reported_from_another_thread_is_decoded() {
    for strategy in [DiskCacheStrategy::None, DiskCacheStrategy::Automatic] {
        let (registry, counters) = fake_registry(Behavior {
            report_after: Some(Duration::from_millis(50)),
            data_source: DataSource::Remote,
            ..Behavior::default()
        });
        let loader = loader(registry, config());
        let handle = loader.handle();

        let (callback, rx) = recorder();
        handle.load(request("a").disk_cache_strategy(strategy), callback);
        let (resource, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
        assert_eq!(source, DataSource::Remote, "{strategy:?}");
        assert_eq!(resource.downcast::<Blob>().unwrap().name, "a", "{strategy:?}");
        assert_eq!(counters.fetches(), 1, "{strategy:?}");
        assert_eq!(counters.decodes(), 1, "{strategy:?}");
        assert_eq!(counters.cleanups(), 1, "{strategy:?}");
        handle.release(resource);
    }
}

#[test]
fn test_cancel_while_a_threaded_fetch_is_in_flight() {
    let (registry, counters) = fake_registry(Behavior {
        report_after: Some(Duration::from_millis(300)),
        data_source: DataSource::Remote,
        ..Behavior::default()
    });
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (cancelled, cancelled_rx) = recorder();
    let load = handle.load(request("a"), cancelled);
    assert!(wait_until(|| counters.fetches() == 1));
    load.cancel();
    assert!(handle.snapshot().unwrap().jobs.is_empty());
    assert!(wait_until(|| counters.cleanups() == 1), "late outcome is discarded");
    assert_eq!(counters.decodes(), 0);
    assert!(cancelled_rx.try_recv().is_err());

    let (callback, rx) = recorder();
    handle.load(request("a"), callback);
    let (resource, source) = rx.recv_timeout(TIMEOUT).unwrap().ready();
    assert_eq!(source, DataSource::Remote);
    assert_eq!(counters.fetches(), 2);
    assert_eq!(counters.cleanups(), 2);
    handle.release(resource);
    assert!(cancelled_rx.try_recv().is_err());
}

#[test]
fn test_loads_racing_shutdown_are_all_answered() {
    let (registry, _) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let (callback, rx) = recorder();
    let senders: Vec<_> = (0..4)
        .map(|thread| {
            let handle = handle.clone();
            let callback = callback.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    handle.load(request(&format!("{thread}-{i}")), callback.clone());
                }
            })
        })
        .collect();
    handle.shutdown();
    for sender in senders {
        sender.join().unwrap();
    }

    for _ in 0..200 {
        match rx.recv_timeout(TIMEOUT).unwrap() {
            Outcome::Ready(..) => {}
            Outcome::Failed(error) => assert!(matches!(error, EngineError::Shutdown), "{error:?}"),
        }
    }
    loader.shutdown();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err(), "every load is answered once");
}

#[tokio::test]
async fn test_snapshot_async_reports_each_tier() {
    let (registry, _) = fake_registry(Behavior::default());
    let loader = loader(registry, config());
    let handle = loader.handle();

    let loaded = handle.load_async(request("a")).await.unwrap();
    let key = loaded.resource.key().clone();
    assert_eq!(handle.snapshot_async().await.unwrap().active, vec![key.clone()]);

    handle.release(loaded.resource);
    let snapshot = handle.snapshot_async().await.unwrap();
    assert!(snapshot.active.is_empty());
    assert_eq!(snapshot.memory, vec![key]);

    loader.shutdown();
    assert!(matches!(handle.snapshot_async().await, Err(EngineError::Shutdown)));
}
