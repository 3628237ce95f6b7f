use std::sync::Arc;
use std::time::Duration;

use pane_sync::constants::STATE_KEY;
use pane_sync::render::HeadlessHost;
use pane_sync::store::PersistedState;
use pane_sync::{
    ContextOptions, Geometry, MemoryStore, PaneContext, PaneId, PaneRequest, Source, SyncConfig,
    SyncError,
};

async fn open_with(store: &Arc<MemoryStore>, config: SyncConfig) -> PaneContext {
    let (ctx, _) = PaneContext::open(
        ContextOptions::new("ctx-a", store.clone(), Arc::new(HeadlessHost::new()))
            .with_config(config),
    )
    .await
    .expect("opens");
    ctx
}

fn stored_minimized(store: &MemoryStore, id: &PaneId) -> Option<bool> {
    let (panes, _) = PersistedState::parse(store.peek(STATE_KEY).as_ref()).decode();
    panes.into_iter().find(|p| p.id == *id).map(|p| p.minimized)
}

#[tokio::test(start_paused = true)]
async fn duplicate_minimize_produces_one_write() {
    let store = Arc::new(MemoryStore::new());
    let ctx = open_with(&store, SyncConfig::default()).await;
    let pane = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 10, 10)))
        .await
        .expect("created");
    let before = store.write_count();

    let first = ctx.coordinator().minimize(&pane.id, Source::Ui);
    let second = ctx.coordinator().minimize(&pane.id, Source::Automation);
    assert_eq!(first.error, None);
    assert!(second.is_suppressed());
    // logical state is already visible before anything is written
    assert_eq!(stored_minimized(&store, &pane.id), Some(false));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.write_count() - before, 1);
    assert_eq!(stored_minimized(&store, &pane.id), Some(true));
}

#[tokio::test(start_paused = true)]
async fn rapid_changes_collapse_into_the_latest_state() {
    let store = Arc::new(MemoryStore::new());
    let ctx = open_with(&store, SyncConfig::default()).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 10, 10)))
        .await
        .expect("created")
        .id;
    let before = store.write_count();
    for x in 0..5 {
        ctx.update_geometry(&id, Geometry::new(x, x, 10, 10));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.write_count() - before, 1);
    let (panes, _) = PersistedState::parse(store.peek(STATE_KEY).as_ref()).decode();
    assert_eq!(panes[0].geometry, Geometry::new(4, 4, 10, 10));
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_after_consecutive_timeouts_and_recovers() {
    let store = Arc::new(MemoryStore::new());
    let config = SyncConfig {
        storage_timeout: Duration::from_millis(100),
        ..SyncConfig::default()
    };
    let ctx = open_with(&store, config).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 10, 10)))
        .await
        .expect("created")
        .id;
    let persistence = ctx.coordinator().persistence();

    store.set_latency(Duration::from_secs(1));
    for _ in 0..3 {
        assert_eq!(
            persistence
                .persist_now(ctx.coordinator().panes(), "manual")
                .await,
            Err(SyncError::StorageTimeout)
        );
    }
    assert!(!persistence.is_available());

    // memory and visuals keep working; persistence is skipped
    let writes = store.write_count();
    assert!(ctx.coordinator().minimize(&id, Source::Ui).success);
    let pane = ctx.coordinator().panes().get(&id).expect("present");
    assert!(pane.minimized);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.write_count(), writes);
    assert_eq!(stored_minimized(&store, &id), Some(false));

    store.set_latency(Duration::ZERO);
    persistence
        .persist_now(ctx.coordinator().panes(), "manual")
        .await
        .expect("store is back");
    assert!(persistence.is_available());
    assert_eq!(persistence.consecutive_timeouts(), 0);
    assert_eq!(stored_minimized(&store, &id), Some(true));
}

#[tokio::test(start_paused = true)]
async fn failed_write_does_not_count_as_timeout() {
    let store = Arc::new(MemoryStore::new());
    let ctx = open_with(&store, SyncConfig::default()).await;
    store.set_failing(true);
    for _ in 0..5 {
        let result = ctx
            .coordinator()
            .persistence()
            .persist_now(ctx.coordinator().panes(), "manual")
            .await;
        assert!(matches!(result, Err(SyncError::Storage(_))));
    }
    assert!(ctx.coordinator().persistence().is_available());
}
