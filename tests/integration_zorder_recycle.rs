use std::sync::Arc;
use std::time::Duration;

use pane_sync::constants::{STATE_KEY, Z_COUNTER_KEY};
use pane_sync::render::HeadlessHost;
use pane_sync::store::PersistedState;
use pane_sync::{
    ContextId, ContextOptions, Geometry, MemoryStore, Pane, PaneContext, PaneId, Source, Store,
    SyncConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn pane(id: &str) -> Pane {
    Pane::new(
        PaneId::from(id),
        format!("https://{id}.test"),
        Geometry::new(0, 0, 100, 100),
    )
    .with_owner(ContextId::from("ctx-a"))
}

#[tokio::test(start_paused = true)]
async fn twelve_thousand_focus_calls_recycle_once_and_keep_order() {
    let store = Arc::new(MemoryStore::new());
    let seeded = PersistedState::from_panes(&[pane("a"), pane("b"), pane("c")], "seed");
    store.set(STATE_KEY, seeded.to_value()).await.expect("seed");
    store.set(Z_COUNTER_KEY, json!(0)).await.expect("seed");

    let config = SyncConfig {
        focus_debounce: Duration::ZERO,
        ..SyncConfig::default()
    };
    let (ctx, report) = PaneContext::open(
        ContextOptions::new("ctx-a", store.clone(), Arc::new(HeadlessHost::new()))
            .with_config(config),
    )
    .await
    .expect("opens");
    assert_eq!(report.z_counter, 0);

    let c = ctx.coordinator();
    let rank = |id: &str| c.panes().get(&PaneId::from(id)).map(|p| p.z_index);
    let (a, b, top) = (PaneId::from("a"), PaneId::from("b"), PaneId::from("c"));
    let mut highest = 0;

    for call in 1..=12_001u32 {
        let target = match call {
            1 => &a,
            2 => &b,
            _ => &top,
        };
        let result = c.focus(target, Source::Automation).await;
        assert!(result.success, "call {call} failed: {:?}", result.error);
        highest = highest.max(c.zorder().current());

        if call == 10_000 {
            assert_eq!(rank("c"), Some(10_000));
        }
        if call == 10_001 {
            // the two oldest-focused panes were compacted first, in order
            assert_eq!(rank("a"), Some(1_001));
            assert_eq!(rank("b"), Some(1_002));
            assert_eq!(rank("c"), Some(1_004));
        }
    }

    assert!(highest <= 10_000 + 3, "counter ran away to {highest}");
    assert_eq!(rank("a"), Some(1_001));
    assert_eq!(rank("b"), Some(1_002));
    assert_eq!(rank("c"), Some(1_004 + 2_000));
    assert_eq!(c.zorder().current(), 3_004);
    assert_eq!(store.peek(Z_COUNTER_KEY), Some(json!(3_004)));
}

#[tokio::test(start_paused = true)]
async fn contexts_share_one_counter() {
    let store = Arc::new(MemoryStore::new());
    let (a, _) = PaneContext::open(ContextOptions::new(
        "ctx-a",
        store.clone(),
        Arc::new(HeadlessHost::new()),
    ))
    .await
    .expect("opens");
    let (b, _) = PaneContext::open(ContextOptions::new(
        "ctx-b",
        store.clone(),
        Arc::new(HeadlessHost::new()),
    ))
    .await
    .expect("opens");

    let first = a
        .create(pane_sync::PaneRequest::new("p1", "https://a.test", Geometry::default()))
        .await
        .expect("created");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = b
        .create(pane_sync::PaneRequest::new("p2", "https://b.test", Geometry::default()))
        .await
        .expect("created");
    assert!(second.z_index > first.z_index);
}
