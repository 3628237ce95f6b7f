use std::sync::Arc;
use std::time::Duration;

use pane_sync::messaging::ChannelMessenger;
use pane_sync::render::HeadlessHost;
use pane_sync::{
    ContextId, ContextOptions, Geometry, MemoryStore, PaneContext, PaneEvent, PaneId, PaneRequest,
    Source, SyncError,
};
use pretty_assertions::assert_eq;

async fn open(id: &str, store: &Arc<MemoryStore>, host: &HeadlessHost) -> PaneContext {
    let (ctx, _) = PaneContext::open(ContextOptions::new(
        id,
        store.clone(),
        Arc::new(host.clone()),
    ))
    .await
    .expect("context opens");
    ctx
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn foreign_context_cannot_minimize_but_sees_owner_changes() {
    let store = Arc::new(MemoryStore::new());
    let (host_a, host_b) = (HeadlessHost::new(), HeadlessHost::new());
    let a = open("ctx-a", &store, &host_a).await;
    let b = open("ctx-b", &store, &host_b).await;
    let p1 = PaneId::from("p1");

    a.create(PaneRequest::new("p1", "https://a.test", Geometry::new(10, 20, 640, 480)))
        .await
        .expect("created");
    settle().await;
    let seen_by_b = b.coordinator().panes().get(&p1).expect("replicated to b");
    assert_eq!(seen_by_b.owner, Some(ContextId::from("ctx-a")));
    assert_eq!(host_b.live(&p1), 1);

    let result = b.coordinator().minimize(&p1, Source::Ui);
    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(SyncError::Ownership {
            pane: p1.clone(),
            owner: Some(ContextId::from("ctx-a")),
        })
    );
    assert_eq!(b.coordinator().panes().get(&p1), Some(seen_by_b));
    assert!(!a.coordinator().panes().get(&p1).expect("a").minimized);

    assert!(a.coordinator().minimize(&p1, Source::Ui).success);
    settle().await;
    assert!(b.coordinator().panes().get(&p1).expect("b").minimized);
    assert_eq!(host_b.live(&p1), 0);
    assert_eq!(host_a.live(&p1), 0);
}

#[tokio::test(start_paused = true)]
async fn handoff_lets_the_new_owner_restore() {
    let store = Arc::new(MemoryStore::new());
    let (host_a, host_b) = (HeadlessHost::new(), HeadlessHost::new());
    let a = open("ctx-a", &store, &host_a).await;
    let b = open("ctx-b", &store, &host_b).await;
    let p1 = PaneId::from("p1");

    a.create(PaneRequest::new("p1", "https://a.test", Geometry::new(10, 20, 640, 480)))
        .await
        .expect("created");
    a.coordinator().minimize(&p1, Source::Ui);
    settle().await;

    let handed = a
        .coordinator()
        .adopt(&p1, ContextId::from("ctx-b"), Source::Manager)
        .await;
    assert!(handed.success);
    settle().await;
    assert_eq!(
        b.coordinator().panes().get(&p1).and_then(|p| p.owner),
        Some(ContextId::from("ctx-b"))
    );

    // the old owner is now locked out
    assert!(matches!(
        a.coordinator().restore(&p1, Source::Ui).await.error,
        Some(SyncError::Ownership { .. })
    ));

    assert!(b.coordinator().restore(&p1, Source::Ui).await.success);
    let restored = b.coordinator().panes().get(&p1).expect("b");
    assert_eq!(restored.geometry, Geometry::new(10, 20, 640, 480));
    assert_eq!(host_b.live(&p1), 1);

    settle().await;
    assert!(!a.coordinator().panes().get(&p1).expect("a").minimized);
    assert_eq!(host_a.live(&p1), 1);
}

#[tokio::test(start_paused = true)]
async fn messenger_hears_every_local_change() {
    let store = Arc::new(MemoryStore::new());
    let host = HeadlessHost::new();
    let (messenger, mut inbox) = ChannelMessenger::new();
    let (ctx, _) = PaneContext::open(
        ContextOptions::new("ctx-a", store.clone(), Arc::new(host.clone()))
            .with_messenger(Arc::new(messenger)),
    )
    .await
    .expect("opens");
    let p1 = PaneId::from("p1");

    ctx.create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 10, 10)))
        .await
        .expect("created");
    ctx.coordinator().minimize(&p1, Source::Automation);
    ctx.coordinator().destroy(&p1, Source::Ui).await;

    let mut kinds = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        assert_eq!(message.context, ContextId::from("ctx-a"));
        kinds.push(match message.event {
            PaneEvent::Changed(p) if p.minimized => "minimized",
            PaneEvent::Changed(_) => "changed",
            PaneEvent::Deleted { .. } => "deleted",
        });
    }
    assert_eq!(kinds, vec!["changed", "minimized", "deleted"]);
}

#[tokio::test(start_paused = true)]
async fn isolation_groups_do_not_mix() {
    let store = Arc::new(MemoryStore::new());
    let host = HeadlessHost::new();
    let (work, _) = PaneContext::open(
        ContextOptions::new("ctx-a", store.clone(), Arc::new(host.clone())).with_isolation("work"),
    )
    .await
    .expect("opens");
    let pane = work
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 10, 10)))
        .await
        .expect("created");
    work.shutdown();
    drop(work);

    // same context id, different isolation group
    let (personal, report) = PaneContext::open(
        ContextOptions::new("ctx-a", store.clone(), Arc::new(HeadlessHost::new()))
            .with_isolation("personal"),
    )
    .await
    .expect("opens");
    assert_eq!(report.loaded, 1);
    assert!(matches!(
        personal.coordinator().minimize(&pane.id, Source::Ui).error,
        Some(SyncError::Isolation { .. })
    ));
}
