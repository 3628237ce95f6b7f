use std::sync::Arc;
use std::time::Duration;

use pane_sync::render::{HeadlessHost, SurfaceCommand};
use pane_sync::{
    ContextOptions, Geometry, MemoryStore, PaneContext, PaneEvent, PaneRequest,
    RenderVerification, Source, SyncError,
};
use pretty_assertions::assert_eq;

async fn open(store: &Arc<MemoryStore>, host: &HeadlessHost) -> PaneContext {
    let (ctx, _) = PaneContext::open(ContextOptions::new(
        "ctx-a",
        store.clone(),
        Arc::new(host.clone()),
    ))
    .await
    .expect("opens");
    ctx
}

#[tokio::test(start_paused = true)]
async fn minimized_pane_survives_context_teardown() {
    let store = Arc::new(MemoryStore::new());
    let geometry = Geometry::new(40, 50, 720, 400);
    let first_host = HeadlessHost::new();
    let ctx = open(&store, &first_host).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", geometry).with_title("Docs"))
        .await
        .expect("created")
        .id;
    assert!(ctx.coordinator().minimize(&id, Source::Ui).success);
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.shutdown();
    drop(ctx);

    let host = HeadlessHost::new();
    let (ctx, report) = PaneContext::open(ContextOptions::new(
        "ctx-a",
        store.clone(),
        Arc::new(host.clone()),
    ))
    .await
    .expect("reopens");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.rendered, 0);
    assert!(ctx.coordinator().snapshots().contains(&id));

    let mut events = ctx.coordinator().subscribe();
    assert!(ctx.coordinator().restore(&id, Source::Ui).await.success);
    let pane = ctx.coordinator().panes().get(&id).expect("present");
    assert_eq!(pane.geometry, geometry);
    assert_eq!(pane.title, "Docs");
    assert_eq!(host.live(&id), 1);
    match events.recv().await.expect("event") {
        PaneEvent::Changed(p) => {
            assert_eq!(p.render_verified, Some(RenderVerification::Verified));
            assert_eq!((p.position.left, p.size.width), (40, 720));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn restore_through_chrome_and_repeat_is_harmless() {
    let store = Arc::new(MemoryStore::new());
    let host = HeadlessHost::new();
    let ctx = open(&store, &host).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 300, 200)))
        .await
        .expect("created")
        .id;
    assert!(host.press(&id, SurfaceCommand::Minimize));
    tokio::time::sleep(Duration::from_millis(300)).await;
    let pane = ctx.coordinator().panes().get(&id).expect("present");
    assert!(pane.minimized);

    let (first, second) = tokio::join!(
        ctx.coordinator().restore(&id, Source::Manager),
        ctx.coordinator().restore(&id, Source::Automation),
    );
    assert!(first.success && first.error.is_none());
    assert!(second.is_suppressed());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let again = ctx.coordinator().restore(&id, Source::Ui).await;
    assert_eq!(again.error, Some(SyncError::NotMinimized(id.clone())));
    assert_eq!(host.live(&id), 1);
}

#[tokio::test(start_paused = true)]
async fn detached_surface_is_rendered_again() {
    let store = Arc::new(MemoryStore::new());
    let host = HeadlessHost::new();
    let ctx = open(&store, &host).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 300, 200)))
        .await
        .expect("created")
        .id;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the host dropped the surface without telling anyone
    host.detach(&id);
    assert_eq!(ctx.reconcile(), 1);
    assert_eq!(host.live(&id), 1);
    assert_eq!(host.created(&id), 2);
    assert_eq!(ctx.reconcile(), 0);

    // a plain update on a detached surface also re-renders
    host.detach(&id);
    let moved = ctx.update_geometry(&id, Geometry::new(5, 5, 300, 200));
    assert!(moved.success);
    assert_eq!(host.live(&id), 1);
    assert_eq!(host.created(&id), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_render_is_reported_not_rolled_back() {
    let store = Arc::new(MemoryStore::new());
    let host = HeadlessHost::new();
    let ctx = open(&store, &host).await;
    let id = ctx
        .create(PaneRequest::new("p1", "https://a.test", Geometry::new(0, 0, 300, 200)))
        .await
        .expect("created")
        .id;
    ctx.coordinator().minimize(&id, Source::Ui);
    host.set_failing(true);

    let mut events = ctx.coordinator().subscribe();
    assert!(ctx.coordinator().restore(&id, Source::Ui).await.success);
    let pane = ctx.coordinator().panes().get(&id).expect("present");
    assert!(!pane.minimized);
    match events.recv().await.expect("event") {
        PaneEvent::Changed(p) => assert_eq!(p.render_verified, Some(RenderVerification::Failed)),
        other => panic!("unexpected event {other:?}"),
    }

    host.set_failing(false);
    assert_eq!(ctx.reconcile(), 1);
    assert_eq!(host.live(&id), 1);
}
