//! End-to-end behaviour of repository, session and store together.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use questmap_core::{
    render_markers, ChangeBatch, InMemoryMarkerStore, MarkerId, MarkerRepository, MarkerStore,
    NewMarker, Position, QueryScope, StoreError, StoreOp, SyncSession,
};

fn pos(lat: f64, lng: f64) -> Position {
    Position::new(lat, lng).unwrap()
}

fn setup() -> (InMemoryMarkerStore, Arc<MarkerRepository>) {
    let store = InMemoryMarkerStore::new();
    let repo = Arc::new(MarkerRepository::new(
        Arc::new(store.clone()),
        QueryScope::all(),
    ));
    (store, repo)
}

/// Wait until the mirror matches the store's current listing.
async fn settle(store: &InMemoryMarkerStore, repo: &MarkerRepository) {
    let expected: Vec<MarkerId> = store.documents().into_iter().map(|d| d.id).collect();
    let mut rx = repo.watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|markers| {
            markers
                .iter()
                .map(|m| m.id.clone())
                .collect::<Option<Vec<_>>>()
                .is_some_and(|ids| ids == expected)
        }),
    )
    .await
    .expect("mirror never caught up with the store")
    .expect("repository dropped");
}

#[tokio::test]
async fn quest_walkthrough_keeps_labels_positional() {
    let (store, repo) = setup();
    let mut session = SyncSession::new(Arc::clone(&repo));
    session.activate().await.unwrap();

    let first = repo
        .place_marker(pos(49.8, 24.0), Some("Find the lost ring".into()))
        .await
        .unwrap()
        .unwrap();
    settle(&store, &repo).await;
    let views = render_markers(&repo.markers());
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].label, "1");

    let second = repo
        .place_marker(pos(49.9, 24.1), Some("Visit the old mill".into()))
        .await
        .unwrap()
        .unwrap();
    settle(&store, &repo).await;
    let views = render_markers(&repo.markers());
    assert_eq!(views[1].label, "2");
    assert_eq!(views[1].id.as_ref(), Some(&second));

    repo.move_marker(&first, pos(50.0, 24.5)).await.unwrap();
    settle(&store, &repo).await;
    let views = render_markers(&repo.markers());
    assert_eq!(views[0].id.as_ref(), Some(&first));
    assert_eq!(views[0].label, "1");
    assert_eq!(views[0].position, pos(50.0, 24.5));

    repo.remove_marker(&second).await.unwrap();
    settle(&store, &repo).await;
    let views = render_markers(&repo.markers());
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].label, "1");

    repo.remove_all_markers().await.unwrap();
    settle(&store, &repo).await;
    assert!(repo.is_empty());

    session.deactivate().await;
}

#[tokio::test]
async fn add_then_batch_round_trips_position_and_description() {
    let (store, repo) = setup();
    let generation = repo.begin_subscription();

    let id = repo
        .place_marker(pos(49.8, 24.0), Some("Find the lost ring".into()))
        .await
        .unwrap()
        .unwrap();
    let batch = ChangeBatch::new(store.list(&QueryScope::all()).await.unwrap());
    assert!(batch.contains(&id));
    assert!(repo.apply_batch(generation, batch));

    let markers = repo.markers();
    assert_eq!(markers.len(), 1);
    assert!(!markers[0].id.as_ref().unwrap().as_str().is_empty());
    assert_eq!(markers[0].position, pos(49.8, 24.0));
    assert_eq!(markers[0].description.as_deref(), Some("Find the lost ring"));
}

#[tokio::test]
async fn delete_twice_matches_delete_once() {
    let (_store, repo) = setup();
    let keep = repo
        .place_marker(pos(1.0, 1.0), Some("keep".into()))
        .await
        .unwrap()
        .unwrap();
    let gone = repo
        .place_marker(pos(2.0, 2.0), Some("gone".into()))
        .await
        .unwrap()
        .unwrap();

    repo.remove_marker(&gone).await.unwrap();
    let once = repo.markers();
    repo.remove_marker(&gone).await.unwrap();

    assert_eq!(repo.markers(), once);
    assert_eq!(once.len(), 1);
    assert_eq!(once[0].id.as_ref(), Some(&keep));
}

#[tokio::test]
async fn delete_all_empties_the_scope() {
    let (store, repo) = setup();
    for name in ["a", "b", "c"] {
        repo.place_marker(pos(1.0, 1.0), Some(name.into()))
            .await
            .unwrap();
    }

    assert_eq!(repo.remove_all_markers().await.unwrap(), 3);
    assert!(store.list(&QueryScope::all()).await.unwrap().is_empty());
    assert!(repo.is_empty());
}

#[tokio::test]
async fn delete_all_race_leaves_late_marker_behind() {
    let (store, repo) = setup();
    repo.place_marker(pos(1.0, 1.0), Some("early".into()))
        .await
        .unwrap();
    store.inject_after_list(NewMarker::new(pos(2.0, 2.0)).with_description("late"));

    assert_eq!(repo.remove_all_markers().await.unwrap(), 1);

    let remaining = store.list(&QueryScope::all()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].description.as_deref(), Some("late"));
}

#[tokio::test]
async fn delete_all_race_is_visible_through_the_session() {
    let (store, repo) = setup();
    let mut session = SyncSession::new(Arc::clone(&repo));
    session.activate().await.unwrap();

    repo.place_marker(pos(1.0, 1.0), Some("early".into()))
        .await
        .unwrap();
    store.inject_after_list(NewMarker::new(pos(2.0, 2.0)).with_description("late"));
    repo.remove_all_markers().await.unwrap();

    settle(&store, &repo).await;
    let markers = repo.markers();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].description.as_deref(), Some("late"));
}

#[tokio::test]
async fn delete_all_scoped_to_field_spares_other_documents() {
    let store = InMemoryMarkerStore::new();
    let repo = MarkerRepository::new(Arc::new(store.clone()), QueryScope::non_empty("quest"));
    store.seed(NewMarker::new(pos(1.0, 1.0)).with_description("untagged"));
    repo.place_marker(pos(2.0, 2.0), Some("tagged".into()))
        .await
        .unwrap();

    assert_eq!(repo.remove_all_markers().await.unwrap(), 1);
    let docs = store.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].description.as_deref(), Some("untagged"));
}

#[tokio::test]
async fn stale_subscription_cannot_touch_mirror_after_teardown() {
    let (store, repo) = setup();
    let mut session = SyncSession::new(Arc::clone(&repo));
    session.activate().await.unwrap();
    let stale = repo.active_generation().unwrap();
    session.deactivate().await;

    store.seed(NewMarker::new(pos(1.0, 1.0)));
    let batch = ChangeBatch::new(store.list(&QueryScope::all()).await.unwrap());

    assert!(!repo.apply_batch(stale, batch));
    assert!(repo.is_empty());
}

#[tokio::test]
async fn failed_intent_is_not_retried() {
    let (store, repo) = setup();
    store.fail_next(StoreOp::Create, StoreError::Unavailable("offline".into()));

    assert!(repo
        .place_marker(pos(1.0, 1.0), Some("ring".into()))
        .await
        .is_err());
    assert_eq!(store.call_count(StoreOp::Create), 1);
    assert!(store.documents().is_empty());
}

// ============================================================================
// Replay property
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Add(f64, f64),
    Move(usize, f64, f64),
    Delete(usize),
    Fail(u8),
    Batch,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (-89.0f64..89.0, -179.0f64..179.0).prop_map(|(a, b)| Step::Add(a, b)),
        2 => (0usize..8, -89.0f64..89.0, -179.0f64..179.0)
            .prop_map(|(k, a, b)| Step::Move(k, a, b)),
        2 => (0usize..8).prop_map(Step::Delete),
        1 => (0u8..3).prop_map(Step::Fail),
        2 => Just(Step::Batch),
    ]
}

type Model = Vec<(MarkerId, Position)>;

fn mirror_as_model(repo: &MarkerRepository) -> Model {
    repo.markers()
        .into_iter()
        .map(|m| (m.id.expect("no pending entries between steps"), m.position))
        .collect()
}

async fn run_steps(steps: Vec<Step>) -> Result<(), TestCaseError> {
    let (store, repo) = setup();
    let generation = repo.begin_subscription();
    let mut model: Model = Vec::new();
    let mut issued: Vec<MarkerId> = Vec::new();

    for step in steps {
        match step {
            Step::Add(lat, lng) => {
                if let Ok(Some(id)) = repo.place_marker(pos(lat, lng), Some("q".into())).await {
                    model.push((id.clone(), pos(lat, lng)));
                    issued.push(id);
                }
            }
            Step::Move(k, lat, lng) => {
                if issued.is_empty() {
                    continue;
                }
                let id = issued[k % issued.len()].clone();
                if repo.move_marker(&id, pos(lat, lng)).await.is_ok() {
                    if let Some(entry) = model.iter_mut().find(|(m, _)| *m == id) {
                        entry.1 = pos(lat, lng);
                    }
                }
            }
            Step::Delete(k) => {
                if issued.is_empty() {
                    continue;
                }
                let id = issued[k % issued.len()].clone();
                if repo.remove_marker(&id).await.is_ok() {
                    model.retain(|(m, _)| *m != id);
                }
            }
            Step::Fail(kind) => {
                let op = match kind {
                    0 => StoreOp::Create,
                    1 => StoreOp::Update,
                    _ => StoreOp::Delete,
                };
                store.fail_next(op, StoreError::Unavailable("injected".into()));
            }
            Step::Batch => {
                let docs = store.list(&QueryScope::all()).await.unwrap();
                model = docs.iter().map(|d| (d.id.clone(), d.position)).collect();
                prop_assert!(repo.apply_batch(generation, ChangeBatch::new(docs)));
            }
        }

        prop_assert_eq!(mirror_as_model(&repo), model.clone());
    }

    // a final batch always converges the mirror on the store
    let docs = store.list(&QueryScope::all()).await.unwrap();
    let expected: Model = docs.iter().map(|d| (d.id.clone(), d.position)).collect();
    repo.apply_batch(generation, ChangeBatch::new(docs));
    prop_assert_eq!(mirror_as_model(&repo), expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mirror_replays_successful_intents_over_latest_batch(
        steps in prop::collection::vec(step_strategy(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_steps(steps))?;
    }
}
