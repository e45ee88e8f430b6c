use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use role_graph::config::Settings;
use role_graph::db;
use role_graph::events::init_event_bus;
use role_graph::models::{EdgeMetadata, Lookup, NewRole, Role};
use role_graph::{AdminService, AppError, AuthorizationEngine, GraphStore, MutationGuard, SqliteStore};

async fn open(dir: &TempDir) -> (AdminService, AuthorizationEngine) {
    let path = dir.path().join("roles.db");
    let settings = Settings {
        database_url: Some(format!("sqlite://{}", path.display())),
        max_connections: 8,
        conflict_retries: 20,
        ..Settings::default()
    };
    let pool = db::init(&settings).await.unwrap();

    let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::new(pool));
    let guard = MutationGuard::new(store.clone())
        .with_retries(settings.conflict_retries)
        .with_backoff(Duration::from_millis(5));
    let (bus, _rx) = init_event_bus();
    (AdminService::new(store.clone(), guard, bus), AuthorizationEngine::new(store))
}

async fn roles(admin: &AdminService, names: &[String]) -> Vec<Role> {
    let mut out = Vec::new();
    for name in names {
        out.push(admin.create_role(NewRole::new(name.as_str())).await.unwrap());
    }
    out
}

fn settled(result: &Result<impl Sized, AppError>) -> bool {
    matches!(result, Ok(_) | Err(AppError::CircularDependency(_)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_edges_race_to_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, engine) = open(&dir).await;

    for round in 0..10 {
        let pair = roles(&admin, &[format!("left-{round}"), format!("right-{round}")]).await;
        let (left, right) = (pair[0].clone(), pair[1].clone());

        let (a1, a2) = (admin.clone(), admin.clone());
        let (l1, r1) = (left.clone(), right.clone());
        let first = tokio::spawn(async move {
            a1.add_role_parent(&l1.into(), &r1.into(), EdgeMetadata::new()).await
        });
        let (l2, r2) = (left.clone(), right.clone());
        let second = tokio::spawn(async move {
            a2.add_role_parent(&r2.into(), &l2.into(), EdgeMetadata::new()).await
        });

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert!(outcomes.iter().all(settled), "round {round}: {outcomes:?}");
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");

        for role in [&left, &right] {
            let ancestors = engine.role_ancestors(&Lookup::Id(role.id)).await.unwrap();
            assert!(!ancestors.contains(&role.id));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_way_ring_never_closes() {
    let dir = tempfile::tempdir().unwrap();
    let (admin, engine) = open(&dir).await;

    for round in 0..5 {
        let ring = roles(
            &admin,
            &[format!("x-{round}"), format!("y-{round}"), format!("z-{round}")],
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let admin = admin.clone();
            let parent = ring[i].clone();
            let child = ring[(i + 1) % 3].clone();
            handles.push(tokio::spawn(async move {
                admin.add_role_parent(&parent.into(), &child.into(), EdgeMetadata::new()).await
            }));
        }

        let mut landed = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(settled(&outcome), "round {round}: {outcome:?}");
            landed += outcome.is_ok() as usize;
        }
        assert_eq!(landed, 2, "round {round}");

        for role in &ring {
            let ancestors = engine.role_ancestors(&Lookup::Id(role.id)).await.unwrap();
            assert!(!ancestors.contains(&role.id));
        }
    }
}
