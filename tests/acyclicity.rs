use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use role_graph::events::init_event_bus;
use role_graph::models::{EdgeMetadata, Lookup, NewRole, Relation};
use role_graph::{AdminService, AppError, AuthorizationEngine, GraphStore, InMemoryStore, MutationGuard};

const ROLES: usize = 6;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Applies `edges` (parent index, child index) through the guard and
/// returns the role ids plus every rejection.
async fn apply(edges: &[(usize, usize)]) -> (AuthorizationEngine, Arc<dyn GraphStore>, Vec<Uuid>, Vec<AppError>) {
    let store: Arc<dyn GraphStore> = Arc::new(InMemoryStore::new());
    let (bus, _rx) = init_event_bus();
    let admin = AdminService::new(store.clone(), MutationGuard::new(store.clone()), bus);

    let mut ids = Vec::with_capacity(ROLES);
    for i in 0..ROLES {
        ids.push(admin.create_role(NewRole::new(format!("role-{i}"))).await.unwrap().id);
    }

    let mut rejected = Vec::new();
    for &(parent, child) in edges {
        if let Err(err) = admin
            .add_role_parent(&Lookup::Id(ids[parent]), &Lookup::Id(ids[child]), EdgeMetadata::new())
            .await
        {
            rejected.push(err);
        }
    }

    (AuthorizationEngine::new(store.clone()), store, ids, rejected)
}

proptest! {
    #[test]
    fn role_graph_stays_acyclic(edges in prop::collection::vec((0..ROLES, 0..ROLES), 0..40)) {
        let (engine, store, ids, rejected) = runtime().block_on(apply(&edges));

        for err in &rejected {
            prop_assert!(
                matches!(
                    err,
                    AppError::SelfReference(_) | AppError::CircularDependency(_) | AppError::UniqueViolation(_)
                ),
                "unexpected rejection: {:?}",
                err
            );
        }

        for &id in &ids {
            let ancestors = runtime().block_on(engine.role_ancestors(&Lookup::Id(id))).unwrap();
            prop_assert!(!ancestors.contains(&id));
        }

        // Every self-loop in the input was rejected as such.
        let loops = edges.iter().filter(|(p, c)| p == c).count();
        let self_refs = rejected.iter().filter(|e| matches!(e, AppError::SelfReference(_))).count();
        prop_assert_eq!(loops, self_refs);

        // Accepted edges are exactly the distinct non-rejected ones.
        let mut stored = 0;
        for &id in &ids {
            stored += runtime()
                .block_on(store.objects_for_subject(Relation::RoleParent, id))
                .unwrap()
                .len();
        }
        prop_assert_eq!(stored + rejected.len(), edges.len());
    }
}
