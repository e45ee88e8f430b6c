use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::Hierarchy;
use crate::store::{GraphStore, GraphTx};

/// One-step neighbour lookup the resolver walks over.
#[async_trait]
pub trait HierarchyLinks: Send {
    async fn parents(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>>;

    async fn children(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>>;
}

/// Links read from the live store, for checks.
pub struct StoreLinks<'a> {
    store: &'a dyn GraphStore,
    hierarchy: Hierarchy,
}

impl<'a> StoreLinks<'a> {
    pub fn new(store: &'a dyn GraphStore, hierarchy: Hierarchy) -> Self {
        Self { store, hierarchy }
    }
}

#[async_trait]
impl<'a> HierarchyLinks for StoreLinks<'a> {
    async fn parents(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.store.parents_of(self.hierarchy, node).await
    }

    async fn children(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.store.children_of(self.hierarchy, node).await
    }
}

/// Links read inside a hierarchy write transaction, for validation.
pub struct TxLinks<'a> {
    tx: &'a mut dyn GraphTx,
    hierarchy: Hierarchy,
}

impl<'a> TxLinks<'a> {
    pub fn new(tx: &'a mut dyn GraphTx, hierarchy: Hierarchy) -> Self {
        Self { tx, hierarchy }
    }
}

#[async_trait]
impl<'a> HierarchyLinks for TxLinks<'a> {
    async fn parents(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.tx.parents_of(self.hierarchy, node).await
    }

    async fn children(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.tx.children_of(self.hierarchy, node).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Transitive closure over a parent-pointing graph.
///
/// Closures are memoized for the lifetime of the resolver, so build one per
/// authorization call and drop it afterwards. The visited set guarantees
/// termination on malformed (cyclic) data; a node shows up in its own
/// closure only when it sits on such a cycle.
pub struct HierarchyResolver<L> {
    links: L,
    ancestors: HashMap<Uuid, HashSet<Uuid>>,
    descendants: HashMap<Uuid, HashSet<Uuid>>,
}

impl<L: HierarchyLinks> HierarchyResolver<L> {
    pub fn new(links: L) -> Self {
        Self {
            links,
            ancestors: HashMap::new(),
            descendants: HashMap::new(),
        }
    }

    pub async fn parents(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.links.parents(node).await
    }

    pub async fn children(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        self.links.children(node).await
    }

    /// Strict ancestors of `node`.
    pub async fn ancestors(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        if let Some(cached) = self.ancestors.get(&node) {
            return Ok(cached.clone());
        }
        let closure = self.walk(node, Direction::Up).await?;
        self.ancestors.insert(node, closure.clone());
        Ok(closure)
    }

    /// Strict descendants of `node`.
    pub async fn descendants(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
        if let Some(cached) = self.descendants.get(&node) {
            return Ok(cached.clone());
        }
        let closure = self.walk(node, Direction::Down).await?;
        self.descendants.insert(node, closure.clone());
        Ok(closure)
    }

    async fn walk(&mut self, start: Uuid, direction: Direction) -> AppResult<HashSet<Uuid>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let next = match direction {
                Direction::Up => self.links.parents(node).await?,
                Direction::Down => self.links.children(node).await?,
            };
            for neighbour in next {
                if visited.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }

        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parent map only; children are derived.
    #[derive(Default)]
    struct FakeLinks {
        parents: HashMap<Uuid, HashSet<Uuid>>,
        lookups: usize,
    }

    impl FakeLinks {
        fn link(mut self, child: Uuid, parent: Uuid) -> Self {
            self.parents.entry(child).or_default().insert(parent);
            self
        }
    }

    #[async_trait]
    impl HierarchyLinks for FakeLinks {
        async fn parents(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
            self.lookups += 1;
            Ok(self.parents.get(&node).cloned().unwrap_or_default())
        }

        async fn children(&mut self, node: Uuid) -> AppResult<HashSet<Uuid>> {
            self.lookups += 1;
            Ok(self
                .parents
                .iter()
                .filter(|(_, parents)| parents.contains(&node))
                .map(|(child, _)| *child)
                .collect())
        }
    }

    fn ids<const N: usize>() -> [Uuid; N] {
        std::array::from_fn(|_| Uuid::new_v4())
    }

    #[tokio::test]
    async fn diamond_ancestors_are_counted_once() {
        let [a, b, c, d] = ids();
        let links = FakeLinks::default().link(d, b).link(d, c).link(b, a).link(c, a);
        let mut resolver = HierarchyResolver::new(links);

        let ancestors = resolver.ancestors(d).await.unwrap();
        assert_eq!(ancestors, HashSet::from([a, b, c]));
        assert!(resolver.ancestors(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn descendants_follow_child_edges() {
        let [a, b, c, d] = ids();
        let links = FakeLinks::default().link(b, a).link(c, b).link(d, a);
        let mut resolver = HierarchyResolver::new(links);

        assert_eq!(resolver.descendants(a).await.unwrap(), HashSet::from([b, c, d]));
        assert_eq!(resolver.descendants(b).await.unwrap(), HashSet::from([c]));
        assert!(resolver.descendants(c).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cyclic_data_terminates() {
        let [a, b, c] = ids();
        let links = FakeLinks::default().link(a, b).link(b, c).link(c, a);
        let mut resolver = HierarchyResolver::new(links);

        let ancestors = resolver.ancestors(a).await.unwrap();
        assert_eq!(ancestors, HashSet::from([a, b, c]));
    }

    #[tokio::test]
    async fn closures_are_memoized_per_resolver() {
        let [a, b, c] = ids();
        let links = FakeLinks::default().link(c, b).link(b, a);
        let mut resolver = HierarchyResolver::new(links);

        resolver.ancestors(c).await.unwrap();
        let after_first = resolver.links.lookups;
        resolver.ancestors(c).await.unwrap();
        assert_eq!(resolver.links.lookups, after_first);
    }
}
