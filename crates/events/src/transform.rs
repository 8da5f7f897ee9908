//! Transform graph: one-hop event-to-event transforms for schema evolution,
//! with multi-hop path discovery and caching.
//!
//! The graph is directed and may contain cycles and parallel paths. Resolution
//! first looks at direct targets, then runs a depth-first search in edge
//! registration order; the first path discovered wins. A successful multi-hop
//! resolution is composed into one function and cached as a direct edge.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use buildup_core::{BuildUpError, BuildUpResult, ConfigurationError, TypeKey};

use crate::event::{Event, EventData};

type ErasedTransform = Arc<dyn Fn(&EventData) -> Option<EventData> + Send + Sync>;

#[derive(Clone)]
struct Edge {
    target: TypeKey,
    transform: ErasedTransform,
    /// Number of registered transforms this edge stands for (>1 for cached compositions).
    hops: usize,
}

/// Outcome of a path search from an event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSearch {
    /// Types visited from the source (inclusive) to the applicable target (inclusive).
    PathFound(Vec<TypeKey>),
    NoPath,
    /// The search came back to this type through a cycle and found no other way out.
    CycleDetected(TypeKey),
}

/// A transform from `source` to an event type the projection can apply.
#[derive(Clone)]
pub struct ResolvedTransform {
    source: TypeKey,
    target: TypeKey,
    hops: usize,
    transform: ErasedTransform,
}

impl ResolvedTransform {
    pub fn source(&self) -> TypeKey {
        self.source
    }

    pub fn target(&self) -> TypeKey {
        self.target
    }

    pub fn hops(&self) -> usize {
        self.hops
    }

    /// Transform `event`. `None` when `event` is not of the source type.
    pub fn apply(&self, event: &EventData) -> Option<EventData> {
        (self.transform)(event)
    }
}

impl core::fmt::Debug for ResolvedTransform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResolvedTransform")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("hops", &self.hops)
            .finish()
    }
}

/// Adjacency list of transforms, keyed by source event type.
#[derive(Default)]
pub struct TransformGraph {
    edges: RwLock<HashMap<TypeKey, Vec<Edge>>>,
    searches: AtomicU64,
}

impl TransformGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-hop transform. Re-registering the same pair replaces the
    /// function but keeps the edge's position in iteration order.
    pub fn register<Old, New, F>(&mut self, transform: F) -> Result<(), ConfigurationError>
    where
        Old: Event,
        New: Event,
        F: Fn(&Old) -> New + Send + Sync + 'static,
    {
        let source = TypeKey::of::<Old>();
        let target = TypeKey::of::<New>();
        if source == target {
            return Err(ConfigurationError::SelfTransform(source));
        }

        let transform: ErasedTransform = Arc::new(move |event: &EventData| {
            event
                .downcast_ref::<Old>()
                .map(|old| EventData::new(transform(old)))
        });
        self.insert_edge(
            source,
            Edge {
                target,
                transform,
                hops: 1,
            },
        );
        Ok(())
    }

    pub fn is_transformable(&self, event_type: TypeKey) -> bool {
        self.read_edges()
            .get(&event_type)
            .is_some_and(|out| !out.is_empty())
    }

    /// Direct targets of `event_type`, in iteration order (cached compositions included).
    pub fn targets(&self, event_type: TypeKey) -> Vec<TypeKey> {
        self.read_edges()
            .get(&event_type)
            .map(|out| out.iter().map(|e| e.target).collect())
            .unwrap_or_default()
    }

    /// Number of depth-first searches run so far.
    pub fn searches(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    /// Search for a path without composing or caching anything.
    pub fn find_path(
        &self,
        event_type: TypeKey,
        is_applicable: impl Fn(TypeKey) -> bool,
    ) -> PathSearch {
        let edges = self.read_edges();
        match depth_first(&edges, event_type, &is_applicable) {
            Ok(path) => {
                let mut types = Vec::with_capacity(path.len() + 1);
                types.push(event_type);
                types.extend(path.iter().map(|e| e.target));
                PathSearch::PathFound(types)
            }
            Err(Some(at)) => PathSearch::CycleDetected(at),
            Err(None) => PathSearch::NoPath,
        }
    }

    /// Resolve a transform from `event_type` to any type applicable for `projection_type`.
    ///
    /// Callers check direct applicability first; this is only for event types
    /// the projection cannot apply as-is.
    pub fn resolve(
        &self,
        projection_type: TypeKey,
        event_type: TypeKey,
        is_applicable: impl Fn(TypeKey) -> bool,
    ) -> BuildUpResult<ResolvedTransform> {
        let composed = {
            let edges = self.read_edges();
            let out = edges.get(&event_type).map(Vec::as_slice).unwrap_or_default();

            if let Some(edge) = out.iter().find(|e| is_applicable(e.target)) {
                return Ok(ResolvedTransform {
                    source: event_type,
                    target: edge.target,
                    hops: edge.hops,
                    transform: edge.transform.clone(),
                });
            }

            self.searches.fetch_add(1, Ordering::Relaxed);
            match depth_first(&edges, event_type, &is_applicable) {
                Ok(path) => compose(event_type, &path),
                Err(None) => {
                    return Err(BuildUpError::NoTransformPath {
                        projection_type,
                        event_type,
                    });
                }
                Err(Some(at)) => {
                    return Err(BuildUpError::CycleDetected {
                        projection_type,
                        event_type,
                        at,
                    });
                }
            }
        };

        debug!(
            source = %composed.source,
            target = %composed.target,
            hops = composed.hops,
            "caching composed transform"
        );
        self.insert_edge(
            event_type,
            Edge {
                target: composed.target,
                transform: composed.transform.clone(),
                hops: composed.hops,
            },
        );
        Ok(composed)
    }

    fn insert_edge(&self, source: TypeKey, edge: Edge) {
        let mut edges = self.write_edges();
        let out = edges.entry(source).or_default();
        match out.iter_mut().find(|e| e.target == edge.target) {
            Some(existing) => *existing = edge,
            None => out.push(edge),
        }
    }

    // Writers never leave the map half-updated, so a poisoned lock still holds consistent data.
    fn read_edges(&self) -> RwLockReadGuard<'_, HashMap<TypeKey, Vec<Edge>>> {
        self.edges.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_edges(&self) -> RwLockWriteGuard<'_, HashMap<TypeKey, Vec<Edge>>> {
        self.edges.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for TransformGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let edges = self.read_edges();
        let mut map = f.debug_map();
        for (source, out) in edges.iter() {
            map.entry(source, &out.iter().map(|e| e.target).collect::<Vec<_>>());
        }
        map.finish()
    }
}

/// Iterative depth-first search over outgoing edges.
///
/// Returns the edges of the first path reaching an applicable type, or the
/// first type reached again through a back edge (`Some`) / nothing (`None`)
/// when no path exists. Exhausted nodes are not expanded twice.
fn depth_first<'a>(
    edges: &'a HashMap<TypeKey, Vec<Edge>>,
    start: TypeKey,
    is_applicable: &dyn Fn(TypeKey) -> bool,
) -> Result<Vec<&'a Edge>, Option<TypeKey>> {
    let outgoing = |node: &TypeKey| edges.get(node).map(Vec::as_slice).unwrap_or_default();

    let mut stack: Vec<(TypeKey, &'a [Edge], usize)> = vec![(start, outgoing(&start), 0)];
    let mut on_path: HashSet<TypeKey> = HashSet::from([start]);
    let mut exhausted: HashSet<TypeKey> = HashSet::new();
    let mut cycle_at = None;

    while let Some(top) = stack.last_mut() {
        let (node, out, next) = *top;
        let Some(edge) = out.get(next) else {
            stack.pop();
            on_path.remove(&node);
            exhausted.insert(node);
            continue;
        };
        top.2 += 1;

        let target = edge.target;
        if is_applicable(target) {
            return Ok(stack.iter().map(|&(_, out, next)| &out[next - 1]).collect());
        }
        if on_path.contains(&target) {
            cycle_at.get_or_insert(target);
            continue;
        }
        if exhausted.contains(&target) {
            continue;
        }
        on_path.insert(target);
        stack.push((target, outgoing(&target), 0));
    }

    Err(cycle_at)
}

fn compose(source: TypeKey, path: &[&Edge]) -> ResolvedTransform {
    let steps: Vec<ErasedTransform> = path.iter().map(|e| e.transform.clone()).collect();
    let target = path.last().map_or(source, |e| e.target);
    let hops = path.iter().map(|e| e.hops).sum();

    ResolvedTransform {
        source,
        target,
        hops,
        transform: Arc::new(move |event: &EventData| {
            steps
                .iter()
                .try_fold(event.clone(), |current, step| step(&current))
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Proj;

    #[derive(Debug, PartialEq)]
    struct A(i32);
    impl Event for A {}
    #[derive(Debug, PartialEq)]
    struct B(i32);
    impl Event for B {}
    #[derive(Debug, PartialEq)]
    struct C(i32);
    impl Event for C {}
    #[derive(Debug, PartialEq)]
    struct D(i32);
    impl Event for D {}
    #[derive(Debug, PartialEq)]
    struct Target(i32);
    impl Event for Target {}

    fn key<T: 'static>() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn only<T: 'static>() -> impl Fn(TypeKey) -> bool {
        move |t| t == key::<T>()
    }

    #[test]
    fn self_transform_is_rejected_at_registration() {
        let mut graph = TransformGraph::new();
        let err = graph.register(|a: &A| A(a.0)).unwrap_err();
        assert_eq!(err, ConfigurationError::SelfTransform(key::<A>()));
        assert!(!graph.is_transformable(key::<A>()));
    }

    #[test]
    fn one_hop_resolution_does_not_search() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0 * 2)).unwrap();

        let resolved = graph.resolve(key::<Proj>(), key::<A>(), only::<B>()).unwrap();
        assert_eq!(resolved.target(), key::<B>());
        assert_eq!(resolved.hops(), 1);
        assert_eq!(graph.searches(), 0);

        let out = resolved.apply(&A(21).into()).unwrap();
        assert_eq!(out.downcast_ref::<B>(), Some(&B(42)));
        assert!(resolved.apply(&C(1).into()).is_none());
    }

    #[test]
    fn multi_hop_path_is_composed_and_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = TransformGraph::new();
        let counter = calls.clone();
        graph
            .register(move |a: &A| {
                counter.fetch_add(1, Ordering::SeqCst);
                B(a.0 + 1)
            })
            .unwrap();
        graph.register(|b: &B| C(b.0 * 10)).unwrap();

        let first = graph.resolve(key::<Proj>(), key::<A>(), only::<C>()).unwrap();
        assert_eq!(first.target(), key::<C>());
        assert_eq!(first.hops(), 2);
        assert_eq!(graph.searches(), 1);
        assert_eq!(graph.targets(key::<A>()), vec![key::<B>(), key::<C>()]);

        let out = first.apply(&A(1).into()).unwrap();
        assert_eq!(out.downcast_ref::<C>(), Some(&C(20)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second resolution hits the cached direct edge.
        let second = graph.resolve(key::<Proj>(), key::<A>(), only::<C>()).unwrap();
        assert_eq!(graph.searches(), 1);
        assert_eq!(second.hops(), 2);
        let out = second.apply(&A(2).into()).unwrap();
        assert_eq!(out.downcast_ref::<C>(), Some(&C(30)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_discovered_path_wins() {
        let mut graph = TransformGraph::new();
        // A -> B -> C -> Target is discovered before the shorter A -> D -> Target.
        graph.register(|a: &A| B(a.0)).unwrap();
        graph.register(|a: &A| D(a.0 + 100)).unwrap();
        graph.register(|b: &B| C(b.0)).unwrap();
        graph.register(|c: &C| Target(c.0)).unwrap();
        graph.register(|d: &D| Target(d.0)).unwrap();

        assert_eq!(
            graph.find_path(key::<A>(), only::<Target>()),
            PathSearch::PathFound(vec![key::<A>(), key::<B>(), key::<C>(), key::<Target>()])
        );

        let resolved = graph.resolve(key::<Proj>(), key::<A>(), only::<Target>()).unwrap();
        assert_eq!(resolved.hops(), 3);
        let out = resolved.apply(&A(5).into()).unwrap();
        assert_eq!(out.downcast_ref::<Target>(), Some(&Target(5)));
    }

    #[test]
    fn no_path_is_an_explicit_error() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0)).unwrap();

        assert_eq!(graph.find_path(key::<A>(), only::<Target>()), PathSearch::NoPath);
        let err = graph.resolve(key::<Proj>(), key::<A>(), only::<Target>()).unwrap_err();
        assert_eq!(
            err,
            BuildUpError::NoTransformPath {
                projection_type: key::<Proj>(),
                event_type: key::<A>(),
            }
        );

        // Unknown source type: nothing to traverse.
        let err = graph.resolve(key::<Proj>(), key::<D>(), only::<Target>()).unwrap_err();
        assert!(matches!(err, BuildUpError::NoTransformPath { .. }));
    }

    #[test]
    fn cycle_without_exit_is_detected() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0)).unwrap();
        graph.register(|b: &B| C(b.0)).unwrap();
        graph.register(|c: &C| A(c.0)).unwrap();

        assert_eq!(
            graph.find_path(key::<A>(), only::<Target>()),
            PathSearch::CycleDetected(key::<A>())
        );
        let err = graph.resolve(key::<Proj>(), key::<A>(), only::<Target>()).unwrap_err();
        assert_eq!(
            err,
            BuildUpError::CycleDetected {
                projection_type: key::<Proj>(),
                event_type: key::<A>(),
                at: key::<A>(),
            }
        );
    }

    #[test]
    fn cycle_does_not_hide_a_later_path() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0)).unwrap();
        graph.register(|b: &B| A(b.0)).unwrap();
        graph.register(|b: &B| C(b.0)).unwrap();
        graph.register(|c: &C| Target(c.0 + 1)).unwrap();

        let resolved = graph.resolve(key::<Proj>(), key::<A>(), only::<Target>()).unwrap();
        assert_eq!(resolved.hops(), 3);
        let out = resolved.apply(&A(1).into()).unwrap();
        assert_eq!(out.downcast_ref::<Target>(), Some(&Target(2)));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0)).unwrap();
        graph.register(|a: &A| C(a.0)).unwrap();
        graph.register(|b: &B| D(b.0)).unwrap();
        graph.register(|c: &C| D(c.0)).unwrap();

        assert_eq!(graph.find_path(key::<A>(), only::<Target>()), PathSearch::NoPath);
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut graph = TransformGraph::new();
        graph.register(|a: &A| B(a.0)).unwrap();
        graph.register(|a: &A| C(a.0)).unwrap();
        graph.register(|a: &A| B(a.0 * 3)).unwrap();

        assert_eq!(graph.targets(key::<A>()), vec![key::<B>(), key::<C>()]);
        let resolved = graph.resolve(key::<Proj>(), key::<A>(), only::<B>()).unwrap();
        let out = resolved.apply(&A(3).into()).unwrap();
        assert_eq!(out.downcast_ref::<B>(), Some(&B(9)));
    }
}
