// src/index/hnsw.rs
// In-memory HNSW graph over unit vectors, keyed by opaque string ids.
//
// The graph is an arena: nodes refer to each other by id inside a map,
// never by pointer. Only embeddings are persisted elsewhere; the graph is
// rebuilt on start, so serialization is optional and snapshot-shaped.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Max connections per layer, per node (M).
pub const MAX_CONNECTIONS: usize = 16;

/// Candidate list size during insertion (ef_construction).
pub const EF_CONSTRUCTION: usize = 200;

/// Hard cap on sampled levels.
const LEVEL_CAP: u8 = 16;

/// A search hit: id plus cosine similarity score (1 - distance).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// level -> neighbor ids. Connections are bidirectional per level.
    neighbors: HashMap<u8, HashSet<String>>,
}

/// Snapshot form for optional warm rebuilds.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dim: usize,
    entry_point: Option<String>,
    max_level: u8,
    nodes: HashMap<String, Node>,
}

/// Heap entry ordered by distance. Max-heap by default; wrap in `Reverse`
/// for the candidate min-heap.
#[derive(Debug, Clone)]
struct DistEntry {
    dist: f32,
    id: String,
}

impl PartialEq for DistEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}

impl Eq for DistEntry {}

impl PartialOrd for DistEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Cosine distance on unit vectors: 1 - a.b
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

pub struct HnswIndex {
    dim: usize,
    ml: f64,
    nodes: HashMap<String, Node>,
    entry_point: Option<String>,
    max_level: u8,
}

impl HnswIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ml: 1.0 / (MAX_CONNECTIONS as f64).ln(),
            nodes: HashMap::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dim
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Sample an insertion level from the geometric walk:
    /// starting at 0, keep incrementing while uniform(0,1) < exp(-l * mL).
    fn sample_level(&self) -> u8 {
        let mut rng = rand::rng();
        let mut level: u8 = 0;
        while level < LEVEL_CAP && rng.random::<f64>() < (-(level as f64) * self.ml).exp() {
            level += 1;
        }
        level
    }

    /// Insert a vector under `id`. A duplicate id replaces the prior entry
    /// (delete-then-insert), keeping the graph invariants intact.
    pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(EngramError::InvalidInput(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dim
            )));
        }

        if self.nodes.contains_key(id) {
            self.remove(id);
        }

        let level = self.sample_level();
        let mut neighbors = HashMap::new();
        for l in 0..=level {
            neighbors.insert(l, HashSet::new());
        }

        let Some(entry) = self.entry_point.clone() else {
            // First node becomes the entry point.
            self.nodes.insert(id.to_string(), Node { vector, neighbors });
            self.entry_point = Some(id.to_string());
            self.max_level = level;
            return Ok(());
        };

        self.nodes
            .insert(id.to_string(), Node { vector: vector.clone(), neighbors });

        // Greedy descent through layers above the node's level.
        let mut current = entry;
        let mut l = self.max_level;
        while l > level {
            current = self.greedy_closest(&vector, current, l);
            l -= 1;
        }

        // Wire edges from the node's top layer down to 0.
        let mut lc = level.min(self.max_level);
        loop {
            let found = self.search_layer(&vector, &current, EF_CONSTRUCTION, lc);

            let closest: Vec<String> = found
                .iter()
                .take(MAX_CONNECTIONS)
                .map(|e| e.id.clone())
                .collect();

            for neighbor_id in &closest {
                if neighbor_id == id {
                    continue;
                }
                self.link(id, neighbor_id, lc);
                self.prune(neighbor_id, lc);
            }

            if let Some(first) = found.first() {
                current = first.id.clone();
            }

            if lc == 0 {
                break;
            }
            lc -= 1;
        }

        if level > self.max_level {
            self.entry_point = Some(id.to_string());
            self.max_level = level;
        }

        Ok(())
    }

    /// Remove a node, detaching it from every neighbor at every level.
    /// Returns true if the id was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };

        for (level, ids) in &node.neighbors {
            for neighbor_id in ids {
                if let Some(neighbor) = self.nodes.get_mut(neighbor_id) {
                    if let Some(set) = neighbor.neighbors.get_mut(level) {
                        set.remove(id);
                    }
                }
            }
        }

        if self.entry_point.as_deref() == Some(id) {
            // Soft policy: any survivor becomes the entry point, and its
            // highest occupied level becomes max_level. Subsequent inserts
            // self-heal if this undershoots.
            match self.nodes.iter().next() {
                Some((survivor_id, survivor)) => {
                    self.max_level = survivor.neighbors.keys().copied().max().unwrap_or(0);
                    self.entry_point = Some(survivor_id.clone());
                }
                None => {
                    self.entry_point = None;
                    self.max_level = 0;
                }
            }
        }

        true
    }

    /// Approximate k-nearest search. `ef` defaults to max(k, 10).
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            return Err(EngramError::InvalidInput(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }

        let Some(entry) = self.entry_point.clone() else {
            return Ok(Vec::new());
        };

        let ef = ef.unwrap_or_else(|| k.max(10));

        let mut current = entry;
        let mut l = self.max_level;
        while l >= 1 {
            current = self.greedy_closest(query, current, l);
            l -= 1;
        }

        let found = self.search_layer(query, &current, ef, 0);
        Ok(found
            .into_iter()
            .take(k)
            .map(|e| SearchHit {
                id: e.id,
                score: 1.0 - e.dist,
            })
            .collect())
    }

    /// Serialize the full graph (vectors + adjacency) for warm rebuilds.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            dim: self.dim,
            entry_point: self.entry_point.clone(),
            max_level: self.max_level,
            nodes: self.nodes.clone(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        Ok(Self {
            dim: snapshot.dim,
            ml: 1.0 / (MAX_CONNECTIONS as f64).ln(),
            nodes: snapshot.nodes,
            entry_point: snapshot.entry_point,
            max_level: snapshot.max_level,
        })
    }

    /// Greedy move to the closest neighbor at a layer until no neighbor
    /// improves on the current position.
    fn greedy_closest(&self, query: &[f32], start: String, level: u8) -> String {
        let mut current = start;
        let mut current_dist = match self.nodes.get(&current) {
            Some(node) => cosine_distance(query, &node.vector),
            None => return current,
        };

        loop {
            let mut improved = false;
            if let Some(node) = self.nodes.get(&current) {
                if let Some(neighbor_ids) = node.neighbors.get(&level) {
                    for neighbor_id in neighbor_ids {
                        if let Some(neighbor) = self.nodes.get(neighbor_id) {
                            let d = cosine_distance(query, &neighbor.vector);
                            if d < current_dist {
                                current_dist = d;
                                current = neighbor_id.clone();
                                improved = true;
                            }
                        }
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search within a single layer. Returns up to `ef` entries sorted
    /// by ascending distance.
    fn search_layer(&self, query: &[f32], entry: &str, ef: usize, level: u8) -> Vec<DistEntry> {
        let Some(entry_node) = self.nodes.get(entry) else {
            return Vec::new();
        };

        let entry_dist = cosine_distance(query, &entry_node.vector);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entry.to_string());

        // Candidates: min-heap by distance. Results: max-heap bounded at ef.
        let mut candidates: BinaryHeap<Reverse<DistEntry>> = BinaryHeap::new();
        let mut results: BinaryHeap<DistEntry> = BinaryHeap::new();
        candidates.push(Reverse(DistEntry {
            dist: entry_dist,
            id: entry.to_string(),
        }));
        results.push(DistEntry {
            dist: entry_dist,
            id: entry.to_string(),
        });

        while let Some(Reverse(candidate)) = candidates.pop() {
            let furthest = results.peek().map(|e| e.dist).unwrap_or(f32::INFINITY);
            if candidate.dist > furthest && results.len() >= ef {
                break;
            }

            let Some(node) = self.nodes.get(&candidate.id) else {
                continue;
            };
            let Some(neighbor_ids) = node.neighbors.get(&level) else {
                continue;
            };

            for neighbor_id in neighbor_ids {
                if !visited.insert(neighbor_id.clone()) {
                    continue;
                }
                let Some(neighbor) = self.nodes.get(neighbor_id) else {
                    continue;
                };
                let d = cosine_distance(query, &neighbor.vector);
                let furthest = results.peek().map(|e| e.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < furthest {
                    candidates.push(Reverse(DistEntry {
                        dist: d,
                        id: neighbor_id.clone(),
                    }));
                    results.push(DistEntry {
                        dist: d,
                        id: neighbor_id.clone(),
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort();
        sorted
    }

    /// Add a bidirectional edge between two nodes at a level.
    fn link(&mut self, a: &str, b: &str, level: u8) {
        if let Some(node) = self.nodes.get_mut(a) {
            node.neighbors
                .entry(level)
                .or_default()
                .insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.neighbors
                .entry(level)
                .or_default()
                .insert(a.to_string());
        }
    }

    /// Enforce the per-level fan-out cap on a node: keep the M closest
    /// neighbors by distance to the node, dropping the reverse edges of
    /// everything evicted.
    fn prune(&mut self, id: &str, level: u8) {
        let (vector, neighbor_ids) = match self.nodes.get(id) {
            Some(node) => match node.neighbors.get(&level) {
                Some(set) if set.len() > MAX_CONNECTIONS => {
                    (node.vector.clone(), set.iter().cloned().collect::<Vec<_>>())
                }
                _ => return,
            },
            None => return,
        };

        let mut ranked: Vec<DistEntry> = neighbor_ids
            .into_iter()
            .filter_map(|nid| {
                self.nodes.get(&nid).map(|n| DistEntry {
                    dist: cosine_distance(&vector, &n.vector),
                    id: nid,
                })
            })
            .collect();
        ranked.sort();

        let kept: HashSet<String> = ranked
            .iter()
            .take(MAX_CONNECTIONS)
            .map(|e| e.id.clone())
            .collect();
        let evicted: Vec<String> = ranked
            .iter()
            .skip(MAX_CONNECTIONS)
            .map(|e| e.id.clone())
            .collect();

        if let Some(node) = self.nodes.get_mut(id) {
            node.neighbors.insert(level, kept);
        }
        for evicted_id in evicted {
            if let Some(node) = self.nodes.get_mut(&evicted_id) {
                if let Some(set) = node.neighbors.get_mut(&level) {
                    set.remove(id);
                }
            }
        }
    }

    /// Verify the bidirectional-edge invariant. Test support.
    #[cfg(test)]
    fn edges_are_bidirectional(&self) -> bool {
        for (id, node) in &self.nodes {
            for (level, ids) in &node.neighbors {
                for neighbor_id in ids {
                    let ok = self
                        .nodes
                        .get(neighbor_id)
                        .and_then(|n| n.neighbors.get(level))
                        .is_some_and(|set| set.contains(id));
                    if !ok {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic unit vector for tests: a one-hot rotated by seed.
    fn unit_vec(dim: usize, seed: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[seed % dim] = 1.0;
        v
    }

    /// Unit vector mixing two axes, for graded similarity.
    fn blend_vec(dim: usize, a: usize, b: usize, weight: f32) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[a % dim] = weight;
        v[b % dim] = (1.0 - weight * weight).sqrt();
        v
    }

    #[test]
    fn test_empty_search_returns_nothing() {
        let index = HnswIndex::new(4);
        let hits = index.search(&unit_vec(4, 0), 5, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_insert_then_search_finds_it() {
        let mut index = HnswIndex::new(8);
        index.insert("a", unit_vec(8, 0)).unwrap();
        let hits = index.search(&unit_vec(8, 0), 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = HnswIndex::new(8);
        assert!(index.insert("a", unit_vec(4, 0)).is_err());
        assert!(index.search(&unit_vec(4, 0), 1, None).is_err());
    }

    #[test]
    fn test_every_insert_is_recallable() {
        let mut index = HnswIndex::new(16);
        for i in 0..40 {
            index.insert(&format!("n{i}"), unit_vec(16, i)).unwrap();
        }
        // k >= size: every inserted id must come back for its own vector.
        for i in 0..40 {
            let hits = index.search(&unit_vec(16, i), 40, Some(64)).unwrap();
            assert!(
                hits.iter().any(|h| h.id == format!("n{i}")),
                "n{i} missing from results"
            );
        }
    }

    #[test]
    fn test_ranking_follows_similarity() {
        let mut index = HnswIndex::new(8);
        index.insert("exact", blend_vec(8, 0, 1, 1.0)).unwrap();
        index.insert("close", blend_vec(8, 0, 1, 0.9)).unwrap();
        index.insert("far", blend_vec(8, 0, 1, 0.1)).unwrap();

        let hits = index.search(&unit_vec(8, 0), 3, None).unwrap();
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "close");
        assert_eq!(hits[2].id, "far");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[1].score > hits[2].score);
    }

    #[test]
    fn test_edges_stay_bidirectional() {
        let mut index = HnswIndex::new(8);
        for i in 0..60 {
            index
                .insert(&format!("n{i}"), blend_vec(8, i % 8, (i + 1) % 8, 0.7))
                .unwrap();
        }
        assert!(index.edges_are_bidirectional());

        for i in (0..60).step_by(3) {
            index.remove(&format!("n{i}"));
        }
        assert!(index.edges_are_bidirectional());
    }

    #[test]
    fn test_duplicate_insert_replaces() {
        let mut index = HnswIndex::new(8);
        index.insert("a", unit_vec(8, 0)).unwrap();
        index.insert("a", unit_vec(8, 3)).unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.search(&unit_vec(8, 3), 1, None).unwrap();
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut index = HnswIndex::new(8);
        assert!(!index.remove("ghost"));
        index.insert("a", unit_vec(8, 0)).unwrap();
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_entry_point_delete_keeps_index_searchable() {
        let mut index = HnswIndex::new(8);
        for i in 0..10 {
            index.insert(&format!("n{i}"), unit_vec(8, i)).unwrap();
        }
        let entry = index.entry_point.clone().unwrap();
        index.remove(&entry);
        assert_eq!(index.len(), 9);

        let hits = index.search(&unit_vec(8, 1), 9, Some(16)).unwrap();
        assert!(!hits.is_empty());
        // Everything still reachable.
        assert_eq!(hits.len(), 9.min(index.len()));
    }

    #[test]
    fn test_delete_to_empty_then_reinsert() {
        let mut index = HnswIndex::new(8);
        index.insert("a", unit_vec(8, 0)).unwrap();
        index.remove("a");
        assert!(index.entry_point.is_none());

        index.insert("b", unit_vec(8, 1)).unwrap();
        let hits = index.search(&unit_vec(8, 1), 1, None).unwrap();
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_fanout_capped() {
        let mut index = HnswIndex::new(4);
        for i in 0..80 {
            index
                .insert(&format!("n{i}"), blend_vec(4, 0, 1, (i as f32) / 80.0))
                .unwrap();
        }
        for node in index.nodes.values() {
            for set in node.neighbors.values() {
                assert!(set.len() <= MAX_CONNECTIONS);
            }
        }
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut index = HnswIndex::new(8);
        for i in 0..20 {
            index.insert(&format!("n{i}"), unit_vec(8, i)).unwrap();
        }
        let bytes = index.serialize().unwrap();
        let restored = HnswIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored.len(), 20);

        let hits = restored.search(&unit_vec(8, 3), 20, Some(32)).unwrap();
        assert!(hits.iter().any(|h| h.id == "n3"));
    }
}
