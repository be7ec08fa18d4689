//! Voxel adjacency graph.
//!
//! Nodes are the voxels of one [`VoxelGrid`] in index order. Edges link
//! lattice neighbors under the configured [`Connectivity`] and carry the
//! world-space distance between centres. Every voxel becomes a node, so
//! isolated voxels stay in the graph with degree 0.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use glam::DVec3;
use phenomenal_core::{Connectivity, GraphOptions, LatticeFrame, VoxelGrid, VoxelIndex};

/// Lattice offsets of the positive half of a neighborhood.
///
/// Each undirected edge is generated once, from the node whose neighbor lies
/// at one of these offsets.
fn half_offsets(connectivity: Connectivity) -> Vec<(i32, i32, i32)> {
    let max_axes = match connectivity {
        Connectivity::Six => 1,
        Connectivity::Eighteen => 2,
        Connectivity::TwentySix => 3,
    };
    let mut offsets = Vec::new();
    for dz in -1..=1 {
        for dy in -1..=1 {
            for dx in -1..=1 {
                let axes = [dx, dy, dz].iter().filter(|d| **d != 0).count();
                if axes == 0 || axes > max_axes {
                    continue;
                }
                if (dz, dy, dx) > (0, 0, 0) {
                    offsets.push((dx, dy, dz));
                }
            }
        }
    }
    offsets
}

/// Union-find over node indices.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return false;
        }
        if self.size[a] < self.size[b] || (self.size[a] == self.size[b] && b < a) {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
        true
    }
}

/// Orders candidate links by length, then by node pair.
fn cmp_link(x: &(f64, usize, usize), y: &(f64, usize, usize)) -> Ordering {
    x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2))
}

/// Side of a bucket of the coarse spatial hash, in voxels.
const BUCKET: i32 = 8;

/// Coarse spatial hash of node positions for nearest-neighbor queries.
struct Buckets {
    cells: HashMap<(i32, i32, i32), Vec<usize>>,
    /// Largest Chebyshev bucket distance between two occupied buckets.
    extent: i32,
}

impl Buckets {
    fn key(v: VoxelIndex) -> (i32, i32, i32) {
        (
            v.x.div_euclid(BUCKET),
            v.y.div_euclid(BUCKET),
            v.z.div_euclid(BUCKET),
        )
    }

    fn new(nodes: &[VoxelIndex]) -> Self {
        let mut cells: HashMap<(i32, i32, i32), Vec<usize>> = HashMap::new();
        let (mut lo, mut hi) = ((i32::MAX, i32::MAX, i32::MAX), (i32::MIN, i32::MIN, i32::MIN));
        for (i, &v) in nodes.iter().enumerate() {
            let k = Self::key(v);
            lo = (lo.0.min(k.0), lo.1.min(k.1), lo.2.min(k.2));
            hi = (hi.0.max(k.0), hi.1.max(k.1), hi.2.max(k.2));
            cells.entry(k).or_default().push(i);
        }
        let extent = if cells.is_empty() {
            0
        } else {
            (hi.0 - lo.0).max(hi.1 - lo.1).max(hi.2 - lo.2)
        };
        Self { cells, extent }
    }

    /// Visits the buckets at Chebyshev distance exactly `r` from `center`.
    fn ring(&self, center: (i32, i32, i32), r: i32, mut visit: impl FnMut(&[usize])) {
        for dz in -r..=r {
            for dy in -r..=r {
                let on_face = dz.abs() == r || dy.abs() == r;
                let step = if on_face || r == 0 { 1 } else { 2 * r };
                let mut dx = -r;
                while dx <= r {
                    if let Some(nodes) = self.cells.get(&(center.0 + dx, center.1 + dy, center.2 + dz)) {
                        visit(nodes);
                    }
                    dx += step;
                }
            }
        }
    }

    /// Nearest node of another piece than `a`'s, as `(lattice distance, low, high)`.
    fn nearest_foreign(
        &self,
        graph: &VoxelGraph,
        labels: &[usize],
        a: usize,
    ) -> Option<(f64, usize, usize)> {
        let center = Self::key(graph.nodes[a]);
        let mut best: Option<(f64, usize, usize)> = None;
        for r in 0..=self.extent {
            // Nodes in ring r are at least (r - 1) * BUCKET + 1 voxels away.
            if let Some(found) = best {
                if f64::from((r - 1) * BUCKET + 1) > found.0 {
                    break;
                }
            }
            self.ring(center, r, |nodes| {
                for &b in nodes {
                    if labels[b] == labels[a] {
                        continue;
                    }
                    let candidate = (graph.lattice_distance(a, b), a.min(b), a.max(b));
                    if best.map_or(true, |cur| cmp_link(&candidate, &cur) == Ordering::Less) {
                        best = Some(candidate);
                    }
                }
            });
        }
        best
    }
}

/// Undirected weighted graph over the voxels of a grid.
#[derive(Debug, Clone)]
pub struct VoxelGraph {
    frame: LatticeFrame,
    nodes: Vec<VoxelIndex>,
    lookup: HashMap<VoxelIndex, usize>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl VoxelGraph {
    /// Builds the adjacency graph of `grid`.
    ///
    /// With `connect_all_points`, pieces that local linking leaves apart are
    /// bridged: first by the shortest links no longer than `gap_factor`
    /// voxels, then, if pieces remain, by linking each piece to the nearest
    /// voxel of another piece until the graph is connected.
    #[must_use]
    pub fn build(grid: &VoxelGrid, options: &GraphOptions) -> Self {
        let frame = grid.frame();
        let nodes: Vec<VoxelIndex> = grid.indices().collect();
        let lookup: HashMap<VoxelIndex, usize> =
            nodes.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let mut graph = Self {
            frame,
            adjacency: vec![Vec::new(); nodes.len()],
            nodes,
            lookup,
        };

        let offsets = half_offsets(options.connectivity);
        for a in 0..graph.nodes.len() {
            let v = graph.nodes[a];
            for &(dx, dy, dz) in &offsets {
                if let Some(&b) = graph.lookup.get(&v.offset(dx, dy, dz)) {
                    graph.link(a, b);
                }
            }
        }

        if options.connect_all_points {
            graph.bridge_gaps(options.gap_factor);
        }
        for list in &mut graph.adjacency {
            list.sort_by_key(|&(n, _)| n);
        }

        log::debug!(
            "adjacency graph: {} nodes, {} edges ({:?})",
            graph.node_count(),
            graph.edge_count(),
            options.connectivity
        );
        graph
    }

    fn link(&mut self, a: usize, b: usize) {
        let w = self.center(a).distance(self.center(b));
        self.adjacency[a].push((b, w));
        self.adjacency[b].push((a, w));
    }

    fn lattice_distance(&self, a: usize, b: usize) -> f64 {
        (self.nodes[a].as_ivec3() - self.nodes[b].as_ivec3())
            .as_dvec3()
            .length()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn bridge_gaps(&mut self, gap_factor: f64) {
        let n = self.nodes.len();
        let mut sets = DisjointSet::new(n);
        for a in 0..n {
            for &(b, _) in &self.adjacency[a] {
                sets.union(a, b);
            }
        }

        let reach = gap_factor.ceil() as i32;
        let mut candidates = Vec::new();
        for a in 0..n {
            let v = self.nodes[a];
            for dz in -reach..=reach {
                for dy in -reach..=reach {
                    for dx in -reach..=reach {
                        let Some(&b) = self.lookup.get(&v.offset(dx, dy, dz)) else {
                            continue;
                        };
                        if b <= a || sets.find(a) == sets.find(b) {
                            continue;
                        }
                        let d = self.lattice_distance(a, b);
                        if d <= gap_factor {
                            candidates.push((d, a, b));
                        }
                    }
                }
            }
        }
        candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let mut bridged = 0;
        for (_, a, b) in candidates {
            if sets.union(a, b) {
                self.link(a, b);
                bridged += 1;
            }
        }

        // Remaining pieces: every piece but the largest proposes its nearest
        // foreign voxel pair, the proposals go through the same union-find,
        // and rounds repeat until one piece is left. Each round at least
        // halves the piece count.
        let buckets = Buckets::new(&self.nodes);
        loop {
            let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for i in 0..n {
                members.entry(sets.find(i)).or_default().push(i);
            }
            if members.len() <= 1 {
                break;
            }
            let labels: Vec<usize> = (0..n).map(|i| sets.find(i)).collect();
            let largest = members
                .iter()
                .max_by(|x, y| x.1.len().cmp(&y.1.len()).then(y.1[0].cmp(&x.1[0])))
                .map(|(&root, _)| root);

            let mut proposals: Vec<(f64, usize, usize)> = members
                .iter()
                .filter(|(&root, _)| Some(root) != largest)
                .filter_map(|(_, piece)| {
                    piece
                        .iter()
                        .filter_map(|&a| buckets.nearest_foreign(self, &labels, a))
                        .min_by(cmp_link)
                })
                .collect();
            proposals.sort_by(cmp_link);

            let mut joined = false;
            for (_, a, b) in proposals {
                if sets.union(a, b) {
                    self.link(a, b);
                    bridged += 1;
                    joined = true;
                }
            }
            if !joined {
                break;
            }
        }

        if bridged > 0 {
            log::debug!("adjacency graph: bridged {bridged} gaps between pieces");
        }
    }

    /// Returns the lattice the nodes live on.
    #[must_use]
    pub fn frame(&self) -> LatticeFrame {
        self.frame
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of undirected edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Returns the voxel of every node, in node order.
    #[must_use]
    pub fn nodes(&self) -> &[VoxelIndex] {
        &self.nodes
    }

    /// Returns the voxel of node `i`.
    #[must_use]
    pub fn node(&self, i: usize) -> VoxelIndex {
        self.nodes[i]
    }

    /// Returns the node of a voxel, if the voxel is in the graph.
    #[must_use]
    pub fn index_of(&self, voxel: VoxelIndex) -> Option<usize> {
        self.lookup.get(&voxel).copied()
    }

    /// Returns `(neighbor, weight)` pairs of node `i`, ordered by neighbor.
    #[must_use]
    pub fn neighbors(&self, i: usize) -> &[(usize, f64)] {
        &self.adjacency[i]
    }

    /// Returns the number of neighbors of node `i`.
    #[must_use]
    pub fn degree(&self, i: usize) -> usize {
        self.adjacency[i].len()
    }

    /// Returns the world-space centre of node `i`.
    #[must_use]
    pub fn center(&self, i: usize) -> DVec3 {
        self.frame.center(self.nodes[i])
    }

    /// Iterates over every edge once as `(a, b, weight)` with `a < b`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.adjacency.iter().enumerate().flat_map(|(a, list)| {
            list.iter()
                .filter(move |(b, _)| a < *b)
                .map(move |&(b, w)| (a, b, w))
        })
    }

    /// Returns the connected components, each as sorted node indices,
    /// ordered by their smallest node.
    #[must_use]
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();
        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut queue = VecDeque::from([start]);
            let mut members = Vec::new();
            while let Some(i) = queue.pop_front() {
                members.push(i);
                for &(n, _) in &self.adjacency[i] {
                    if !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }

    /// Returns whether the graph has at most one component.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.components().len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(points: &[(i32, i32, i32)]) -> VoxelGrid {
        let frame = LatticeFrame::new(DVec3::ZERO, 0.5).unwrap();
        VoxelGrid::from_indices(frame, points.iter().map(|&(x, y, z)| VoxelIndex::new(x, y, z)))
    }

    fn options(connectivity: Connectivity) -> GraphOptions {
        GraphOptions {
            connectivity,
            ..GraphOptions::default()
        }
    }

    #[test]
    fn test_half_offsets_counts() {
        assert_eq!(half_offsets(Connectivity::Six).len(), 3);
        assert_eq!(half_offsets(Connectivity::Eighteen).len(), 9);
        assert_eq!(half_offsets(Connectivity::TwentySix).len(), 13);
    }

    #[test]
    fn test_cube_edge_counts() {
        let mut pts = Vec::new();
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    pts.push((x, y, z));
                }
            }
        }
        let g = grid(&pts);
        assert_eq!(VoxelGraph::build(&g, &options(Connectivity::Six)).edge_count(), 12);
        assert_eq!(VoxelGraph::build(&g, &options(Connectivity::Eighteen)).edge_count(), 24);
        assert_eq!(VoxelGraph::build(&g, &options(Connectivity::TwentySix)).edge_count(), 28);
    }

    #[test]
    fn test_weights_are_world_distances() {
        let g = grid(&[(0, 0, 0), (1, 1, 0)]);
        let graph = VoxelGraph::build(&g, &GraphOptions::default());
        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].2 - 0.5 * 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(VoxelGraph::build(&g, &options(Connectivity::Six)).edges().next().is_none());
    }

    #[test]
    fn test_isolated_voxels_are_nodes() {
        let g = grid(&[(0, 0, 0), (0, 0, 1), (5, 5, 5)]);
        let graph = VoxelGraph::build(&g, &GraphOptions::default());
        assert_eq!(graph.node_count(), 3);
        let isolated = graph.index_of(VoxelIndex::new(5, 5, 5)).unwrap();
        assert_eq!(graph.degree(isolated), 0);
        assert_eq!(graph.components().len(), 2);
        assert!(!graph.is_connected());
    }

    #[test]
    fn test_connect_all_points_bridges_small_gap() {
        let g = grid(&[(0, 0, 0), (0, 0, 1), (0, 0, 3), (0, 0, 4)]);
        let plain = VoxelGraph::build(&g, &GraphOptions::default());
        assert_eq!(plain.components().len(), 2);

        let mut opts = GraphOptions::default();
        opts.connect_all_points = true;
        let healed = VoxelGraph::build(&g, &opts);
        assert!(healed.is_connected());
        assert_eq!(healed.edge_count(), plain.edge_count() + 1);
        let a = healed.index_of(VoxelIndex::new(0, 0, 1)).unwrap();
        let b = healed.index_of(VoxelIndex::new(0, 0, 3)).unwrap();
        assert!(healed.neighbors(a).iter().any(|&(n, w)| n == b && (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_connect_all_points_joins_far_pieces() {
        let g = grid(&[(0, 0, 0), (0, 0, 1), (0, 0, 2), (9, 0, 0), (20, 20, 20)]);
        let mut opts = GraphOptions::default();
        opts.connect_all_points = true;
        let graph = VoxelGraph::build(&g, &opts);
        assert!(graph.is_connected());
        assert_eq!(graph.edge_count(), 2 + 2);
    }

    #[test]
    fn test_connect_all_points_scattered_specks() {
        let mut pts = Vec::new();
        for x in 0..12 {
            for y in 0..10 {
                for z in 0..10 {
                    pts.push((3 * x, 3 * y, 3 * z));
                }
            }
        }
        let g = grid(&pts);
        let mut opts = GraphOptions::default();
        opts.connect_all_points = true;
        let graph = VoxelGraph::build(&g, &opts);
        assert_eq!(graph.node_count(), 1200);
        assert!(graph.is_connected());
        // Every speck started alone, so the bridges form a spanning tree of
        // nearest-neighbor links.
        assert_eq!(graph.edge_count(), 1199);
        assert!(graph.edges().all(|(_, _, w)| (w - 1.5).abs() < 1e-12));
    }

    #[test]
    fn test_far_pieces_link_to_nearest_piece() {
        let g = grid(&[(0, 0, 0), (0, 0, 1), (0, 0, 2), (40, 0, 0), (43, 0, 0)]);
        let mut opts = GraphOptions::default();
        opts.connect_all_points = true;
        let graph = VoxelGraph::build(&g, &opts);
        assert!(graph.is_connected());
        let a = graph.index_of(VoxelIndex::new(40, 0, 0)).unwrap();
        let b = graph.index_of(VoxelIndex::new(43, 0, 0)).unwrap();
        let c = graph.index_of(VoxelIndex::new(0, 0, 0)).unwrap();
        assert!(graph.neighbors(a).iter().any(|&(n, _)| n == b));
        assert!(graph.neighbors(a).iter().any(|&(n, _)| n == c));
        assert_eq!(graph.degree(b), 1);
    }

    #[test]
    fn test_components_ordered_by_smallest_node() {
        let g = grid(&[(0, 0, 0), (3, 0, 0), (0, 0, 1), (3, 0, 1)]);
        let graph = VoxelGraph::build(&g, &GraphOptions::default());
        let components = graph.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0][0], 0);
        assert!(components.iter().all(|c| c.windows(2).all(|w| w[0] < w[1])));
    }
}
