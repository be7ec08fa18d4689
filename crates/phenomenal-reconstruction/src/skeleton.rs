//! Shortest-path-tree skeletonization.
//!
//! Each connected component of the graph is processed on its own:
//!
//! 1. Dijkstra from the component root gives geodesic distances and a
//!    shortest-path tree.
//! 2. Nodes are visited from the farthest to the closest. A node not yet
//!    explained by the skeleton becomes a tip: its tree path back to the
//!    skeleton is added as a branch if it is long enough, and the voxels
//!    around the path are marked explained either way.
//! 3. The resulting tree is cut into maximal simple paths at junctions and
//!    leaves. A child path starts at the junction it branches from.
//! 4. Every voxel is claimed by the geodesically nearest path node. On equal
//!    distance the segment created first wins.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use phenomenal_core::{
    PhenomenalError, Result, SegmentId, Skeleton, SkeletonOptions, SkeletonSegment, VoxelGrid,
    VoxelIndex,
};

use crate::graph::VoxelGraph;

/// Min-heap entry ordered by cost, then label, then node.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    cost: f64,
    label: usize,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the smallest key first.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.label.cmp(&self.label))
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Scratch state shared by all components; components touch disjoint nodes.
struct Workspace {
    dist: Vec<f64>,
    parent: Vec<Option<usize>>,
    on_skeleton: Vec<bool>,
    covered: Vec<bool>,
    reach: Vec<f64>,
    claim: Vec<Option<(f64, usize)>>,
}

impl Workspace {
    fn new(n: usize) -> Self {
        Self {
            dist: vec![f64::INFINITY; n],
            parent: vec![None; n],
            on_skeleton: vec![false; n],
            covered: vec![false; n],
            reach: vec![f64::INFINITY; n],
            claim: vec![None; n],
        }
    }

    fn shortest_paths(&mut self, graph: &VoxelGraph, root: usize) {
        let mut heap = BinaryHeap::new();
        self.dist[root] = 0.0;
        heap.push(Frontier {
            cost: 0.0,
            label: 0,
            node: root,
        });
        while let Some(Frontier { cost, node, .. }) = heap.pop() {
            if cost > self.dist[node] {
                continue;
            }
            for &(next, w) in graph.neighbors(node) {
                let d = cost + w;
                if d < self.dist[next] {
                    self.dist[next] = d;
                    self.parent[next] = Some(node);
                    heap.push(Frontier {
                        cost: d,
                        label: 0,
                        node: next,
                    });
                }
            }
        }
    }

    /// Marks every node within `radius` of `sources` as explained.
    fn cover(&mut self, graph: &VoxelGraph, sources: &[usize], radius: f64) {
        let mut heap = BinaryHeap::new();
        for &s in sources {
            if self.reach[s] > 0.0 {
                self.reach[s] = 0.0;
                self.covered[s] = true;
                heap.push(Frontier {
                    cost: 0.0,
                    label: 0,
                    node: s,
                });
            }
        }
        while let Some(Frontier { cost, node, .. }) = heap.pop() {
            if cost > self.reach[node] {
                continue;
            }
            for &(next, w) in graph.neighbors(node) {
                let d = cost + w;
                if d <= radius && d < self.reach[next] {
                    self.reach[next] = d;
                    self.covered[next] = true;
                    heap.push(Frontier {
                        cost: d,
                        label: 0,
                        node: next,
                    });
                }
            }
        }
    }
}

/// Builds the skeleton of `grid` rooted at its lowest voxel.
///
/// Components that do not contain the root are rooted at their own lowest
/// voxel. An empty grid gives an empty skeleton.
#[must_use]
pub fn skeletonize(grid: &VoxelGrid, graph: &VoxelGraph, options: &SkeletonOptions) -> Skeleton {
    let root = grid.lowest().and_then(|v| graph.index_of(v));
    build(grid, graph, root, options)
}

/// Builds the skeleton of `grid` with an explicit root voxel.
pub fn skeletonize_from(
    grid: &VoxelGrid,
    graph: &VoxelGraph,
    root: VoxelIndex,
    options: &SkeletonOptions,
) -> Result<Skeleton> {
    let Some(root) = graph.index_of(root) else {
        return Err(PhenomenalError::InvalidOption {
            name: "skeleton.root",
            reason: format!("voxel [{}, {}, {}] is not in the graph", root.x, root.y, root.z),
        });
    };
    Ok(build(grid, graph, Some(root), options))
}

/// Returns the lowest node of a component, ties broken by node order.
fn lowest_node(graph: &VoxelGraph, members: &[usize]) -> usize {
    members
        .iter()
        .copied()
        .min_by_key(|&i| (graph.node(i).z, i))
        .unwrap_or_default()
}

fn build(
    grid: &VoxelGrid,
    graph: &VoxelGraph,
    root: Option<usize>,
    options: &SkeletonOptions,
) -> Skeleton {
    let frame = grid.frame();
    let size = frame.voxel_size();
    let components = graph.components();
    let mut ws = Workspace::new(graph.node_count());
    let mut segments = Vec::new();

    for (component, members) in components.iter().enumerate() {
        let croot = root
            .filter(|r| members.binary_search(r).is_ok())
            .unwrap_or_else(|| lowest_node(graph, members));
        let paths = trace_component(graph, &mut ws, members, croot, options, size);
        let first = segments.len();
        let claimed = claim_voxels(graph, &mut ws, &paths, first);

        for ((nodes, parent), voxels) in paths.into_iter().zip(claimed) {
            let id = SegmentId(segments.len());
            let polyline = nodes.iter().map(|&n| graph.center(n)).collect();
            let voxels: BTreeSet<VoxelIndex> = voxels.into_iter().map(|n| graph.node(n)).collect();
            segments.push(SkeletonSegment::new(
                id,
                parent.map(|p| SegmentId(first + p)),
                component,
                polyline,
                voxels,
            ));
        }
    }

    if components.len() > 1 {
        log::warn!(
            "skeleton: voxel graph has {} connected components, plant is reported as multi-component",
            components.len()
        );
    }
    log::info!(
        "skeleton: {} segments over {} voxels",
        segments.len(),
        graph.node_count()
    );
    Skeleton::new(frame, segments, components.len())
}

/// Extracts the branch tree of one component and cuts it into paths.
///
/// Returns each path as node indices with the position of its parent path.
fn trace_component(
    graph: &VoxelGraph,
    ws: &mut Workspace,
    members: &[usize],
    root: usize,
    options: &SkeletonOptions,
    size: f64,
) -> Vec<(Vec<usize>, Option<usize>)> {
    let radius = options.coverage_radius * size;
    let min_length = options.min_branch_length * size;

    ws.shortest_paths(graph, root);
    ws.on_skeleton[root] = true;
    ws.cover(graph, &[root], radius);

    let mut tips = members.to_vec();
    tips.sort_by(|&a, &b| ws.dist[b].total_cmp(&ws.dist[a]).then(a.cmp(&b)));

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut branch_count = 0;
    for tip in tips {
        if ws.covered[tip] {
            continue;
        }
        let mut path = vec![tip];
        let mut cur = tip;
        while !ws.on_skeleton[cur] {
            match ws.parent[cur] {
                Some(p) => {
                    cur = p;
                    path.push(cur);
                }
                None => break,
            }
        }
        path.reverse();
        let attach = path[0];
        let fresh = &path[1..];
        let length = ws.dist[tip] - ws.dist[attach];
        if branch_count == 0 || length >= min_length {
            for pair in path.windows(2) {
                children.entry(pair[0]).or_default().push(pair[1]);
            }
            for &n in fresh {
                ws.on_skeleton[n] = true;
            }
            branch_count += 1;
        }
        ws.cover(graph, fresh, radius);
    }

    let mut paths: Vec<(Vec<usize>, Option<usize>)> = Vec::new();
    if kids(&children, root).is_empty() {
        paths.push((vec![root], None));
        return paths;
    }
    let mut stack: Vec<(usize, usize, Option<usize>)> =
        kids(&children, root).iter().rev().map(|&c| (root, c, None)).collect();
    while let Some((start, first, parent)) = stack.pop() {
        let mut nodes = vec![start, first];
        let mut cur = first;
        while let [only] = kids(&children, cur) {
            cur = *only;
            nodes.push(cur);
        }
        let id = paths.len();
        paths.push((nodes, parent));
        for &c in kids(&children, cur).iter().rev() {
            stack.push((cur, c, Some(id)));
        }
    }
    paths
}

fn kids(children: &HashMap<usize, Vec<usize>>, node: usize) -> &[usize] {
    children.get(&node).map_or(&[], Vec::as_slice)
}

/// Assigns every node reachable from the paths to the nearest path node.
///
/// Returns the claimed nodes of each path, in path order.
fn claim_voxels(
    graph: &VoxelGraph,
    ws: &mut Workspace,
    paths: &[(Vec<usize>, Option<usize>)],
    first_label: usize,
) -> Vec<Vec<usize>> {
    let mut heap = BinaryHeap::new();
    for (label, (nodes, _)) in paths.iter().enumerate() {
        let label = first_label + label;
        for &n in nodes {
            if ws.claim[n].is_none() {
                ws.claim[n] = Some((0.0, label));
                heap.push(Frontier {
                    cost: 0.0,
                    label,
                    node: n,
                });
            }
        }
    }

    let mut claimed = vec![Vec::new(); paths.len()];
    while let Some(Frontier { cost, label, node }) = heap.pop() {
        if ws.claim[node] != Some((cost, label)) {
            continue;
        }
        claimed[label - first_label].push(node);
        for &(next, w) in graph.neighbors(node) {
            let key = (cost + w, label);
            let better = ws.claim[next].map_or(true, |(c, l)| {
                key.0.total_cmp(&c).then(key.1.cmp(&l)) == Ordering::Less
            });
            if better {
                ws.claim[next] = Some(key);
                heap.push(Frontier {
                    cost: key.0,
                    label,
                    node: next,
                });
            }
        }
    }
    claimed
}
