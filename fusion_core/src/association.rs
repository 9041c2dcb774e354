//! Data association: a sparse cost graph between rows (tracks) and columns
//! (detections, or AIS tracks when the fuser pairs sensors), split into
//! independent clusters and solved greedily or optimally.
//!
//! # Ties
//! Equal costs resolve to the lowest row, then the lowest column. The
//! optimal solver gets this through a cost perturbation far below any
//! physically meaningful difference; greedy gets it from its sort order.
//! Columns with several equal-cost candidates are reported as ambiguous.

use crate::config::AssignmentStrategy;
use rayon::prelude::*;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Cost graph
// ---------------------------------------------------------------------------

/// One admissible (row, column) pairing and its cost.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub row: usize,
    pub col: usize,
    pub cost: f64,
}

/// Sparse bipartite cost graph; only gated pairs are present.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub rows: usize,
    pub cols: usize,
    pub edges: Vec<Edge>,
}

impl BipartiteGraph {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            edges: Vec::new(),
        }
    }

    pub fn add_edge(&mut self, row: usize, col: usize, cost: f64) {
        self.edges.push(Edge { row, col, cost });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Clusters (disjoint-set over rows and columns)
// ---------------------------------------------------------------------------

/// Disjoint sets with path compression and union by size.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn root(&mut self, x: usize) -> usize {
        let mut r = x;
        while self.parent[r] != r {
            r = self.parent[r];
        }
        let mut cur = x;
        while self.parent[cur] != r {
            let next = self.parent[cur];
            self.parent[cur] = r;
            cur = next;
        }
        r
    }

    fn join(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.root(a), self.root(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Rows and columns connected through gated edges; solved independently.
#[derive(Clone, Debug)]
pub struct Cluster {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub edges: Vec<Edge>,
}

/// Split the graph into clusters, ordered by their smallest row.
///
/// Row `i` is node `i`, column `j` is node `rows + j`.
pub fn clusters(graph: &BipartiteGraph) -> Vec<Cluster> {
    let mut sets = DisjointSets::new(graph.rows + graph.cols);
    for e in &graph.edges {
        sets.join(e.row, graph.rows + e.col);
    }

    let mut by_root: BTreeMap<usize, Vec<Edge>> = BTreeMap::new();
    for e in &graph.edges {
        by_root.entry(sets.root(e.row)).or_default().push(*e);
    }

    let mut out: Vec<Cluster> = by_root
        .into_values()
        .map(|edges| {
            let mut rows: Vec<usize> = edges.iter().map(|e| e.row).collect();
            let mut cols: Vec<usize> = edges.iter().map(|e| e.col).collect();
            rows.sort_unstable();
            rows.dedup();
            cols.sort_unstable();
            cols.dedup();
            Cluster { rows, cols, edges }
        })
        .collect();
    out.sort_by_key(|c| c.rows[0]);
    out
}

// ---------------------------------------------------------------------------
// Assignment result
// ---------------------------------------------------------------------------

/// A column that had more than one equally good row.
#[derive(Clone, Debug, PartialEq)]
pub struct Ambiguity {
    pub col: usize,
    pub candidates: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Assignment {
    /// Matched (row, col) pairs, sorted by row
    pub pairs: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
    pub ambiguities: Vec<Ambiguity>,
}

impl Assignment {
    /// Column matched to each row, indexed by row.
    pub fn by_row(&self, rows: usize) -> Vec<Option<usize>> {
        let mut out = vec![None; rows];
        for &(r, c) in &self.pairs {
            out[r] = Some(c);
        }
        out
    }
}

/// Solve the whole graph: clusters are solved in parallel and merged.
pub fn solve(graph: &BipartiteGraph, strategy: AssignmentStrategy) -> Assignment {
    let mut pairs: Vec<(usize, usize)> = clusters(graph)
        .par_iter()
        .flat_map_iter(|c| match strategy {
            AssignmentStrategy::Greedy => greedy_solve(c),
            AssignmentStrategy::Optimal => optimal_solve(c),
        })
        .collect();
    pairs.sort_unstable();

    let mut row_taken = vec![false; graph.rows];
    let mut col_taken = vec![false; graph.cols];
    for &(r, c) in &pairs {
        row_taken[r] = true;
        col_taken[c] = true;
    }

    Assignment {
        unmatched_rows: (0..graph.rows).filter(|&r| !row_taken[r]).collect(),
        unmatched_cols: (0..graph.cols).filter(|&c| !col_taken[c]).collect(),
        ambiguities: find_ambiguities(graph),
        pairs,
    }
}

/// Columns whose best cost is shared by more than one row.
fn find_ambiguities(graph: &BipartiteGraph) -> Vec<Ambiguity> {
    // col -> (best cost, rows at that cost)
    let mut best: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for e in &graph.edges {
        let Some(entry) = best.get_mut(&e.col) else {
            best.insert(e.col, (e.cost, 1));
            continue;
        };
        let tol = 1e-9 * entry.0.abs().max(1.0);
        if e.cost < entry.0 - tol {
            *entry = (e.cost, 1);
        } else if (e.cost - entry.0).abs() <= tol {
            entry.1 += 1;
        }
    }
    best.into_iter()
        .filter(|(_, (_, n))| *n > 1)
        .map(|(col, (_, candidates))| Ambiguity { col, candidates })
        .collect()
}

// ---------------------------------------------------------------------------
// Greedy nearest neighbour
// ---------------------------------------------------------------------------

/// Repeatedly take the cheapest remaining pair (ties: lowest row, then
/// lowest column).
pub fn greedy_solve(cluster: &Cluster) -> Vec<(usize, usize)> {
    let mut edges = cluster.edges.clone();
    edges.sort_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then(a.row.cmp(&b.row))
            .then(a.col.cmp(&b.col))
    });

    let mut pairs = Vec::new();
    for e in edges {
        let taken = pairs.iter().any(|&(r, c)| r == e.row || c == e.col);
        if !taken {
            pairs.push((e.row, e.col));
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Optimal assignment: Kuhn-Munkres with potentials, O(n³)
// ---------------------------------------------------------------------------

/// Globally optimal assignment for one cluster.
///
/// Missing edges become a filler cost above every real edge, so a row that
/// ends up on a filler cell is unmatched.
pub fn optimal_solve(cluster: &Cluster) -> Vec<(usize, usize)> {
    let (nr, nc) = (cluster.rows.len(), cluster.cols.len());
    if nr == 0 || nc == 0 {
        return Vec::new();
    }
    let n = nr.max(nc);

    let max_cost = cluster.edges.iter().map(|e| e.cost).fold(0.0f64, f64::max);
    // Tie-break perturbation: rows then columns, both far below 1 mm
    let eps = 1e-9 * (1.0 + max_cost);
    let filler = 2.0 * max_cost + 1.0 + eps * (n * n) as f64;

    let mut matrix = vec![filler; n * n];
    let mut real = vec![false; n * n];
    for e in &cluster.edges {
        let (Ok(i), Ok(j)) = (cluster.rows.binary_search(&e.row), cluster.cols.binary_search(&e.col))
        else {
            continue;
        };
        let cell = i * n + j;
        matrix[cell] = e.cost + eps * cell as f64;
        real[cell] = true;
    }

    min_cost_matching(&matrix, n)
        .into_iter()
        .enumerate()
        .filter(|&(i, j)| i < nr && j < nc && real[i * n + j])
        .map(|(i, j)| (cluster.rows[i], cluster.cols[j]))
        .collect()
}

/// Minimum-cost perfect matching on a square row-major `n × n` matrix.
/// Returns the column assigned to each row.
fn min_cost_matching(matrix: &[f64], n: usize) -> Vec<usize> {
    // Index 0 is a virtual column; real rows/columns are 1-based here
    let mut row_pot = vec![0.0f64; n + 1];
    let mut col_pot = vec![0.0f64; n + 1];
    let mut owner = vec![0usize; n + 1];
    let mut prev_col = vec![0usize; n + 1];

    for row in 1..=n {
        owner[0] = row;
        let mut col = 0usize;
        let mut slack = vec![f64::INFINITY; n + 1];
        let mut visited = vec![false; n + 1];

        // Grow a shortest alternating path until it reaches a free column
        while owner[col] != 0 {
            visited[col] = true;
            let r = owner[col];
            let mut delta = f64::INFINITY;
            let mut next = 0;
            for j in 1..=n {
                if visited[j] {
                    continue;
                }
                let reduced = matrix[(r - 1) * n + (j - 1)] - row_pot[r] - col_pot[j];
                if reduced < slack[j] {
                    slack[j] = reduced;
                    prev_col[j] = col;
                }
                if slack[j] < delta {
                    delta = slack[j];
                    next = j;
                }
            }
            for j in 0..=n {
                if visited[j] {
                    row_pot[owner[j]] += delta;
                    col_pot[j] -= delta;
                } else {
                    slack[j] -= delta;
                }
            }
            col = next;
        }

        while col != 0 {
            let back = prev_col[col];
            owner[col] = owner[back];
            col = back;
        }
    }

    let mut assigned = vec![0usize; n];
    for j in 1..=n {
        if owner[j] != 0 {
            assigned[owner[j] - 1] = j - 1;
        }
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(rows: usize, cols: usize, edges: &[(usize, usize, f64)]) -> BipartiteGraph {
        let mut g = BipartiteGraph::new(rows, cols);
        for &(r, c, cost) in edges {
            g.add_edge(r, c, cost);
        }
        g
    }

    #[test]
    fn dense_matrix_reaches_known_optimum() {
        // Best: r0→c1 (1), r1→c0 (2), r2→c2 (2) = 5
        let m = [4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0];
        let assigned = min_cost_matching(&m, 3);
        let total: f64 = assigned.iter().enumerate().map(|(r, &c)| m[r * 3 + c]).sum();
        assert!((total - 5.0).abs() < 1e-9, "total {total}");
    }

    #[test]
    fn disconnected_pairs_form_separate_clusters() {
        let g = graph(4, 4, &[(0, 0, 1.0), (2, 3, 2.0), (2, 1, 4.0)]);
        let cs = clusters(&g);
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].rows, vec![0]);
        assert_eq!(cs[1].rows, vec![2]);
        assert_eq!(cs[1].cols, vec![1, 3]);
    }

    #[test]
    fn optimal_beats_greedy_on_crossing() {
        // Greedy grabs (0,0)=1 and is left with (1,1)=10; optimal takes 2+2
        let g = graph(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 10.0)]);
        let greedy = solve(&g, AssignmentStrategy::Greedy);
        assert_eq!(greedy.pairs, vec![(0, 0), (1, 1)]);
        let optimal = solve(&g, AssignmentStrategy::Optimal);
        assert_eq!(optimal.pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn non_edges_are_never_matched() {
        // Row 1 has no edge to column 0; it must stay unmatched
        let g = graph(2, 2, &[(0, 0, 5.0), (0, 1, 1.0)]);
        let a = solve(&g, AssignmentStrategy::Optimal);
        assert_eq!(a.pairs, vec![(0, 1)]);
        assert_eq!(a.unmatched_rows, vec![1]);
        assert_eq!(a.unmatched_cols, vec![0]);
    }

    #[test]
    fn equal_costs_pick_lowest_row_and_report_ambiguity() {
        let g = graph(2, 1, &[(1, 0, 50.0), (0, 0, 50.0)]);
        for strategy in [AssignmentStrategy::Greedy, AssignmentStrategy::Optimal] {
            let a = solve(&g, strategy);
            assert_eq!(a.pairs, vec![(0, 0)], "{strategy:?}");
            assert_eq!(a.unmatched_rows, vec![1]);
            assert_eq!(a.ambiguities, vec![Ambiguity { col: 0, candidates: 2 }]);
        }
    }

    #[test]
    fn rows_without_edges_are_unmatched() {
        let g = graph(3, 2, &[(1, 1, 3.0)]);
        let a = solve(&g, AssignmentStrategy::Optimal);
        assert_eq!(a.pairs, vec![(1, 1)]);
        assert_eq!(a.unmatched_rows, vec![0, 2]);
        assert_eq!(a.unmatched_cols, vec![0]);
        assert_eq!(a.by_row(3), vec![None, Some(1), None]);
    }
}
