//! Weighted union-find over dense node indices.

/// Disjoint sets of nodes `0..len`, each set carrying the sum of its
/// members' weights.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    weight: Vec<usize>,
}

impl UnionFind {
    /// One singleton set per weight.
    pub fn new(weights: Vec<usize>) -> Self {
        let len = weights.len();
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
            weight: weights,
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of `x`'s set, halving the path on the way up.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`, returning the new representative.
    /// The larger set's root survives.
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let mut x = self.find(a);
        let mut y = self.find(b);
        if x == y {
            return x;
        }
        if self.size[x] < self.size[y] {
            std::mem::swap(&mut x, &mut y);
        }
        self.parent[y] = x;
        self.size[x] += self.size[y];
        self.weight[x] += self.weight[y];
        x
    }

    /// Total weight of the set rooted at `root`.
    ///
    /// Only meaningful for a representative returned by [`UnionFind::find`].
    pub fn set_weight(&self, root: usize) -> usize {
        self.weight[root]
    }

    pub fn set_size(&self, root: usize) -> usize {
        self.size[root]
    }
}
