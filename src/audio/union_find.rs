/// Array-backed disjoint-set forest over arena indices.
///
/// Union by rank with path halving. Every set also remembers its oldest
/// (lowest) index, which gives clusters an identity that survives merges.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    oldest: Vec<usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Adds a singleton set and returns its index.
    pub fn push(&mut self) -> usize {
        let index = self.parent.len();
        self.parent.push(index);
        self.rank.push(0);
        self.oldest.push(index);
        index
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Root lookup without compression, for shared access.
    pub fn root(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }

    /// Merges the sets holding `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let (child, root) = if self.rank[ra] < self.rank[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[child] = root;
        if self.rank[child] == self.rank[root] {
            self.rank[root] += 1;
        }
        self.oldest[root] = self.oldest[root].min(self.oldest[child]);
        true
    }

    pub fn connected(&self, a: usize, b: usize) -> bool {
        self.root(a) == self.root(b)
    }

    /// Lowest index ever added to the set containing `x`.
    pub fn oldest(&self, x: usize) -> usize {
        self.oldest[self.root(x)]
    }
}
