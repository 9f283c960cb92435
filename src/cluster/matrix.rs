//! Symmetric distance matrix over the active set.
//!
//! Values live in a fixed `capacity × capacity` slot grid; a permutation
//! (`order`) maps active indices to slots. Removing a row/column drops its
//! entry from `order`, shifting the later indices down (O(n) in the active
//! count). Stored values never move, and ties still resolve by active index
//! so the surviving entries stay aligned with the caller's active list.

/// Squared distances between active nodes, indexed by active position.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    capacity: usize,
    values: Vec<f64>,
    order: Vec<usize>,
}

/// Position and value of a matrix minimum, with `row >= col`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixMin {
    /// Larger active index.
    pub row: usize,
    /// Smaller active index (equal to `row` for a diagonal hit).
    pub col: usize,
    /// Squared distance.
    pub value: f64,
}

impl MatrixMin {
    /// True for a diagonal (stop) entry.
    pub fn is_diagonal(&self) -> bool {
        self.row == self.col
    }
}

impl DistanceMatrix {
    /// Zero matrix of side `size`.
    pub fn zeros(size: usize) -> Self {
        Self {
            capacity: size,
            values: vec![0.0; size * size],
            order: (0..size).collect(),
        }
    }

    /// Fill from `f(i, j)` evaluated on the lower triangle (`j <= i`) and mirrored.
    pub fn from_lower<F>(size: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut m = Self::zeros(size);
        for i in 0..size {
            for j in 0..=i {
                m.set(i, j, f(i, j));
            }
        }
        m
    }

    /// Number of active rows.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no rows remain.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Backing slot of active index `i`.
    #[inline]
    pub fn slot(&self, i: usize) -> usize {
        self.order[i]
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        self.order[i] * self.capacity + self.order[j]
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.offset(i, j)]
    }

    /// Set `(i, j)` and `(j, i)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let a = self.offset(i, j);
        let b = self.offset(j, i);
        self.values[a] = value;
        self.values[b] = value;
    }

    /// Row `i` in active order.
    pub fn row(&self, i: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(move |j| self.get(i, j))
    }

    /// Drop row and column `i`; later indices shift down by one.
    ///
    /// Linear in the active count; no stored value is copied.
    pub fn remove(&mut self, i: usize) {
        let _ = self.order.remove(i);
    }

    /// Minimum over the lower triangle.
    ///
    /// Rows are scanned in ascending order and columns ascending within a
    /// row; the first strictly smaller value wins, so ties resolve to the
    /// lowest row and then the lowest column. NaN entries are never selected.
    pub fn argmin(&self, include_diagonal: bool) -> Option<MatrixMin> {
        let mut best: Option<MatrixMin> = None;
        for row in 0..self.len() {
            let end = if include_diagonal { row + 1 } else { row };
            for col in 0..end {
                let value = self.get(row, col);
                if value.is_nan() {
                    continue;
                }
                if best.map_or(true, |b| value < b.value) {
                    best = Some(MatrixMin { row, col, value });
                }
            }
        }
        best
    }

    /// Dense copy in active order, for inspection.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.len()).map(|i| self.row(i).collect()).collect()
    }
}
