//! Row-major 3D indexer.

/// Maps `(i, j, k)` triples on a `w x h x d` grid to flat indices and back.
///
/// `i` varies fastest: `index = i + w * (j + h * k)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Index3D {
    w: u32,
    h: u32,
    d: u32,
}

impl Index3D {
    /// Create an indexer for a `w x h x d` grid.
    pub fn new(w: u32, h: u32, d: u32) -> Self {
        Self { w, h, d }
    }

    /// Create an indexer from `[w, h, d]`.
    pub fn from_dims(dims: [u32; 3]) -> Self {
        Self::new(dims[0], dims[1], dims[2])
    }

    /// Grid dimensions `[w, h, d]`.
    pub fn dims(&self) -> [u32; 3] {
        [self.w, self.h, self.d]
    }

    /// Number of grid points.
    pub fn num_elements(&self) -> usize {
        self.w as usize * self.h as usize * self.d as usize
    }

    /// Flat index of `(i, j, k)`.
    #[inline]
    pub fn index(&self, i: u32, j: u32, k: u32) -> usize {
        debug_assert!(i < self.w && j < self.h && k < self.d);
        i as usize + self.w as usize * (j as usize + self.h as usize * k as usize)
    }

    /// Flat index of a triple.
    #[inline]
    pub fn index_of(&self, t: [u32; 3]) -> usize {
        self.index(t[0], t[1], t[2])
    }

    /// Inverse of [`Index3D::index`].
    #[inline]
    pub fn triple(&self, idx: usize) -> [u32; 3] {
        let w = self.w as usize;
        let h = self.h as usize;
        [(idx % w) as u32, ((idx / w) % h) as u32, (idx / (w * h)) as u32]
    }

    /// Whether a signed triple lies inside the grid.
    pub fn contains(&self, t: [i32; 3]) -> bool {
        let dims = self.dims();
        (0..3).all(|a| t[a] >= 0 && (t[a] as u32) < dims[a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_triple_inverse() {
        let idx = Index3D::new(3, 4, 5);
        assert_eq!(idx.num_elements(), 60);
        for n in 0..idx.num_elements() {
            let t = idx.triple(n);
            assert_eq!(idx.index_of(t), n);
        }
    }

    #[test]
    fn x_varies_fastest() {
        let idx = Index3D::new(3, 4, 5);
        assert_eq!(idx.index(1, 0, 0), 1);
        assert_eq!(idx.index(0, 1, 0), 3);
        assert_eq!(idx.index(0, 0, 1), 12);
    }

    #[test]
    fn contains_signed() {
        let idx = Index3D::new(2, 2, 2);
        assert!(idx.contains([1, 1, 1]));
        assert!(!idx.contains([-1, 0, 0]));
        assert!(!idx.contains([0, 2, 0]));
    }
}
