//! Bond topology expressed in global tags.

use crate::error::StoreError;

/// Source of bonded partners for a particle, by global tag.
pub trait BondTopology {
    /// Tags bonded to `tag`. Empty for unbonded particles.
    fn partners(&self, tag: u32) -> &[u32];
}

/// Compressed adjacency table built from a list of tag pairs.
#[derive(Debug, Clone, Default)]
pub struct BondTable {
    /// Start of each tag's partner list in `partners`; length `n_global + 1`.
    offsets: Vec<usize>,
    partners: Vec<u32>,
    num_bonds: usize,
}

impl BondTable {
    /// Build the table for `n_global` particles from undirected `bonds`.
    pub fn new(n_global: usize, bonds: &[[u32; 2]]) -> Result<Self, StoreError> {
        let mut counts = vec![0usize; n_global + 1];
        for bond in bonds {
            for &tag in bond {
                if tag as usize >= n_global {
                    return Err(StoreError::TagOutOfRange { tag, n_global });
                }
                counts[tag as usize + 1] += 1;
            }
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }
        let offsets = counts;

        let mut heads = offsets.clone();
        let mut partners = vec![0u32; offsets[n_global]];
        for &[a, b] in bonds {
            partners[heads[a as usize]] = b;
            heads[a as usize] += 1;
            partners[heads[b as usize]] = a;
            heads[b as usize] += 1;
        }

        Ok(Self { offsets, partners, num_bonds: bonds.len() })
    }

    /// Number of bonds.
    pub fn num_bonds(&self) -> usize {
        self.num_bonds
    }
}

impl BondTopology for BondTable {
    fn partners(&self, tag: u32) -> &[u32] {
        let t = tag as usize;
        if t + 1 >= self.offsets.len() {
            return &[];
        }
        &self.partners[self.offsets[t]..self.offsets[t + 1]]
    }
}
