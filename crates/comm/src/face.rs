//! The six faces of a sub-box and bit sets over them.
//!
//! Faces are always visited in the order east, west, north, south, up, down.
//! Face `f` has bit `1 << f.index()`.

use bytemuck::{Pod, Zeroable};

/// One face of a rank's sub-box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Face {
    /// +x
    East = 0,
    /// -x
    West = 1,
    /// +y
    North = 2,
    /// -y
    South = 3,
    /// +z
    Up = 4,
    /// -z
    Down = 5,
}

impl Face {
    /// All faces in communication order.
    pub const ALL: [Face; 6] = [
        Face::East,
        Face::West,
        Face::North,
        Face::South,
        Face::Up,
        Face::Down,
    ];

    /// Position in [`Face::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Axis normal to the face (0 = x).
    #[inline]
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    /// Whether the face is on the `+` side of its axis.
    #[inline]
    pub fn is_upper(self) -> bool {
        self.index() % 2 == 0
    }

    /// Face across the sub-box.
    pub fn opposite(self) -> Face {
        match self {
            Face::East => Face::West,
            Face::West => Face::East,
            Face::North => Face::South,
            Face::South => Face::North,
            Face::Up => Face::Down,
            Face::Down => Face::Up,
        }
    }

    /// `+` face of `axis`.
    pub fn upper(axis: usize) -> Face {
        Face::ALL[2 * axis]
    }

    /// `-` face of `axis`.
    pub fn lower(axis: usize) -> Face {
        Face::ALL[2 * axis + 1]
    }

    /// Unit step along the axis when crossing this face.
    pub fn step(self) -> i32 {
        if self.is_upper() {
            1
        } else {
            -1
        }
    }

    /// Plan bit.
    #[inline]
    pub fn bit(self) -> u8 {
        1 << self.index()
    }
}

/// Set of faces, stored as a 6-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct FaceMask(u8);

impl FaceMask {
    /// No faces.
    pub const EMPTY: FaceMask = FaceMask(0);

    /// Whether `face` is in the set.
    #[inline]
    pub fn contains(self, face: Face) -> bool {
        self.0 & face.bit() != 0
    }

    /// Add `face`.
    #[inline]
    pub fn insert(&mut self, face: Face) {
        self.0 |= face.bit();
    }
}
