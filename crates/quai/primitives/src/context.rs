//! Hierarchical contexts.

use core::fmt;

/// Number of levels in the hierarchy.
pub const HIERARCHY_DEPTH: usize = 3;

/// A level of the hierarchy, ordered from coarsest to finest.
///
/// The derived ordering follows the index: `Prime < Region < Zone`. A block's
/// *order* is the coarsest context whose target it meets, so a smaller
/// context means a rarer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Context {
    /// The single top-level chain.
    Prime = 0,
    /// One of the regions below Prime.
    Region = 1,
    /// One of the zones below a region. Mining always happens here.
    Zone = 2,
}

impl Context {
    /// All contexts, coarsest first.
    pub const ALL: [Self; HIERARCHY_DEPTH] = [Self::Prime, Self::Region, Self::Zone];

    /// Index of this context into per-level arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Context for a per-level array index.
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Prime),
            1 => Some(Self::Region),
            2 => Some(Self::Zone),
            _ => None,
        }
    }

    /// Lowercase name, used as a metrics label.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Prime => "prime",
            Self::Region => "region",
            Self::Zone => "zone",
        }
    }

    /// Contexts a block of this order is reported to, deepest first.
    ///
    /// A Zone-order block only goes to the Zone; a Prime-order block goes to
    /// the Zone, then the Region, then Prime.
    pub fn fan_out(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().rev().filter(move |ctx| *ctx >= self)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prime => f.write_str("Prime"),
            Self::Region => f.write_str("Region"),
            Self::Zone => f.write_str("Zone"),
        }
    }
}
