use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// Explicit numbers used in tests and scenario files live below this range, so
// minted numbers never collide with hand-picked ones.
const FIRST_MINTED_NUMBER: u64 = 1 << 32;

static NEXT_MOLNUM: AtomicU64 = AtomicU64::new(FIRST_MINTED_NUMBER);
static NEXT_MGNUM: AtomicU64 = AtomicU64::new(FIRST_MINTED_NUMBER);

/// Process-unique identity of one molecule, independent of its version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MolNum(u64);

impl MolNum {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn new_unique() -> Self {
        Self(NEXT_MOLNUM.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MolNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique identity of one molecule group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MGNum(u64);

impl MGNum {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn new_unique() -> Self {
        Self(NEXT_MGNUM.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MGNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one or more molecule groups inside a container.
///
/// Resolution against a concrete container happens through
/// [`MGID::map`](crate::core::groups::base::MolGroupsBase::map_mgid).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MGID {
    Num(MGNum),
    /// Position in the container's group order. Negative values count back
    /// from the end.
    Idx(i64),
    Name(String),
    /// Union of the groups matched by each part.
    Or(Vec<MGID>),
    /// Intersection of the groups matched by each part.
    And(Vec<MGID>),
    All,
}

impl MGID {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn nums(nums: impl IntoIterator<Item = MGNum>) -> Self {
        let parts: Vec<MGID> = nums.into_iter().map(MGID::Num).collect();
        match parts.len() {
            1 => parts.into_iter().next().unwrap_or(MGID::Or(Vec::new())),
            _ => MGID::Or(parts),
        }
    }

    pub fn or(self, other: MGID) -> Self {
        match self {
            MGID::Or(mut parts) => {
                parts.push(other);
                MGID::Or(parts)
            }
            id => MGID::Or(vec![id, other]),
        }
    }

    pub fn and(self, other: MGID) -> Self {
        match self {
            MGID::And(mut parts) => {
                parts.push(other);
                MGID::And(parts)
            }
            id => MGID::And(vec![id, other]),
        }
    }
}

impl From<MGNum> for MGID {
    fn from(value: MGNum) -> Self {
        Self::Num(value)
    }
}

impl From<&str> for MGID {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl fmt::Display for MGID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MGID::Num(n) => write!(f, "MGNum({n})"),
            MGID::Idx(i) => write!(f, "MGIdx({i})"),
            MGID::Name(name) => write!(f, "MGName('{name}')"),
            MGID::Or(parts) => write_joined(f, parts, " or "),
            MGID::And(parts) => write_joined(f, parts, " and "),
            MGID::All => write!(f, "all groups"),
        }
    }
}

/// Identifies one or more molecules inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MolID {
    Num(MolNum),
    Idx(i64),
    Or(Vec<MolID>),
    All,
}

impl From<MolNum> for MolID {
    fn from(value: MolNum) -> Self {
        Self::Num(value)
    }
}

impl fmt::Display for MolID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MolID::Num(n) => write!(f, "MolNum({n})"),
            MolID::Idx(i) => write!(f, "MolIdx({i})"),
            MolID::Or(parts) => write_joined(f, parts, " or "),
            MolID::All => write!(f, "all molecules"),
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, parts: &[T], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

/// Maps a possibly negative index onto `[0, count)`.
pub(crate) fn resolve_index(index: i64, count: usize) -> Option<usize> {
    let resolved = if index < 0 {
        count as i64 + index
    } else {
        index
    };
    (0..count as i64)
        .contains(&resolved)
        .then_some(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_numbers_are_unique_and_above_explicit_range() {
        let a = MolNum::new_unique();
        let b = MolNum::new_unique();
        assert_ne!(a, b);
        assert!(a.value() >= FIRST_MINTED_NUMBER);

        let g = MGNum::new_unique();
        assert!(g.value() >= FIRST_MINTED_NUMBER);
    }

    #[test]
    fn resolve_index_handles_negative_and_out_of_range() {
        assert_eq!(resolve_index(0, 3), Some(0));
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(-4, 3), None);
        assert_eq!(resolve_index(0, 0), None);
    }

    #[test]
    fn nums_collapses_single_number() {
        assert_eq!(MGID::nums([MGNum::new(5)]), MGID::Num(MGNum::new(5)));
        assert_eq!(
            MGID::nums([MGNum::new(5), MGNum::new(6)]),
            MGID::Or(vec![MGID::Num(MGNum::new(5)), MGID::Num(MGNum::new(6))])
        );
    }

    #[test]
    fn combinators_flatten_into_existing_sets() {
        let id = MGID::from(MGNum::new(1))
            .or(MGID::name("solvent"))
            .or(MGID::Idx(0));
        match id {
            MGID::Or(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected id {other:?}"),
        }
        assert_eq!(
            MGID::from(MGNum::new(1)).and(MGID::All).to_string(),
            "(MGNum(1) and all groups)"
        );
    }
}
