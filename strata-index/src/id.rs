//! Arbitrary-precision chunk ids.
//!
//! Tree indices are unbounded: at depth d an octree has `8^d` nodes, which
//! exceeds u64 past depth 21. Almost every id encountered in practice fits in
//! a machine word, so `Id` keeps a u64 fast path and spills to a `BigUint`
//! only when forced.
//!
//! Invariant: the representation is canonical: any value that fits in u64 is
//! `Small`. Equality and hashing rely on this.

use num_bigint::BigUint;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Small(u64),
    Big(BigUint),
}

impl Id {
    pub const ZERO: Id = Id::Small(0);

    /// Canonicalize a big value, demoting to `Small` when it fits.
    fn canonical(value: BigUint) -> Id {
        match u64::try_from(&value) {
            Ok(small) => Id::Small(small),
            Err(_) => Id::Big(value),
        }
    }

    /// The value as a `BigUint`, cloning only on the slow path.
    fn widened(&self) -> BigUint {
        match self {
            Id::Small(v) => BigUint::from(*v),
            Id::Big(v) => v.clone(),
        }
    }

    /// The value as u64, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Id::Small(v) => Some(*v),
            Id::Big(_) => None,
        }
    }

    /// `base ^ exp` as an id.
    pub fn pow(base: u64, exp: u32) -> Id {
        match base.checked_pow(exp) {
            Some(v) => Id::Small(v),
            None => Id::canonical(BigUint::from(base).pow(exp)),
        }
    }

    pub fn checked_sub(&self, other: &Id) -> Option<Id> {
        match (self, other) {
            (Id::Small(a), Id::Small(b)) => a.checked_sub(*b).map(Id::Small),
            _ => {
                let (a, b) = (self.widened(), other.widened());
                (a >= b).then(|| Id::canonical(a - b))
            }
        }
    }
}

impl From<u64> for Id {
    fn from(v: u64) -> Self {
        Id::Small(v)
    }
}

impl From<BigUint> for Id {
    fn from(v: BigUint) -> Self {
        Id::canonical(v)
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Id::Small(a), Id::Small(b)) => a.cmp(b),
            // Canonical form: any Big strictly exceeds any Small.
            (Id::Small(_), Id::Big(_)) => Ordering::Less,
            (Id::Big(_), Id::Small(_)) => Ordering::Greater,
            (Id::Big(a), Id::Big(b)) => a.cmp(b),
        }
    }
}

impl std::ops::Add<u64> for &Id {
    type Output = Id;

    fn add(self, rhs: u64) -> Id {
        match self {
            Id::Small(a) => match a.checked_add(rhs) {
                Some(v) => Id::Small(v),
                None => Id::canonical(BigUint::from(*a) + rhs),
            },
            Id::Big(a) => Id::canonical(a + rhs),
        }
    }
}

impl std::ops::Add<&Id> for &Id {
    type Output = Id;

    fn add(self, rhs: &Id) -> Id {
        match (self, rhs) {
            (Id::Small(a), Id::Small(b)) => match a.checked_add(*b) {
                Some(v) => Id::Small(v),
                None => Id::canonical(BigUint::from(*a) + *b),
            },
            _ => Id::canonical(self.widened() + rhs.widened()),
        }
    }
}

/// Subtraction panics on underflow, like the primitive operation. Callers
/// compare first or use `checked_sub`.
impl std::ops::Sub<&Id> for &Id {
    type Output = Id;

    fn sub(self, rhs: &Id) -> Id {
        self.checked_sub(rhs)
            .unwrap_or_else(|| panic!("id underflow: {self} - {rhs}"))
    }
}

impl std::ops::Mul<u64> for &Id {
    type Output = Id;

    fn mul(self, rhs: u64) -> Id {
        match self {
            Id::Small(a) => match a.checked_mul(rhs) {
                Some(v) => Id::Small(v),
                None => Id::canonical(BigUint::from(*a) * rhs),
            },
            Id::Big(a) => Id::canonical(a * rhs),
        }
    }
}

impl std::ops::Div<u64> for &Id {
    type Output = Id;

    fn div(self, rhs: u64) -> Id {
        match self {
            Id::Small(a) => Id::Small(a / rhs),
            Id::Big(a) => Id::canonical(a / rhs),
        }
    }
}

impl std::ops::Rem<u64> for &Id {
    type Output = u64;

    fn rem(self, rhs: u64) -> u64 {
        match self {
            Id::Small(a) => a % rhs,
            Id::Big(a) => {
                let r = a % rhs;
                u64::try_from(&r).expect("remainder below u64 divisor")
            }
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Small(v) => write!(f, "{v}"),
            Id::Big(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for Id {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(small) = s.parse::<u64>() {
            return Ok(Id::Small(small));
        }
        BigUint::from_str(s)
            .map(Id::canonical)
            .map_err(|e| format!("invalid id '{s}': {e}"))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Id::from_str(&s).map_err(D::Error::custom)
    }
}
