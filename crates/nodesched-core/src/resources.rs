//! Resource quantities and resource sets
//!
//! Quantities are fixed-point with a resolution of 1/10000 so that resource
//! sets can be hashed, ordered and compared exactly. A [`ResourceSet`] never
//! stores zero-valued entries, which keeps two sets describing the same shape
//! equal regardless of how they were built.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use crate::error::{NodeschedError, NodeschedResult};

/// Well-known resource name for CPU slots
pub const CPU: &str = "CPU";
/// Well-known resource name for GPUs
pub const GPU: &str = "GPU";
const RESOLUTION: i64 = 10_000;

/// Fixed-point resource quantity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPoint(i64);

impl FixedPoint {
    /// Zero quantity
    pub const ZERO: FixedPoint = FixedPoint(0);

    /// Largest representable quantity; arithmetic saturates here
    pub const MAX: FixedPoint = FixedPoint(i64::MAX);

    /// Convert from a floating point quantity, rounding to the resolution
    ///
    /// Out of range values saturate and NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        Self((value * RESOLUTION as f64).round() as i64)
    }

    /// Convert back to floating point
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / RESOLUTION as f64
    }

    /// Whether the quantity is zero
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Raw fixed-point units
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl From<u32> for FixedPoint {
    fn from(value: u32) -> Self {
        Self(value as i64 * RESOLUTION)
    }
}

impl Add for FixedPoint {
    type Output = FixedPoint;

    fn add(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for FixedPoint {
    fn add_assign(&mut self, rhs: FixedPoint) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for FixedPoint {
    type Output = FixedPoint;

    fn sub(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u64> for FixedPoint {
    type Output = FixedPoint;

    fn mul(self, rhs: u64) -> FixedPoint {
        FixedPoint(self.0.saturating_mul(i64::try_from(rhs).unwrap_or(i64::MAX)))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

impl Serialize for FixedPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for FixedPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(FixedPoint::from_f64(value))
    }
}

/// A set of named resource quantities, e.g. `{CPU: 1, GPU: 0.5}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, FixedPoint>", into = "BTreeMap<String, FixedPoint>")]
pub struct ResourceSet {
    resources: BTreeMap<String, FixedPoint>,
}

impl ResourceSet {
    /// Create an empty resource set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resource set from `(name, quantity)` pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut set = Self::new();
        for (name, quantity) in pairs {
            set.set(name, FixedPoint::from_f64(quantity));
        }
        set
    }

    /// Build a resource set from a float map, rejecting negative or out of range
    /// quantities
    pub fn try_from_map<'a, I>(map: I) -> NodeschedResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let mut set = Self::new();
        for (name, quantity) in map {
            let in_range = quantity.is_finite() && *quantity <= FixedPoint::MAX.to_f64();
            if *quantity < 0.0 || !in_range {
                return Err(NodeschedError::InvalidResources(format!(
                    "{} has invalid quantity {}",
                    name, quantity
                )));
            }
            set.set(name, FixedPoint::from_f64(*quantity));
        }
        Ok(set)
    }

    /// Quantity of a resource (zero if absent)
    pub fn get(&self, name: &str) -> FixedPoint {
        self.resources.get(name).copied().unwrap_or_default()
    }

    /// Set the quantity of a resource; zero removes the entry
    pub fn set(&mut self, name: &str, quantity: FixedPoint) {
        if quantity.is_zero() {
            self.resources.remove(name);
        } else {
            self.resources.insert(name.to_string(), quantity);
        }
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Number of distinct resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Iterate over `(name, quantity)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, FixedPoint)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Whether every quantity in `self` fits within `other`
    pub fn is_subset_of(&self, other: &ResourceSet) -> bool {
        self.resources
            .iter()
            .all(|(name, quantity)| *quantity <= other.get(name))
    }

    /// Add every quantity of `other` into `self`
    pub fn add(&mut self, other: &ResourceSet) {
        for (name, quantity) in other.iter() {
            let current = self.get(name);
            self.set(name, current + quantity);
        }
    }

    /// Subtract `other` from `self`, clamping each quantity at zero
    pub fn subtract_saturating(&mut self, other: &ResourceSet) {
        for (name, quantity) in other.iter() {
            let current = self.get(name);
            let remaining = if current > quantity {
                current - quantity
            } else {
                FixedPoint::ZERO
            };
            self.set(name, remaining);
        }
    }

    /// Multiply every quantity by `count`
    pub fn scaled(&self, count: u64) -> ResourceSet {
        let mut set = ResourceSet::new();
        for (name, quantity) in self.iter() {
            set.set(name, quantity * count);
        }
        set
    }
}

impl From<BTreeMap<String, FixedPoint>> for ResourceSet {
    fn from(map: BTreeMap<String, FixedPoint>) -> Self {
        let mut set = ResourceSet::new();
        for (name, quantity) in map {
            set.set(&name, quantity);
        }
        set
    }
}

impl From<ResourceSet> for BTreeMap<String, FixedPoint> {
    fn from(set: ResourceSet) -> Self {
        set.resources
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, quantity)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, quantity)?;
        }
        write!(f, "}}")
    }
}
