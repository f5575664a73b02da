use std::ops::Bound;

/// Range over an indexed column, inclusive unless built with the `_exclusive`
/// constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange<T> {
    pub lower: Bound<T>,
    pub upper: Bound<T>,
}

impl<T: Copy + PartialOrd> KeyRange<T> {
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(value: T) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Included(value),
        }
    }

    pub fn upper_bound_exclusive(value: T) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(value),
        }
    }

    pub fn lower_bound(value: T) -> Self {
        Self {
            lower: Bound::Included(value),
            upper: Bound::Unbounded,
        }
    }

    pub fn between(lower: T, upper: T) -> Self {
        Self {
            lower: Bound::Included(lower),
            upper: Bound::Included(upper),
        }
    }

    pub fn contains(&self, value: T) -> bool {
        let above = match self.lower {
            Bound::Included(l) => value >= l,
            Bound::Excluded(l) => value > l,
            Bound::Unbounded => true,
        };
        let below = match self.upper {
            Bound::Included(u) => value <= u,
            Bound::Excluded(u) => value < u,
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl KeyRange<i64> {
    /// Inclusive `(min, max)` pair for SQL `BETWEEN`.
    pub fn to_sql_bounds(&self) -> (i64, i64) {
        let min = match self.lower {
            Bound::Included(l) => l,
            Bound::Excluded(l) => l.saturating_add(1),
            Bound::Unbounded => i64::MIN,
        };
        let max = match self.upper {
            Bound::Included(u) => u,
            Bound::Excluded(u) => u.saturating_sub(1),
            Bound::Unbounded => i64::MAX,
        };
        (min, max)
    }
}
