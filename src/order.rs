//! Standard comparators.

use std::cmp::Ordering;

/// Sorting direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Order {
    /// Smallest record first.
    Asc,
    /// Largest record first.
    Desc,
}

impl Order {
    /// Compares two records according to the direction.
    pub fn compare<T: Ord>(self, a: &T, b: &T) -> Ordering {
        match self {
            Order::Asc => a.cmp(b),
            Order::Desc => b.cmp(a),
        }
    }

    /// Returns a comparator usable with [`crate::ExternalSorter::sort_by`].
    pub fn comparator<T: Ord>(self) -> impl Fn(&T, &T) -> Ordering + Copy + Send + Sync {
        move |a: &T, b: &T| self.compare(a, b)
    }
}

impl Default for Order {
    fn default() -> Self {
        Order::Asc
    }
}

/// Checks that every adjacent pair is ordered by `compare`.
pub fn is_sorted_by<T, F>(items: &[T], compare: F) -> bool
where
    F: Fn(&T, &T) -> Ordering,
{
    items.windows(2).all(|pair| compare(&pair[0], &pair[1]) != Ordering::Greater)
}
