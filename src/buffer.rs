//! Memory budget of run generation.

use std::fmt;

use bytesize::ByteSize;

use crate::record::Record;

/// Memory overhead multiplier of the parallel run sort: the batch itself plus the merged copy
/// assembled from its sorted sub-ranges.
pub const AMPLIFICATION_FACTOR: u64 = 2;

/// Upper bound on the memory held by a single run during run generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: u64,
}

impl MemoryBudget {
    pub fn new(bytes: u64) -> Self {
        MemoryBudget { bytes }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of records of type `T` a single run may hold. Zero means the budget cannot fit even
    /// one record.
    pub fn records_per_run<T: Record>(&self) -> usize {
        let record_cost = AMPLIFICATION_FACTOR * T::width() as u64;
        usize::try_from(self.bytes / record_cost).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ByteSize(self.bytes))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::MemoryBudget;

    #[rstest]
    #[case(0, 0)]
    #[case(7, 0)]
    #[case(8, 1)]
    #[case(15, 1)]
    #[case(1024, 128)]
    fn test_records_per_run(#[case] bytes: u64, #[case] expected: usize) {
        assert_eq!(MemoryBudget::new(bytes).records_per_run::<i32>(), expected);
    }

    #[test]
    fn test_records_per_run_wide_record() {
        assert_eq!(MemoryBudget::new(1024).records_per_run::<u64>(), 64);
    }
}
