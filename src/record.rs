//! Fixed-width records.

use std::error::Error;
use std::fmt;
use std::mem;

/// Fixed-width value the sorter operates on.
///
/// A record is parsed from a single whitespace-free token and written back using its [`fmt::Display`]
/// representation, so a value survives a text round trip unchanged.
pub trait Record: Copy + Send + Sync + fmt::Display + 'static {
    /// Record width in bytes. Used to derive how many records fit into the memory budget.
    fn width() -> usize {
        mem::size_of::<Self>()
    }

    /// Parses a record from a single token.
    fn from_token(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>>;
}

macro_rules! impl_record {
    ($($t:ty),*) => {
        $(
            impl Record for $t {
                fn from_token(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
                    Ok(token.parse::<$t>()?)
                }
            }
        )*
    };
}

impl_record!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

/// Token that could not be parsed as a record.
#[derive(Debug)]
pub struct ParseRecordError {
    /// One-based line number the token was found on.
    pub line: u64,
    /// Offending token.
    pub token: String,
    /// Underlying parse error.
    pub source: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for ParseRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: invalid record {:?}: {}", self.line, self.token, self.source)
    }
}

impl Error for ParseRecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Record;

    #[test]
    fn test_record_width() {
        assert_eq!(<i32 as Record>::width(), 4);
        assert_eq!(<u64 as Record>::width(), 8);
        assert_eq!(<i128 as Record>::width(), 16);
    }

    #[rstest]
    #[case("42", Some(42))]
    #[case("-7", Some(-7))]
    #[case("2147483647", Some(i32::MAX))]
    #[case("2147483648", None)]
    #[case("4.2", None)]
    #[case("abc", None)]
    fn test_record_from_token(#[case] token: &str, #[case] expected: Option<i32>) {
        let actual = i32::from_token(token).ok();
        assert_eq!(actual, expected);
    }
}
