/*!
Analysis configuration.

Options arrive from the command surface as a comma separated `key=value`
string and are parsed into an [`AnalysisOptions`] struct.
*/

use std::convert::TryFrom;

use crate::error::{Error, Result};

/// Policy for the ambiguous back-to-back vector body layout.
///
/// When the allocator keeps no header word between adjacent allocations, a
/// `BBLl` word run can be read as a full vector body starting at `B` or an
/// empty one starting at `L`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorAmbiguity {
    /// Prefer the earlier, occupied body (historical behavior).
    PreferEarlierBody,
    /// Prefer the later, empty body.
    PreferEmptyBody,
}

/// Tunables of one analysis session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub vector_ambiguity: VectorAmbiguity,
    /// Strings of at most this many characters fit the short form and are
    /// never heap-allocated.
    pub short_string_limit: usize,
    /// Recognize pre-C++11 copy-on-write string bodies.
    pub cow_strings: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            vector_ambiguity: VectorAmbiguity::PreferEarlierBody,
            short_string_limit: 15,
            cow_strings: true,
        }
    }
}

impl AnalysisOptions {
    /// Parses a comma separated `key=value` option string.
    ///
    /// # Examples
    ///
    /// ```
    /// use heapview::options::{AnalysisOptions, VectorAmbiguity};
    ///
    /// let options = AnalysisOptions::try_parse_str(
    ///     "vector_ambiguity=prefer_empty,short_string_limit=23",
    /// ).unwrap();
    /// assert_eq!(options.vector_ambiguity, VectorAmbiguity::PreferEmptyBody);
    /// assert_eq!(options.short_string_limit, 23);
    /// ```
    pub fn try_parse_str(args: &str) -> Result<Self> {
        let mut options = Self::default();
        for kv in args.split(',') {
            if kv.is_empty() {
                continue;
            }
            let mut split = kv.splitn(2, '=');
            let key = split.next().unwrap_or("");
            let value = split.next().ok_or(Error::Other("malformed option"))?;
            match key {
                "vector_ambiguity" => {
                    options.vector_ambiguity = match value {
                        "prefer_earlier" => VectorAmbiguity::PreferEarlierBody,
                        "prefer_empty" => VectorAmbiguity::PreferEmptyBody,
                        _ => return Err(Error::Other("unknown vector_ambiguity value")),
                    }
                }
                "short_string_limit" => {
                    options.short_string_limit = value
                        .parse()
                        .map_err(|_| Error::Other("short_string_limit is not a number"))?;
                }
                "cow_strings" => {
                    options.cow_strings = match value {
                        "on" | "true" => true,
                        "off" | "false" => false,
                        _ => return Err(Error::Other("unknown cow_strings value")),
                    }
                }
                _ => return Err(Error::Other("unknown analysis option")),
            }
        }
        Ok(options)
    }
}

impl TryFrom<&str> for AnalysisOptions {
    type Error = Error;

    fn try_from(args: &str) -> Result<Self> {
        AnalysisOptions::try_parse_str(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AnalysisOptions::default();
        assert_eq!(options.vector_ambiguity, VectorAmbiguity::PreferEarlierBody);
        assert_eq!(options.short_string_limit, 15);
        assert!(options.cow_strings);
    }

    #[test]
    fn test_parse() {
        let options = AnalysisOptions::try_parse_str(
            "vector_ambiguity=prefer_empty,short_string_limit=23,cow_strings=off",
        )
        .unwrap();
        assert_eq!(options.vector_ambiguity, VectorAmbiguity::PreferEmptyBody);
        assert_eq!(options.short_string_limit, 23);
        assert!(!options.cow_strings);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(AnalysisOptions::try_parse_str("bogus=1").is_err());
        assert!(AnalysisOptions::try_parse_str("vector_ambiguity").is_err());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            AnalysisOptions::try_parse_str("").unwrap(),
            AnalysisOptions::default()
        );
    }
}
