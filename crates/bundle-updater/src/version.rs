//! Version ordering for bundle releases.
//!
//! Bundle versions are free-form dotted strings ("1.0.1", "0.3", "2.0-beta.1",
//! "1.0-sp2"), so this module does not require strict semantic versioning.
//! A version is split into numeric and word tokens and compared token by token:
//!
//! - numeric tokens compare numerically (`0.10 > 0.9`),
//! - pre-release words sort below the bare release (`1.0-rc1 < 1.0`),
//! - service-pack words sort above it (`1.0 < 1.0-sp1 < 1.0.1`),
//! - missing trailing tokens count as zero (`1.0 == 1.0.0`).

use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Rank of a word token. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WordRank {
    Snapshot,
    Milestone,
    Preview,
    Alpha,
    Beta,
    ReleaseCandidate,
    ServicePack,
}

impl WordRank {
    /// Classify a lowercase word. Unknown words rank as previews.
    fn of(word: &str) -> (Self, bool) {
        let rank = match word {
            "snapshot" | "snap" => Self::Snapshot,
            "m" | "milestone" => Self::Milestone,
            "eap" | "pre" | "preview" => Self::Preview,
            "alpha" | "a" => Self::Alpha,
            "beta" | "b" => Self::Beta,
            "rc" | "cr" => Self::ReleaseCandidate,
            "sp" | "patch" => Self::ServicePack,
            _ => return (Self::Preview, false),
        };
        (rank, true)
    }

    fn is_pre_release(self) -> bool {
        self < Self::ServicePack
    }
}

/// A single version component.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Decimal digits with leading zeros stripped ("" is zero).
    Number(String),
    /// A word; unknown words keep their lowercase text for tie-breaking.
    Word(WordRank, Option<String>),
}

impl Token {
    fn number(digits: &str) -> Self {
        Token::Number(digits.trim_start_matches('0').to_string())
    }

    fn word(text: &str) -> Self {
        let lower = text.to_lowercase();
        match WordRank::of(&lower) {
            (rank, true) => Token::Word(rank, None),
            (rank, false) => Token::Word(rank, Some(lower)),
        }
    }

    /// Sort class within a single slot: pre-release words, then zero (or a
    /// missing token), then service packs, then positive numbers.
    fn class(token: Option<&Token>) -> u8 {
        match token {
            Some(Token::Word(rank, _)) if rank.is_pre_release() => 0,
            None => 1,
            Some(Token::Number(digits)) if digits.is_empty() => 1,
            Some(Token::Word(..)) => 2,
            Some(Token::Number(_)) => 3,
        }
    }

    fn cmp_slot(a: Option<&Token>, b: Option<&Token>) -> Ordering {
        let by_class = Self::class(a).cmp(&Self::class(b));
        if by_class != Ordering::Equal {
            return by_class;
        }

        match (a, b) {
            (Some(Token::Number(x)), Some(Token::Number(y))) => {
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            (Some(Token::Word(ra, ta)), Some(Token::Word(rb, tb))) => {
                ra.cmp(rb).then_with(|| ta.cmp(tb))
            }
            // Zero against a missing token.
            _ => Ordering::Equal,
        }
    }
}

fn tokenize(raw: &str) -> Vec<Token> {
    let trimmed = raw.trim();
    let trimmed = match trimmed.strip_prefix(['v', 'V']) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => trimmed,
    };

    let mut tokens = Vec::new();
    for segment in trimmed.split(|c: char| !c.is_alphanumeric()) {
        let mut start = 0;
        let mut digits = None;
        for (idx, ch) in segment.char_indices() {
            let is_digit = ch.is_ascii_digit();
            match digits {
                Some(prev) if prev != is_digit => {
                    tokens.push(make_token(&segment[start..idx], prev));
                    start = idx;
                }
                _ => {}
            }
            digits = Some(is_digit);
        }
        if let Some(is_digit) = digits {
            tokens.push(make_token(&segment[start..], is_digit));
        }
    }
    tokens
}

fn make_token(text: &str, is_digit: bool) -> Token {
    if is_digit {
        Token::number(text)
    } else {
        Token::word(text)
    }
}

/// A parsed bundle version.
///
/// Equality follows the ordering, so `"1.0"` and `"1.0.0"` are equal even
/// though they display differently.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    /// Parse a version string. Parsing never fails; any string has a position
    /// in the ordering.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            tokens: tokenize(raw),
        }
    }

    /// The original string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check if this version carries a pre-release word (alpha, beta, rc, ...).
    #[must_use]
    pub fn is_pre_release(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Word(rank, _) if rank.is_pre_release()))
    }

    /// Check if this version has no components at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromStr for Version {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            match Token::cmp_slot(self.tokens.get(i), other.tokens.get(i)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

/// Compare two version strings.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    Version::parse(a).cmp(&Version::parse(b))
}

/// Sort version strings ascending. The sort is stable, so equal versions
/// ("1.0", "1.0.0") keep their relative order.
pub fn sort_versions<S: AsRef<str>>(versions: &mut [S]) {
    versions.sort_by(|a, b| compare(a.as_ref(), b.as_ref()));
}

/// Find the greatest version that is less than or equal to `target`.
///
/// `versions` must already be sorted ascending with [`sort_versions`]; the
/// list is not re-sorted and an unsorted list gives an unspecified answer.
///
/// Returns `None` for an empty list or when every version is greater than
/// `target`. When `target` is greater than every version, the last element
/// is returned.
#[must_use]
pub fn find_closest_version<'a, S: AsRef<str>>(versions: &'a [S], target: &str) -> Option<&'a str> {
    let target = Version::parse(target);

    for (i, candidate) in versions.iter().enumerate() {
        match target.cmp(&Version::parse(candidate.as_ref())) {
            Ordering::Equal => return Some(candidate.as_ref()),
            Ordering::Less => {
                return if i == 0 {
                    None
                } else {
                    Some(versions[i - 1].as_ref())
                };
            }
            Ordering::Greater => {}
        }
    }

    versions.last().map(|v| v.as_ref())
}
