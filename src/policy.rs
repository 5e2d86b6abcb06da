//! Policy engine: two-letter modes over the (exists, doesn't-exist) axes.

use crate::error::{Error, Result};
use strum_macros::{Display, EnumString};

/// One of the four actions a policy letter can request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display, EnumString)]
pub enum PolicyLetter {
    #[strum(serialize = "a")]
    Abort,
    #[strum(serialize = "r")]
    Reuse,
    #[strum(serialize = "f")]
    Force,
    #[strum(serialize = "i")]
    Ignore,
}

impl PolicyLetter {
    fn parse_char(mode: &str, c: char) -> Result<Self> {
        match c {
            'a' => Ok(PolicyLetter::Abort),
            'r' => Ok(PolicyLetter::Reuse),
            'f' => Ok(PolicyLetter::Force),
            'i' => Ok(PolicyLetter::Ignore),
            other => Err(Error::InvalidPolicyLetter {
                mode: mode.to_string(),
                letter: other,
            }),
        }
    }
}

/// A parsed two-character policy mode: the action when the state exists
/// (`if_exists`), and the action when it does not (`if_missing`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PolicyMode {
    pub if_exists: PolicyLetter,
    pub if_missing: PolicyLetter,
}

impl PolicyMode {
    pub fn parse(mode: &str) -> Result<Self> {
        let chars: Vec<char> = mode.chars().collect();
        if chars.len() != 2 {
            return Err(Error::InvalidPolicyLetter {
                mode: mode.to_string(),
                letter: mode.chars().next().unwrap_or('?'),
            });
        }
        Ok(Self {
            if_exists: PolicyLetter::parse_char(mode, chars[0])?,
            if_missing: PolicyLetter::parse_char(mode, chars[1])?,
        })
    }

    pub const GET_DEFAULT: &'static str = "ra";
    pub const SET_DEFAULT: &'static str = "ff";
    pub const UNSET_DEFAULT: &'static str = "fi";
    pub const CHECK_DEFAULT: &'static str = "rr";
    pub const PUSH_DEFAULT: &'static str = "af";
    /// Pop's unset step reuses this instead of [`Self::UNSET_DEFAULT`]: a
    /// state that vanished between the get and unset steps should abort,
    /// not be silently ignored.
    pub const POP_UNSET_DEFAULT: &'static str = "fa";
}

/// The outcome the policy engine asks the caller to perform, given whether
/// the state currently exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Abort,
    Reuse,
    Force,
    Ignore,
}

impl PolicyMode {
    /// Resolves this mode against the current existence of the state.
    pub fn decide(&self, exists: bool) -> Decision {
        let letter = if exists { self.if_exists } else { self.if_missing };
        match letter {
            PolicyLetter::Abort => Decision::Abort,
            PolicyLetter::Reuse => Decision::Reuse,
            PolicyLetter::Force => Decision::Force,
            PolicyLetter::Ignore => Decision::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        assert_eq!(
            PolicyMode::parse(PolicyMode::GET_DEFAULT).unwrap(),
            PolicyMode {
                if_exists: PolicyLetter::Reuse,
                if_missing: PolicyLetter::Abort,
            }
        );
    }

    #[test]
    fn rejects_unknown_letter() {
        assert!(matches!(
            PolicyMode::parse("xr"),
            Err(Error::InvalidPolicyLetter { .. })
        ));
    }

    #[test]
    fn decide_picks_the_right_character() {
        let mode = PolicyMode::parse("fi").unwrap();
        assert_eq!(mode.decide(true), Decision::Force);
        assert_eq!(mode.decide(false), Decision::Ignore);
    }
}
