use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const PRINCIPLE_COUNT: u8 = 9;

/// One entry of the fixed debugging checklist.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct Principle {
    pub number: u8,
    pub name: &'static str,
    pub description: &'static str,
}

pub const PRINCIPLES: [Principle; PRINCIPLE_COUNT as usize] = [
    Principle {
        number: 1,
        name: "Understand the System",
        description: "Read the test, the code under test and its documentation. Know what \
                      normal behavior looks like before deciding what is broken.",
    },
    Principle {
        number: 2,
        name: "Make It Fail",
        description: "Reproduce the failure reliably. Note the exact inputs, environment and \
                      steps that trigger it so every later experiment can be repeated.",
    },
    Principle {
        number: 3,
        name: "Quit Thinking and Look",
        description: "Observe the actual failure instead of guessing. Inspect the traceback, \
                      the captured locals and add instrumentation where data is missing.",
    },
    Principle {
        number: 4,
        name: "Divide and Conquer",
        description: "Narrow the search space. Bisect the code path or the input until the \
                      smallest piece that still fails is isolated.",
    },
    Principle {
        number: 5,
        name: "Change One Thing at a Time",
        description: "Isolate variables. Make a single change, rerun the test and compare \
                      before moving on.",
    },
    Principle {
        number: 6,
        name: "Keep an Audit Trail",
        description: "Write down what was tried, what changed and what happened. Small \
                      details that look irrelevant often explain the failure.",
    },
    Principle {
        number: 7,
        name: "Check the Plug",
        description: "Question the assumptions. Verify configuration, fixtures, \
                      dependencies and environment before blaming the logic.",
    },
    Principle {
        number: 8,
        name: "Get a Fresh View",
        description: "Explain the problem to someone else or step back from it. A different \
                      perspective can expose what familiarity hides.",
    },
    Principle {
        number: 9,
        name: "If You Didn't Fix It, It Ain't Fixed",
        description: "Confirm the fix addresses the root cause. Rerun the failing test and the \
                      related suite, and make sure the failure cannot silently return.",
    },
];

/// A principle ordinal guaranteed to be within `1..=9`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct PrincipleNumber(u8);

impl PrincipleNumber {
    pub const FIRST: Self = Self(1);
    pub const LAST: Self = Self(PRINCIPLE_COUNT);

    /// Validates a principle ordinal.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidArgument`] when `value` is outside `1..=9`.
    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (1..=PRINCIPLE_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidArgument(format!(
                "principle number MUST be between 1 and {PRINCIPLE_COUNT}, got {value}"
            )))
        }
    }

    /// Pulls a stored step pointer back into range.
    #[must_use]
    pub fn clamped(value: u8) -> Self {
        Self(value.clamp(1, PRINCIPLE_COUNT))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        (self.0 < PRINCIPLE_COUNT).then(|| Self(self.0 + 1))
    }

    /// `min(self + 1, 9)`.
    #[must_use]
    pub fn advanced(self) -> Self {
        self.next().unwrap_or(Self::LAST)
    }

    #[must_use]
    pub fn is_last(self) -> bool {
        self.0 >= PRINCIPLE_COUNT
    }

    #[must_use]
    pub fn principle(self) -> &'static Principle {
        &PRINCIPLES[usize::from(self.0 - 1)]
    }
}

impl TryFrom<u8> for PrincipleNumber {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrincipleNumber> for u8 {
    fn from(value: PrincipleNumber) -> Self {
        value.0
    }
}

impl Display for PrincipleNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
