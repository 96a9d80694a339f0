// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock strengths, lock modes and their compatibility
//!
//! Strengths form a total order from weakest to strongest. Modes pair a
//! strength with the timestamp it applies at, which is what decides whether a
//! non-locking read conflicts with an exclusive lock or an intent.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// The kind of access a request needs on a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// Non-locking read
    None,
    /// Shared lock, compatible with other shared locks
    Shared,
    /// Exclusive lock
    Exclusive,
    /// Write intent, always replicated
    Intent,
}

/// All strengths, strongest first (the order requests scan in)
pub const STRENGTHS_STRONGEST_FIRST: [Strength; 4] = [
    Strength::Intent,
    Strength::Exclusive,
    Strength::Shared,
    Strength::None,
];

impl Strength {
    /// Get string representation for display
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::None => "None",
            Strength::Shared => "Shared",
            Strength::Exclusive => "Exclusive",
            Strength::Intent => "Intent",
        }
    }

    /// Dense index, usable for per-strength arrays
    pub fn index(&self) -> usize {
        match self {
            Strength::None => 0,
            Strength::Shared => 1,
            Strength::Exclusive => 2,
            Strength::Intent => 3,
        }
    }

    /// Whether this strength takes a lock at all
    pub fn is_locking(&self) -> bool {
        !matches!(self, Strength::None)
    }

    /// Strength-level compatibility matrix
    ///
    /// `None` conflicts with nothing, `Shared` is compatible with `Shared`,
    /// and `Exclusive` / `Intent` conflict with every locking strength.
    pub fn conflicts_with(&self, other: &Strength) -> bool {
        match (self, other) {
            (Strength::None, _) | (_, Strength::None) => false,
            (Strength::Shared, Strength::Shared) => false,
            _ => true,
        }
    }
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Strength::None),
            "shared" => Ok(Strength::Shared),
            "exclusive" => Ok(Strength::Exclusive),
            "intent" => Ok(Strength::Intent),
            _ => Err(format!("Unknown lock strength: {}", s)),
        }
    }
}

/// A strength together with the timestamp it is held or requested at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strength", rename_all = "snake_case")]
pub enum LockMode {
    /// Non-locking read at the given read timestamp
    None { ts: Timestamp },
    Shared,
    /// Exclusive lock; blocks non-locking reads at or above `ts`
    Exclusive { ts: Timestamp },
    /// Write intent at `ts`; blocks non-locking reads at or above `ts`
    Intent { ts: Timestamp },
}

impl LockMode {
    pub fn new(strength: Strength, ts: Timestamp) -> Self {
        match strength {
            Strength::None => LockMode::None { ts },
            Strength::Shared => LockMode::Shared,
            Strength::Exclusive => LockMode::Exclusive { ts },
            Strength::Intent => LockMode::Intent { ts },
        }
    }

    pub fn strength(&self) -> Strength {
        match self {
            LockMode::None { .. } => Strength::None,
            LockMode::Shared => Strength::Shared,
            LockMode::Exclusive { .. } => Strength::Exclusive,
            LockMode::Intent { .. } => Strength::Intent,
        }
    }

    /// Whether two modes held or requested by different transactions conflict
    pub fn conflicts_with(&self, other: &LockMode) -> bool {
        match (self, other) {
            (LockMode::None { ts: read_ts }, held) | (held, LockMode::None { ts: read_ts }) => {
                match held {
                    LockMode::None { .. } | LockMode::Shared => false,
                    LockMode::Exclusive { ts } | LockMode::Intent { ts } => ts <= read_ts,
                }
            }
            (a, b) => a.strength().conflicts_with(&b.strength()),
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::None { ts } => write!(f, "None@{}", ts),
            LockMode::Shared => write!(f, "Shared"),
            LockMode::Exclusive { ts } => write!(f, "Exclusive@{}", ts),
            LockMode::Intent { ts } => write!(f, "Intent@{}", ts),
        }
    }
}

/// Whether a lock is also recorded durably as a write intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Mirrored in durable storage
    Replicated,
    /// Lives only in the lock table; lost on restart or lease change
    Unreplicated,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Replicated => "repl",
            Durability::Unreplicated => "unrepl",
        }
    }
}

impl std::fmt::Display for Durability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a request behaves when it runs into a conflicting lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Queue and wait
    #[default]
    Block,
    /// Do not queue; report the conflict so the caller can fail fast
    Error,
    /// Do not queue or scan; skip keys locked by others during evaluation
    SkipLocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Strength; 4] = [
        Strength::None,
        Strength::Shared,
        Strength::Exclusive,
        Strength::Intent,
    ];

    #[test]
    fn test_strength_order() {
        assert!(Strength::None < Strength::Shared);
        assert!(Strength::Shared < Strength::Exclusive);
        assert!(Strength::Exclusive < Strength::Intent);
        for (i, s) in ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
    }

    #[test]
    fn test_strength_matrix_is_symmetric() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.conflicts_with(&b), b.conflicts_with(&a), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_strength_matrix_values() {
        for s in ALL {
            assert!(!Strength::None.conflicts_with(&s));
        }
        assert!(!Strength::Shared.conflicts_with(&Strength::Shared));
        assert!(Strength::Shared.conflicts_with(&Strength::Exclusive));
        assert!(Strength::Shared.conflicts_with(&Strength::Intent));
        assert!(Strength::Exclusive.conflicts_with(&Strength::Exclusive));
        assert!(Strength::Exclusive.conflicts_with(&Strength::Intent));
        assert!(Strength::Intent.conflicts_with(&Strength::Intent));
    }

    #[test]
    fn test_mode_reader_timestamps() {
        let read = LockMode::None {
            ts: Timestamp::new(10, 0),
        };
        let below = LockMode::Exclusive {
            ts: Timestamp::new(10, 0),
        };
        let above = LockMode::Intent {
            ts: Timestamp::new(11, 0),
        };
        assert!(read.conflicts_with(&below));
        assert!(below.conflicts_with(&read));
        assert!(!read.conflicts_with(&above));
        assert!(!above.conflicts_with(&read));
        assert!(!read.conflicts_with(&LockMode::Shared));
        assert!(!read.conflicts_with(&read));
    }

    #[test]
    fn test_mode_locking_ignores_timestamps() {
        let a = LockMode::Exclusive {
            ts: Timestamp::new(5, 0),
        };
        let b = LockMode::Exclusive {
            ts: Timestamp::new(50, 0),
        };
        assert!(a.conflicts_with(&b));
        assert!(!LockMode::Shared.conflicts_with(&LockMode::Shared));
        assert!(LockMode::Shared.conflicts_with(&a));
    }

    #[test]
    fn test_strength_parsing() {
        assert_eq!("shared".parse::<Strength>().unwrap(), Strength::Shared);
        assert_eq!("INTENT".parse::<Strength>().unwrap(), Strength::Intent);
        assert!("bogus".parse::<Strength>().is_err());
    }
}
