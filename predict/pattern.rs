//! # Involvement Patterns
//!
//! A pattern assigns one of three states to each lymph node level (LNL) on each
//! side of the neck. Patterns describe both what a scenario asks about and the
//! synthetic diagnoses handed to the spread model.
//!
//! The third state is a first-class value, not a missing boolean: an `Unknown`
//! level imposes no constraint anywhere in the engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Tri-state involvement of a single lymph node level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    Involved,
    Healthy,
    #[default]
    Unknown,
}

impl Status {
    /// The boolean this state constrains a level to, if any.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Involved => Some(true),
            Self::Healthy => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl From<bool> for Status {
    fn from(value: bool) -> Self {
        if value { Self::Involved } else { Self::Healthy }
    }
}

impl From<Option<bool>> for Status {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unknown, Self::from)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Involved => f.write_str("involved"),
            Self::Healthy => f.write_str("healthy"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

// Configuration files write a level as a boolean, or as a string for the
// unknown state (TOML has no null).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Flag(bool),
    Text(String),
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawStatus::deserialize(deserializer)? {
            RawStatus::Flag(value) => Ok(Status::from(value)),
            RawStatus::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "unknown" | "?" | "none" | "null" | "" => Ok(Status::Unknown),
                "true" | "involved" => Ok(Status::Involved),
                "false" | "healthy" => Ok(Status::Healthy),
                other => Err(serde::de::Error::custom(format!(
                    "'{other}' is not a valid involvement state (use true, false or \"unknown\")"
                ))),
            },
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_bool() {
            Some(value) => serializer.serialize_bool(value),
            None => serializer.serialize_str("unknown"),
        }
    }
}

/// Side of the neck relative to the primary tumor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Ipsi,
    Contra,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Ipsi, Side::Contra];

    /// Column label used for this side in bilateral clinical tables.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ipsi => "ipsi",
            Self::Contra => "contra",
        }
    }
}

/// Involvement of the levels of one side, ordered by level name.
pub type SidePattern = BTreeMap<String, Status>;

/// A pattern of involvement on both sides of the neck.
///
/// Unilateral models only ever read the `ipsi` side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pattern {
    pub ipsi: SidePattern,
    pub contra: SidePattern,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SidedPattern {
    #[serde(default)]
    ipsi: SidePattern,
    #[serde(default)]
    contra: SidePattern,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Sided(SidedPattern),
    Flat(SidePattern),
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawPattern::deserialize(deserializer)? {
            RawPattern::Sided(sided) => Pattern {
                ipsi: sided.ipsi,
                contra: sided.contra,
            },
            RawPattern::Flat(ipsi) => Pattern {
                ipsi,
                contra: SidePattern::new(),
            },
        })
    }
}

impl Pattern {
    pub fn side(&self, side: Side) -> &SidePattern {
        match side {
            Side::Ipsi => &self.ipsi,
            Side::Contra => &self.contra,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SidePattern {
        match side {
            Side::Ipsi => &mut self.ipsi,
            Side::Contra => &mut self.contra,
        }
    }

    /// State of `lnl` on `side`; absent levels read as `Unknown`.
    pub fn status(&self, side: Side, lnl: &str) -> Status {
        self.side(side).get(lnl).copied().unwrap_or_default()
    }

    /// Builds a one-sided pattern from `(level, state)` pairs.
    pub fn ipsi_only<'a, I>(levels: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Status)>,
    {
        Pattern {
            ipsi: levels
                .into_iter()
                .map(|(lnl, status)| (lnl.to_string(), status))
                .collect(),
            contra: SidePattern::new(),
        }
    }
}

/// Fills every level of `levels` that is missing from either side with
/// `Unknown`. Existing entries, including levels the model does not know,
/// are left untouched.
pub fn complete(pattern: &Pattern, levels: &[String]) -> Pattern {
    let mut completed = pattern.clone();
    for side in Side::BOTH {
        let entries = completed.side_mut(side);
        for lnl in levels {
            entries.entry(lnl.clone()).or_insert(Status::Unknown);
        }
    }
    completed
}

/// Same contract as [`complete`] for the risk path, where a given diagnosis
/// may be absent altogether.
pub fn clean(pattern: Option<&Pattern>, levels: &[String]) -> Pattern {
    match pattern {
        Some(pattern) => complete(pattern, levels),
        None => complete(&Pattern::default(), levels),
    }
}
