// src/prereq/pattern.rs

//! Status patterns: `|`-separated prefixes matched at a word boundary.
//!
//! `"Completed"` matches only `Completed`, while `"Failed"` matches every
//! `Failed ...` status and `"Completed|Terminated"` matches either. The
//! single pattern `"*"` matches any status.
//!
//! The first status of the Setup phase is called `Setting Up`, so the
//! alternative `"Setup"` would match nothing. It is accepted as an alias for
//! `Setting Up`, the same way [`Status`] parses it.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::status::Status;

/// Phase name accepted in place of the `Setting Up` status.
const SETUP_ALIAS: &str = "Setup";

#[derive(Clone)]
pub struct StatusPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Any,
    Exact(Vec<Status>),
    Prefix(Regex),
}

impl StatusPattern {
    /// Compile a pattern.
    ///
    /// Every alternative must be a word-boundary prefix of at least one
    /// known status, so typos are caught when the edge is declared rather
    /// than turning into edges that can never be met.
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source == "*" {
            return Ok(Self::any());
        }

        let alternatives: Vec<&str> = source
            .split('|')
            .map(str::trim)
            .map(|alt| {
                if alt.eq_ignore_ascii_case(SETUP_ALIAS) {
                    Status::SettingUp.as_str()
                } else {
                    alt
                }
            })
            .collect();
        if alternatives.iter().any(|alt| alt.is_empty()) {
            return Err(EngineError::InvalidPrerequisite(format!(
                "status pattern {source:?} contains an empty alternative"
            )));
        }

        let body = alternatives
            .iter()
            .map(|alt| regex::escape(alt))
            .collect::<Vec<_>>()
            .join("|");
        let combined = Regex::new(&format!("^(?:{body})(?:$|\\s)"))?;

        for alt in &alternatives {
            let single = Regex::new(&format!("^{}(?:$|\\s)", regex::escape(alt)))?;
            if !Status::ALL.iter().any(|st| single.is_match(st.as_str())) {
                return Err(EngineError::InvalidPrerequisite(format!(
                    "{alt:?} does not name any task status"
                )));
            }
        }

        Ok(Self {
            source: alternatives.join("|"),
            matcher: Matcher::Prefix(combined),
        })
    }

    /// Pattern accepting every status.
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            matcher: Matcher::Any,
        }
    }

    /// Pattern accepting exactly the given statuses.
    pub fn of(statuses: &[Status]) -> Self {
        let source = statuses
            .iter()
            .map(|st| st.as_str())
            .collect::<Vec<_>>()
            .join("|");
        Self {
            source,
            matcher: Matcher::Exact(statuses.to_vec()),
        }
    }

    pub fn matches(&self, status: Status) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(statuses) => statuses.contains(&status),
            Matcher::Prefix(regex) => regex.is_match(status.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl From<Status> for StatusPattern {
    fn from(status: Status) -> Self {
        Self::of(&[status])
    }
}

impl PartialEq for StatusPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for StatusPattern {}

impl fmt::Debug for StatusPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusPattern({:?})", self.source)
    }
}

impl fmt::Display for StatusPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for StatusPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for StatusPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StatusPattern::parse(&raw).map_err(serde::de::Error::custom)
    }
}
