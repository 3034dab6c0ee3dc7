use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::objects::{Fields, Labels};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches<'a>(&self, get: impl Fn(&str) -> Option<&'a String>) -> bool {
        match self {
            Requirement::Equals(key, value) => get(key.as_str()).map_or(false, |v| v == value),
            Requirement::NotEquals(key, value) => get(key.as_str()).map_or(true, |v| v != value),
            Requirement::Exists(key) => get(key.as_str()).is_some(),
            Requirement::NotExists(key) => get(key.as_str()).is_none(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid selector {selector:?}: {reason}")]
pub struct SelectorParseError {
    pub selector: String,
    pub reason: String,
}

/// Conjunction of requirements, written as `k=v,k!=v,k,!k`.
/// An empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selector(Vec<Requirement>);

impl Selector {
    pub fn everything() -> Self {
        Selector(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.0
    }

    pub fn matches_labels(&self, labels: &Labels) -> bool {
        self.0.iter().all(|r| r.matches(|k| labels.get(k)))
    }

    pub fn matches_fields(&self, fields: &Fields) -> bool {
        self.0.iter().all(|r| r.matches(|k| fields.get(k)))
    }

    /// Field selectors only support equality.
    pub fn is_equality_only(&self) -> bool {
        self.0.iter().all(|r| {
            matches!(
                r,
                Requirement::Equals(_, _) | Requirement::NotEquals(_, _)
            )
        })
    }
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| SelectorParseError {
            selector: s.to_owned(),
            reason: reason.to_owned(),
        };

        let mut requirements = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_owned(), value.trim().to_owned())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(key.trim().to_owned(), value.trim().to_owned())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(key.trim().to_owned(), value.trim().to_owned())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::NotExists(key.trim().to_owned())
            } else {
                Requirement::Exists(term.to_owned())
            };

            let key = match &requirement {
                Requirement::Equals(k, _)
                | Requirement::NotEquals(k, _)
                | Requirement::Exists(k)
                | Requirement::NotExists(k) => k,
            };
            if key.is_empty() {
                return Err(err("empty key"));
            }
            requirements.push(requirement);
        }
        Ok(Selector(requirements))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms = self
            .0
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::NotEquals(k, v) => format!("{}!={}", k, v),
                Requirement::Exists(k) => k.to_owned(),
                Requirement::NotExists(k) => format!("!{}", k),
            })
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}", terms)
    }
}
