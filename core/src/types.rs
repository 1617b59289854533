//! Shared primitive types used across the entire engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A signed monetary amount in the rule table's currency.
pub type Amount = Decimal;

/// Opaque, unique identifier of one priceable activation.
pub type ActivationKey = String;

/// Unique identifier of a pricing rule.
pub type RuleId = String;

/// Wildcard token accepted for `category` and `productBucket` on rules.
pub const WILDCARD: &str = "*";

/// Customer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Segment {
    Residential,
    Business,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Residential => "RESIDENTIAL",
            Self::Business    => "BUSINESS",
        }
    }

    /// Parse a source value, accepting the synonyms seen in dealer exports.
    pub fn parse(value: &str) -> Option<Self> {
        match canonical_token(value).as_str() {
            "RESIDENTIAL" | "RESIDENZIALE" | "RES" | "CONSUMER" | "PRIVATO" => {
                Some(Self::Residential)
            }
            "BUSINESS" | "BUS" | "AFFARI" | "SOHO" | "AZIENDA" => Some(Self::Business),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The monetary pool a priced line contributes to.
/// Declaration order is the output order of every scope-keyed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Tlc,
    Advance,
    SimAssignment,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Tlc, Scope::Advance, Scope::SimAssignment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tlc           => "TLC",
            Self::Advance       => "ADVANCE",
            Self::SimAssignment => "SIM_ASSIGNMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match canonical_token(value).as_str() {
            "TLC" | "BASE" | "COMPENSO" => Some(Self::Tlc),
            "ADVANCE" | "ANTICIPO" => Some(Self::Advance),
            "SIM_ASSIGNMENT" | "ASSEGNAZIONE_SIM" | "SIM" => Some(Self::SimAssignment),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean record attributes that rules can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    #[serde(rename = "isAutoRecharge")]
    AutoRecharge,
    #[serde(rename = "isConvergence")]
    Convergence,
    #[serde(rename = "mnpOperatorPenalized")]
    MnpPenalized,
    #[serde(rename = "mnpOperatorDiscounted")]
    MnpDiscounted,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoRecharge  => "isAutoRecharge",
            Self::Convergence   => "isConvergence",
            Self::MnpPenalized  => "mnpOperatorPenalized",
            Self::MnpDiscounted => "mnpOperatorDiscounted",
        }
    }

    /// Human label used when a modifier carries none of its own.
    pub fn default_label(&self) -> &'static str {
        match self {
            Self::AutoRecharge  => "auto-recharge bonus",
            Self::Convergence   => "convergence bonus",
            Self::MnpPenalized  => "MNP penalty",
            Self::MnpDiscounted => "MNP discount",
        }
    }

    pub fn is_mnp(&self) -> bool {
        matches!(self, Self::MnpPenalized | Self::MnpDiscounted)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper-case, trim, and join whitespace runs (and hyphens) with `_`.
/// Shared by enum parsing and the normalizer's category/bucket handling.
pub fn canonical_token(value: &str) -> String {
    value
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_token_collapses_whitespace() {
        assert_eq!(canonical_token("  mobile   ra "), "MOBILE_RA");
        assert_eq!(canonical_token("sim-base"), "SIM_BASE");
        assert_eq!(canonical_token(""), "");
    }

    #[test]
    fn segment_and_scope_accept_synonyms() {
        assert_eq!(Segment::parse("residenziale"), Some(Segment::Residential));
        assert_eq!(Segment::parse(" Business "), Some(Segment::Business));
        assert_eq!(Segment::parse("wholesale"), None);
        assert_eq!(Scope::parse("assegnazione sim"), Some(Scope::SimAssignment));
        assert_eq!(Scope::parse("anticipo"), Some(Scope::Advance));
        assert_eq!(Scope::parse("tlc"), Some(Scope::Tlc));
    }

    #[test]
    fn scope_order_is_declaration_order() {
        let mut scopes = vec![Scope::SimAssignment, Scope::Tlc, Scope::Advance];
        scopes.sort();
        assert_eq!(scopes, Scope::ALL.to_vec());
    }
}
