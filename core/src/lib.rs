//! compensi-core: rule-based commission pricing and hierarchical rollup
//! for a telecom dealer network.
//!
//! Pipeline: raw rows → [`normalizer`] → [`classifier`] → [`pricer`] →
//! [`aggregator`] + [`drilldown`], orchestrated by [`engine::CommissionEngine`].

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod diagnostic;
pub mod drilldown;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod pricer;
pub mod record;
pub mod rng;
pub mod rule_table;
pub mod source;
pub mod types;
