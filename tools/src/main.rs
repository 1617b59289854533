//! compensi-runner: headless commission run over a rule table and a batch
//! of activation rows.
//!
//! Usage:
//!   compensi-runner --rules data/rules.json --records rows.json --period 2024-05
//!   compensi-runner --rules data/rules.json --db dashboard.db --table attivazioni --dealer D-001
//!   compensi-runner --rules data/rules.json --synthetic 500 --seed 42 --json
//!   compensi-runner --rules data/rules.json --synthetic 500 --drill RESIDENTIAL/MOBILE --filter vodafone --limit 20

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use compensi_core::{
    aggregator::{AggregationNode, NodePath},
    config::EngineConfig,
    drilldown::{DrillDownPage, DrillDownQuery},
    engine::{CommissionEngine, Summary},
    rule_table::{RuleTable, SharedRuleTable},
    source::{JsonFileSource, Period, RecordFilter, RecordSource, SqliteSource, SyntheticSource},
    types::Scope,
};
use rust_decimal::Decimal;
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let json_mode = has_flag(&args, "--json");
    let run_id = uuid::Uuid::new_v4();

    let rules_path = arg_value(&args, "--rules").unwrap_or("data/rules.json");
    let rules = SharedRuleTable::new(
        RuleTable::load(rules_path)
            .with_context(|| format!("loading rule table {rules_path}"))?,
    );

    let mut config = match arg_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if has_flag(&args, "--strict") {
        config = config.with_strict_classification(true);
    }

    let filter = build_filter(&args)?;
    let source = build_source(&args)?;

    if !json_mode {
        println!("compensi-runner");
        println!("  run_id:   {run_id}");
        println!("  rules:    {rules_path} (version {})", rules.current().version());
        println!("  source:   {}", source.name());
        println!("  filter:   {}", filter.describe());
        println!();
    }
    log::info!("run {run_id}: fetching rows from {}", source.name());

    let rows = source.fetch(&filter)?;
    let engine = CommissionEngine::new(config, rules.current());
    let computation = engine.run(&rows)?;

    if let Some(path) = arg_value(&args, "--drill") {
        let node: NodePath = path.parse()?;
        let mut query = DrillDownQuery::node(node);
        if let Some(text) = arg_value(&args, "--filter") {
            query = query.with_filter(text);
        }
        query.offset = parse_arg(&args, "--offset", 0usize)?;
        query.limit = parse_optional_arg(&args, "--limit")?;

        let page = computation.drill_down(&query)?;
        if json_mode {
            println!("{}", serde_json::to_string_pretty(&page)?);
        } else {
            print_page(&page);
        }
        return Ok(());
    }

    let summary = computation.summary();
    if json_mode {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn build_filter(args: &[String]) -> Result<RecordFilter> {
    let mut filter = RecordFilter::all();

    if let Some(month) = arg_value(args, "--period") {
        let period = Period::parse_month(month)
            .ok_or_else(|| anyhow!("--period expects YYYY-MM, got '{month}'"))?;
        filter.period = Some(period);
    }
    match (arg_value(args, "--from"), arg_value(args, "--to")) {
        (Some(from), Some(to)) => {
            if filter.period.is_some() {
                bail!("--period and --from/--to are mutually exclusive");
            }
            filter.period = Some(Period::Range {
                from: parse_date(from)?,
                to:   parse_date(to)?,
            });
        }
        (None, None) => {}
        _ => bail!("--from and --to must be given together"),
    }

    filter.dealer = arg_value(args, "--dealer").map(str::to_string);
    filter.agent = arg_value(args, "--agent").map(str::to_string);
    Ok(filter)
}

fn build_source(args: &[String]) -> Result<Box<dyn RecordSource>> {
    if let Some(path) = arg_value(args, "--records") {
        return Ok(Box::new(JsonFileSource::new(path)));
    }
    if let Some(db) = arg_value(args, "--db") {
        let table = arg_value(args, "--table").unwrap_or("attivazioni");
        return Ok(Box::new(SqliteSource::open(db, table)?));
    }
    if let Some(count) = arg_value(args, "--synthetic") {
        let count: usize = count
            .parse()
            .map_err(|_| anyhow!("--synthetic expects a row count, got '{count}'"))?;
        let seed = parse_arg(args, "--seed", 42u64)?;
        return Ok(Box::new(SyntheticSource::new(count, seed)));
    }
    bail!("one of --records, --db or --synthetic is required")
}

fn print_summary(summary: &Summary) {
    println!("=== COMMISSION SUMMARY ===");
    println!("  rule table:     {}", summary.rule_table_version);
    println!("  lines priced:   {}", summary.line_count);
    println!("  total quantity: {}", summary.total_quantity);
    println!("  grand total:    {} {}", summary.grand_total, summary.currency);

    println!();
    println!("=== BY SEGMENT / CATEGORY / BUCKET ===");
    for segment in &summary.tree.children {
        print_node(segment, summary.grand_total, 1);
    }

    println!();
    println!("=== BY SCOPE ===");
    for scope in Scope::ALL {
        let total = summary.scope_rollup.get(&scope).cloned().unwrap_or_default();
        println!(
            "  {:<15} {:>12}  ({} lines)",
            scope.as_str(),
            total.total_amount,
            total.line_count
        );
    }

    println!();
    let diagnostics = &summary.diagnostics;
    if diagnostics.is_complete() {
        println!("=== DIAGNOSTICS: none, every row priced ===");
    } else {
        println!(
            "=== DIAGNOSTICS: {} rows skipped ({} normalization, {} classification) ===",
            diagnostics.skipped_rows,
            diagnostics.normalization_errors,
            diagnostics.classification_errors
        );
        for entry in diagnostics.entries.iter().take(20) {
            println!(
                "  [{:?}] {:<18} {} {}",
                entry.stage,
                entry.code,
                entry.activation_key.as_deref().unwrap_or("-"),
                entry.message
            );
        }
        if diagnostics.entries.len() > 20 {
            println!("  ... {} more", diagnostics.entries.len() - 20);
        }
    }
}

fn print_node(node: &AggregationNode, grand_total: Decimal, depth: usize) {
    let share = if grand_total.is_zero() {
        Decimal::ZERO
    } else {
        (node.total_amount / grand_total * Decimal::ONE_HUNDRED).round_dp(1)
    };
    let label = format!("{}{}", "  ".repeat(depth), node.key);
    println!(
        "{label:<36} {:>12}  qty {:>5}  {:>5}%",
        node.total_amount, node.total_quantity, share
    );
    // Scope leaves are listed in the scope section.
    if !node.children.iter().all(AggregationNode::is_leaf) {
        for child in &node.children {
            print_node(child, grand_total, depth + 1);
        }
    }
}

fn print_page(page: &DrillDownPage) {
    println!("=== DRILL-DOWN {} ===", page.path);
    println!(
        "  {} of {} rows, node total {} (qty {})",
        page.rows.len(),
        page.node_line_count,
        page.node_total_amount,
        page.node_total_quantity
    );
    if page.matched_count != page.node_line_count {
        println!("  filter matched {} rows", page.matched_count);
    }
    for row in &page.rows {
        let when = row
            .record
            .occurred_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<22} {:<16} {:>10}  {}",
            row.record.activation_key,
            when,
            row.line.total_amount(),
            row.line.explain()
        );
    }
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM-DD, got '{text}'"))
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> Result<T> {
    Ok(parse_optional_arg(args, flag)?.unwrap_or(default))
}

/// A value that is present but unparsable is an error, never a silent default.
fn parse_optional_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>> {
    arg_value(args, flag)
        .map(|v| v.parse().map_err(|_| anyhow!("{flag} expects a number, got '{v}'")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn numeric_flags_parse_or_default() {
        let args = args(&["runner", "--limit", "20"]);
        assert_eq!(parse_optional_arg::<usize>(&args, "--limit").unwrap(), Some(20));
        assert_eq!(parse_optional_arg::<usize>(&args, "--offset").unwrap(), None);
        assert_eq!(parse_arg(&args, "--offset", 0usize).unwrap(), 0);
    }

    #[test]
    fn bad_numeric_flags_are_errors() {
        let args = args(&["runner", "--limit", "twenty", "--seed", "-1"]);
        let err = parse_optional_arg::<usize>(&args, "--limit").unwrap_err();
        assert!(err.to_string().contains("--limit"), "{err}");
        assert!(parse_arg(&args, "--seed", 42u64).is_err());
    }
}
