use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use vuload_core::ZeroSamplePolicy;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    // Bare numbers are seconds.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_tag(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("invalid tag '{input}' (expected KEY=VALUE)")),
    }
}

fn parse_zero_samples(input: &str) -> Result<ZeroSamplePolicy, String> {
    input
        .parse()
        .map_err(|_| format!("invalid zero-sample policy '{input}' (expected fail or skip)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a human-readable summary.
    HumanReadable,
    /// NDJSON progress and summary lines on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "vuload",
    author,
    version,
    about = "Virtual-user load testing engine",
    long_about = "vuload ramps a population of virtual users along a stage plan, runs the plan's steps in a loop on every VU, and judges the run against thresholds.\n\nPlans are YAML files describing stages, thresholds, custom metrics, the request steps of one iteration and the simulated target they run against.",
    after_help = "Examples:\n  vuload run plans/load-balancer.yaml\n  vuload run plans/load-balancer.yaml --max-duration 30s --output json\n  vuload run plans/load-balancer.yaml --report-out report.ndjson --tag env=staging\n  vuload check plans/load-balancer.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test plan
    Run(RunArgs),

    /// Validate a plan (stages, thresholds, steps) without running it
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan (.yaml)
    pub plan: PathBuf,

    /// Cancel the run after this long (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// How long retiring VUs may finish their iteration before they are aborted
    #[arg(long, value_parser = parse_duration)]
    pub grace_period: Option<Duration>,

    /// Outcome of thresholds whose metric has no samples
    #[arg(long, value_name = "fail|skip", value_parser = parse_zero_samples)]
    pub zero_samples: Option<ZeroSamplePolicy>,

    /// Add/override run tags (repeatable, KEY=VALUE)
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Append periodic and final reports as NDJSON to this file
    #[arg(long, value_name = "PATH")]
    pub report_out: Option<PathBuf>,

    /// Interval between reports (e.g. 1s)
    #[arg(long, value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Log filter used when RUST_LOG is not set (e.g. warn, info, vuload_core=debug)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("15"), Ok(Duration::from_secs(15)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn parse_tag_requires_key() {
        assert_eq!(
            parse_tag("env=staging"),
            Ok(("env".to_string(), "staging".to_string()))
        );
        assert_eq!(parse_tag("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_tag("=x").is_err());
        assert!(parse_tag("novalue").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "vuload",
            "run",
            "plan.yaml",
            "--max-duration",
            "30s",
            "--grace-period",
            "2s",
            "--zero-samples",
            "skip",
            "--tag",
            "env=ci",
            "--tag",
            "team=perf",
            "--report-out",
            "out.ndjson",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.max_duration, Some(Duration::from_secs(30)));
                assert_eq!(args.grace_period, Some(Duration::from_secs(2)));
                assert_eq!(args.zero_samples, Some(ZeroSamplePolicy::Skip));
                assert_eq!(args.tags.len(), 2);
                assert_eq!(args.report_out, Some(PathBuf::from("out.ndjson")));
                assert_eq!(args.output, OutputFormat::Json);
                assert_eq!(args.log_level, "warn");
            }
            Command::Check(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_check() {
        let cli = match Cli::try_parse_from(["vuload", "check", "plan.yaml"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        assert!(matches!(cli.command, Command::Check(args) if args.plan == PathBuf::from("plan.yaml")));
    }
}
