use std::fmt;
use std::time::Duration;

use vuload_metrics::MetricKind;

use crate::error::{Error, Result};

/// Raw threshold expressions attached to one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
    /// Stop the run early (verdict `Failed`) once any of these expressions fails mid-run.
    pub abort_on_fail: bool,
    /// Ignore mid-run failures until this much of the run has elapsed.
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdSet {
    pub fn new<I, S>(metric: impl Into<String>, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    pub fn abort_on_fail(mut self, delay: Option<Duration>) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NotEq,
}

impl Comparator {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
            Self::NotEq => left != right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    Percentile(f64),
}

impl Selector {
    /// Whether the selector has a meaning for series of `kind`.
    pub fn accepts(self, kind: MetricKind) -> bool {
        match self {
            Self::Avg | Self::Min | Self::Max | Self::Med | Self::Percentile(_) => {
                kind == MetricKind::Trend
            }
            Self::Count => matches!(
                kind,
                MetricKind::Trend | MetricKind::Counter | MetricKind::Rate
            ),
            Self::Rate => kind == MetricKind::Rate,
            Self::Value => kind == MetricKind::Gauge,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub selector: Selector,
    pub comparator: Comparator,
    pub literal: f64,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparator.holds(observed, self.literal)
    }
}

/// Parses `<selector> <comparator> <number>`, e.g. `p(95)<500` or `rate < 0.1`.
pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Longest tokens first so `<=` is not read as `<`.
    let ops = [
        ("===", Comparator::Eq),
        ("!=", Comparator::NotEq),
        ("<=", Comparator::Lte),
        (">=", Comparator::Gte),
        ("==", Comparator::Eq),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];
    let (op_pos, op_len, comparator) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing selector".to_string());
    }
    if right.is_empty() {
        return Err("missing literal".to_string());
    }

    let selector = parse_selector(left)?;

    let literal: f64 = right
        .parse()
        .map_err(|_| format!("non-numeric literal `{right}`"))?;
    if !literal.is_finite() {
        return Err(format!("non-numeric literal `{right}`"));
    }

    Ok(ThresholdExpr {
        selector,
        comparator,
        literal,
    })
}

fn parse_selector(left: &str) -> std::result::Result<Selector, String> {
    let lower = left.to_ascii_lowercase();
    let selector = match lower.as_str() {
        "avg" => Selector::Avg,
        "min" => Selector::Min,
        "max" => Selector::Max,
        "med" => Selector::Med,
        "count" => Selector::Count,
        "rate" => Selector::Rate,
        "value" => Selector::Value,
        _ => {
            let Some(inner) = lower.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(format!("unknown selector `{left}`"));
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile `{inner}` out of range [0, 100]"));
            }
            Selector::Percentile(p)
        }
    };
    Ok(selector)
}

/// One parsed expression bound to its metric.
#[derive(Debug, Clone)]
pub struct CompiledThreshold {
    pub metric: String,
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

/// Parses every expression of every set; the first malformed one is returned as an error.
pub fn compile(sets: &[ThresholdSet]) -> Result<Vec<CompiledThreshold>> {
    let mut out = Vec::new();
    for set in sets {
        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(|reason| Error::ThresholdSyntax {
                metric: set.metric.clone(),
                expression: raw.clone(),
                reason,
            })?;
            out.push(CompiledThreshold {
                metric: set.metric.clone(),
                source: raw.clone(),
                expr,
                abort_on_fail: set.abort_on_fail,
                delay_abort_eval: set.delay_abort_eval,
            });
        }
    }
    Ok(out)
}
