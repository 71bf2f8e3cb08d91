use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use vuload_core::{
    IterationContext, IterationFault, Method, MetricKind, RunOptions, Stage, ThresholdSet,
    ZeroSamplePolicy,
};

/// A load test plan as written in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct LoadPlan {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,

    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdYaml>,

    /// Custom metrics declared up front, by kind (`counter`, `gauge`, `rate`, `trend`).
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,

    /// Reject samples for metrics that are neither built in nor declared.
    #[serde(default)]
    pub strict_metrics: bool,

    #[serde(default)]
    pub zero_samples: Option<String>,

    #[serde(default)]
    pub options: PlanOptionsYaml,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub target: TargetYaml,

    /// Written as single-key maps (`- sleep: 1s`), not YAML tags.
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    One(String),
    Many(Vec<String>),
    #[serde(rename_all = "camelCase")]
    Detailed {
        expressions: Vec<String>,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(default)]
        delay_abort_eval: Option<YamlDuration>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanOptionsYaml {
    pub tick: Option<YamlDuration>,
    pub grace_period: Option<YamlDuration>,
    pub spawn_jitter: Option<YamlDuration>,
    pub max_duration: Option<YamlDuration>,
    pub report_interval: Option<YamlDuration>,
}

/// Simulated service the steps run against.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TargetYaml {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_latency")]
    pub latency: YamlDuration,
    #[serde(default)]
    pub latency_jitter: YamlDuration,
    /// Share of requests answered with a 5xx.
    #[serde(default)]
    pub error_rate: f64,
    /// Share of requests that fail without a response (status 0).
    #[serde(default)]
    pub transport_error_rate: f64,
}

impl Default for TargetYaml {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            latency: default_latency(),
            latency_jitter: YamlDuration::default(),
            error_rate: 0.0,
            transport_error_rate: 0.0,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_latency() -> YamlDuration {
    YamlDuration(Duration::from_millis(50))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum StepYaml {
    Request(RequestStepYaml),
    Sleep(YamlDuration),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestStepYaml {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    /// Endpoint name in the per-endpoint breakdown; defaults to the path without its query.
    #[serde(default)]
    pub name: Option<String>,
    /// Name of a check asserting `expectStatus`.
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default = "default_status")]
    pub expect_status: u16,
    /// Rate metric fed with `status != expectStatus`.
    #[serde(default)]
    pub error_metric: Option<String>,
    /// Trend metric fed with the request duration.
    #[serde(default)]
    pub trend_metric: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

/// Duration written as a humantime string (`10s`, `1m30s`) or as seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(pub Duration);

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            FracSecs(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(s) => Ok(Self(Duration::from_secs(s))),
            Raw::FracSecs(s) if s.is_finite() && s >= 0.0 => Ok(Self(Duration::from_secs_f64(s))),
            Raw::FracSecs(_) => Err(serde::de::Error::custom(
                "duration must be a non-negative, finite number of seconds",
            )),
            Raw::Text(t) => humantime::parse_duration(t.trim())
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl LoadPlan {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read plan: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid plan: {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let plan: Self = serde_yaml::from_str(raw)?;
        if plan.steps.is_empty() {
            anyhow::bail!("`steps` must contain at least one step");
        }
        let t = &plan.target;
        for (name, v) in [
            ("errorRate", t.error_rate),
            ("transportErrorRate", t.transport_error_rate),
        ] {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("`target.{name}` must be within [0, 1] (got {v})");
            }
        }
        if t.error_rate + t.transport_error_rate > 1.0 {
            anyhow::bail!("`target.errorRate` + `target.transportErrorRate` must not exceed 1");
        }
        Ok(plan)
    }

    pub(crate) fn run_options(&self) -> anyhow::Result<RunOptions> {
        let mut opts = RunOptions::new(
            self.stages
                .iter()
                .map(|s| Stage::new(s.duration.0, s.target))
                .collect(),
        );
        opts.start_vus = self.start_vus;

        opts.thresholds = self
            .thresholds
            .iter()
            .map(|(metric, t)| match t {
                ThresholdYaml::One(e) => ThresholdSet::new(metric.as_str(), [e.as_str()]),
                ThresholdYaml::Many(es) => ThresholdSet::new(metric.as_str(), es.iter().cloned()),
                ThresholdYaml::Detailed {
                    expressions,
                    abort_on_fail,
                    delay_abort_eval,
                } => {
                    let set = ThresholdSet::new(metric.as_str(), expressions.iter().cloned());
                    if *abort_on_fail {
                        set.abort_on_fail(delay_abort_eval.map(|d| d.0))
                    } else {
                        set
                    }
                }
            })
            .collect();

        opts.metrics = self
            .metrics
            .iter()
            .map(|(name, kind)| {
                let kind: MetricKind = kind.parse().map_err(|_| {
                    anyhow::anyhow!(
                        "metric `{name}` has unknown kind `{kind}` (expected counter, gauge, rate or trend)"
                    )
                })?;
                Ok((name.clone(), kind))
            })
            .collect::<anyhow::Result<_>>()?;

        if let Some(policy) = &self.zero_samples {
            opts.zero_sample_policy = policy.parse::<ZeroSamplePolicy>().map_err(|_| {
                anyhow::anyhow!("invalid `zeroSamples` `{policy}` (expected fail or skip)")
            })?;
        }

        let o = &self.options;
        if let Some(d) = o.tick {
            opts.tick = d.0;
        }
        if let Some(d) = o.grace_period {
            opts.grace_period = d.0;
        }
        if let Some(d) = o.spawn_jitter {
            opts.spawn_jitter = d.0;
        }
        if let Some(d) = o.report_interval {
            opts.report_interval = d.0;
        }
        opts.max_duration = o.max_duration.map(|d| d.0);

        opts.tags = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(name) = &self.name
            && !self.tags.contains_key("plan")
        {
            opts.tags.push(("plan".to_string(), name.clone()));
        }

        Ok(opts)
    }

    pub(crate) fn flow(&self) -> anyhow::Result<Flow> {
        let base = self.target.base_url.trim_end_matches('/');
        let steps = self
            .steps
            .iter()
            .map(|step| match step {
                StepYaml::Sleep(d) => Ok(Step::Sleep(d.0)),
                StepYaml::Request(r) => {
                    let method = Method::from_bytes(r.method.to_ascii_uppercase().as_bytes())
                        .with_context(|| format!("invalid http method `{}`", r.method))?;
                    let path = if r.path.starts_with('/') {
                        r.path.clone()
                    } else {
                        format!("/{}", r.path)
                    };
                    let name = match &r.name {
                        Some(name) => name.clone(),
                        None => vuload_core::endpoint_name(&path).to_string(),
                    };
                    Ok(Step::Request {
                        method,
                        url: format!("{base}{path}"),
                        name,
                        check: r.check.clone(),
                        expect_status: r.expect_status,
                        error_metric: r.error_metric.clone(),
                        trend_metric: r.trend_metric.clone(),
                    })
                }
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Flow {
            steps: steps.into(),
        })
    }
}

#[derive(Debug, Clone)]
enum Step {
    Request {
        method: Method,
        url: String,
        name: String,
        check: Option<String>,
        expect_status: u16,
        error_metric: Option<String>,
        trend_metric: Option<String>,
    },
    Sleep(Duration),
}

/// The steps of one iteration, shared by every VU.
#[derive(Debug, Clone)]
pub(crate) struct Flow {
    steps: Arc<[Step]>,
}

impl Flow {
    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    pub(crate) async fn execute(self, ctx: IterationContext) -> Result<(), IterationFault> {
        for step in self.steps.iter() {
            match step {
                Step::Sleep(d) => ctx.pace(*d).await,
                Step::Request {
                    method,
                    url,
                    name,
                    check,
                    expect_status,
                    error_metric,
                    trend_metric,
                } => {
                    let res = ctx.request_named(method.clone(), url, name).await;
                    let ok = res.status == *expect_status;
                    if let Some(name) = check {
                        ctx.check(name, ok);
                    }
                    if let Some(metric) = error_metric {
                        ctx.record(metric, !ok)?;
                    }
                    if let Some(metric) = trend_metric {
                        ctx.record(metric, res.timings.duration)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name: lb
stages:
  - { duration: 30s, target: 10 }
  - { duration: 1m, target: 10 }
  - { duration: 30, target: 0 }
thresholds:
  http_req_duration: ["p(95)<500"]
  errors: "rate<0.1"
  response_time:
    expressions: ["avg<300"]
    abortOnFail: true
    delayAbortEval: 10s
metrics:
  errors: rate
  response_time: trend
zeroSamples: skip
options:
  gracePeriod: 2s
tags:
  test: load-balancer-test
target:
  baseUrl: http://localhost:8080/
  latency: 20ms
  errorRate: 0.05
steps:
  - request:
      path: /round-robin/
      check: round-robin status is 200
      errorMetric: errors
      trendMetric: response_time
  - sleep: 1s
"#;

    fn parsed() -> LoadPlan {
        LoadPlan::parse(PLAN).unwrap_or_else(|e| panic!("plan failed to parse: {e:#}"))
    }

    #[test]
    fn parses_stages_and_options() -> anyhow::Result<()> {
        let opts = parsed().run_options()?;
        assert_eq!(
            opts.stages,
            vec![
                Stage::new(Duration::from_secs(30), 10),
                Stage::new(Duration::from_secs(60), 10),
                Stage::new(Duration::from_secs(30), 0),
            ]
        );
        assert_eq!(opts.grace_period, Duration::from_secs(2));
        assert_eq!(opts.zero_sample_policy, ZeroSamplePolicy::Skip);
        assert_eq!(
            opts.metrics,
            vec![
                ("errors".to_string(), MetricKind::Rate),
                ("response_time".to_string(), MetricKind::Trend),
            ]
        );
        assert!(opts.tags.contains(&("plan".to_string(), "lb".to_string())));
        assert!(opts.validate().is_ok());
        Ok(())
    }

    #[test]
    fn parses_every_threshold_shape() -> anyhow::Result<()> {
        let opts = parsed().run_options()?;
        let by_metric = |m: &str| {
            opts.thresholds
                .iter()
                .find(|t| t.metric == m)
                .unwrap_or_else(|| panic!("missing thresholds for {m}"))
        };

        assert_eq!(by_metric("errors").expressions, vec!["rate<0.1".to_string()]);
        assert_eq!(
            by_metric("http_req_duration").expressions,
            vec!["p(95)<500".to_string()]
        );
        let rt = by_metric("response_time");
        assert!(rt.abort_on_fail);
        assert_eq!(rt.delay_abort_eval, Some(Duration::from_secs(10)));
        Ok(())
    }

    #[test]
    fn builds_absolute_urls() -> anyhow::Result<()> {
        let flow = parsed().flow()?;
        assert_eq!(flow.len(), 2);
        match &flow.steps[0] {
            Step::Request { url, method, .. } => {
                assert_eq!(url, "http://localhost:8080/round-robin/");
                assert_eq!(*method, Method::GET);
            }
            other => panic!("expected request, got {other:?}"),
        }
        assert!(matches!(flow.steps[1], Step::Sleep(d) if d == Duration::from_secs(1)));
        Ok(())
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        assert!(LoadPlan::parse("stages: []\nsteps: []\nbogus: 1\n").is_err());
        assert!(LoadPlan::parse("stages: []\nsteps: []\n").is_err());

        let bad_rate = PLAN.replace("errorRate: 0.05", "errorRate: 1.5");
        assert!(LoadPlan::parse(&bad_rate).is_err());

        let bad_kind = PLAN.replace("errors: rate\n", "errors: histogram\n");
        let plan = LoadPlan::parse(&bad_kind).unwrap_or_else(|e| panic!("{e:#}"));
        assert!(plan.run_options().is_err());
    }

    #[test]
    fn steps_are_single_key_maps() -> anyhow::Result<()> {
        let plan = LoadPlan::parse(
            "stages:\n  - { duration: 1s, target: 1 }\nsteps:\n  - request:\n      path: ok?x=1\n      method: post\n  - sleep: 250ms\n  - request: { path: /pi.php, name: pi }\n",
        )?;
        let flow = plan.flow()?;
        match &flow.steps[0] {
            Step::Request {
                url, method, name, ..
            } => {
                assert_eq!(url, "http://localhost:8080/ok?x=1");
                assert_eq!(*method, Method::POST);
                assert_eq!(name, "/ok");
            }
            other => panic!("expected request, got {other:?}"),
        }
        assert!(matches!(flow.steps[1], Step::Sleep(d) if d == Duration::from_millis(250)));
        assert!(matches!(&flow.steps[2], Step::Request { name, .. } if name == "pi"));
        Ok(())
    }

    #[test]
    fn yaml_duration_accepts_numbers_and_text() {
        let d: YamlDuration = serde_yaml::from_str("1.5").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(d.0, Duration::from_millis(1_500));
        let d: YamlDuration = serde_yaml::from_str("\"1m30s\"").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(d.0, Duration::from_secs(90));
        assert!(serde_yaml::from_str::<YamlDuration>("-1.0").is_err());
    }
}
