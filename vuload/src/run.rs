use std::path::Path;
use std::sync::Arc;

use vuload_core::{Registry, ReportSink, RunController, RunOptions};

use crate::cli::{CheckArgs, RunArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan::{Flow, LoadPlan};
use crate::run_error::RunError;
use crate::simulate::SimulatedTarget;
use crate::sink::{FanoutSink, NdjsonFileSink};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let (plan, mut options, flow) = load(&args.plan).await?;
    apply_overrides(&mut options, &args);
    options.validate()?;

    let out = output::formatter(args.output);
    out.print_header(&args.plan, &options);

    let mut sinks: Vec<Arc<dyn ReportSink>> = out.sink().into_iter().collect();
    if let Some(path) = &args.report_out {
        let file = NdjsonFileSink::create(path)
            .await
            .map_err(RunError::RuntimeError)?;
        sinks.push(Arc::new(file));
    }

    let registry = registry_for(&plan);
    let client = Arc::new(SimulatedTarget::new(&plan.target));

    let mut controller =
        RunController::new(options, client).with_registry(Arc::new(registry));
    controller = match sinks.len() {
        0 => controller,
        1 => match sinks.pop() {
            Some(sink) => controller.with_sink(sink),
            None => controller,
        },
        _ => controller.with_sink(Arc::new(FanoutSink::new(sinks))),
    };

    let cancel = controller.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            cancel.cancel();
        }
    });

    tracing::info!(plan = %args.plan.display(), steps = flow.len(), "starting run");
    let outcome = controller
        .run(move |ctx| flow.clone().execute(ctx))
        .await;
    interrupt.abort();
    let outcome = outcome?;

    out.print_summary(&outcome).map_err(RunError::RuntimeError)?;
    Ok(ExitCode::from_verdict(outcome.verdict))
}

/// Parses the plan and compiles everything a run would, without spawning a VU.
pub async fn check(args: CheckArgs) -> Result<(), RunError> {
    let (plan, options, flow) = load(&args.plan).await?;
    let stages = options.stages.len();
    let expressions = options
        .thresholds
        .iter()
        .map(|t| t.expressions.len())
        .sum::<usize>();
    let total = options.total_duration();

    let controller = RunController::new(options, Arc::new(SimulatedTarget::new(&plan.target)))
        .with_registry(Arc::new(registry_for(&plan)));
    controller.validate()?;

    println!(
        "plan ok: {stages} stage(s), {expressions} threshold expression(s), {} step(s), total {total:?}",
        flow.len(),
    );
    Ok(())
}

fn registry_for(plan: &LoadPlan) -> Registry {
    if plan.strict_metrics {
        Registry::strict()
    } else {
        Registry::default()
    }
}

async fn load(path: &Path) -> Result<(LoadPlan, RunOptions, Flow), RunError> {
    let plan = LoadPlan::load(path).await.map_err(RunError::InvalidInput)?;
    let options = plan.run_options().map_err(RunError::InvalidInput)?;
    let flow = plan.flow().map_err(RunError::InvalidInput)?;
    Ok((plan, options, flow))
}

fn apply_overrides(options: &mut RunOptions, args: &RunArgs) {
    if let Some(d) = args.max_duration {
        options.max_duration = Some(d);
    }
    if let Some(d) = args.grace_period {
        options.grace_period = d;
    }
    if let Some(d) = args.report_interval {
        options.report_interval = d;
    }
    if let Some(policy) = args.zero_samples {
        options.zero_sample_policy = policy;
    }
    for (k, v) in &args.tags {
        match options.tags.iter_mut().find(|(key, _)| key == k) {
            Some(slot) => slot.1 = v.clone(),
            None => options.tags.push((k.clone(), v.clone())),
        }
    }
}
