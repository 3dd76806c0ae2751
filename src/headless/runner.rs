//! Headless runner - executes the configured suite and reports NDJSON events

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use simfleet_app::config::{load_settings_strict, Settings};
use simfleet_app::{
    ConsumeTimes, EngineEnv, EngineLifecycleListener, EngineRegistry, NoopDriver, PortAllocator,
    ProcessExecutor, RepeatScheduler, RunReport, SchedulerListener, SessionDriver, ToolAvailability,
};
use simfleet_core::prelude::*;
use simfleet_core::Platform;
use simfleet_daemon::ProcessRunner;

use super::{EventBody, EventListener, HeadlessEvent};
use crate::suite::CommandSuite;

/// Command-line overrides applied on top of the config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub retries: Option<usize>,
    pub partition_size: Option<usize>,
    pub consume: Option<usize>,
    /// Print the planned iterations without booting anything
    pub dry_run: bool,
}

impl RunOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(retries) = self.retries {
            settings.scheduler.total_retries = retries;
        }
        if let Some(size) = self.partition_size {
            settings.scheduler.partition_size = size;
        }
        if let Some(consume) = self.consume {
            settings.scheduler.consume = consume;
        }
    }
}

/// Run the project's suite on real emulators and simulators
pub async fn run_headless(project_path: &Path, overrides: &RunOverrides) -> Result<RunReport> {
    info!("═══════════════════════════════════════════════════════");
    info!("simfleet starting in HEADLESS mode");
    info!("Project: {}", project_path.display());
    info!("═══════════════════════════════════════════════════════");

    let result = prepare(project_path, overrides).await;
    let (settings, env) = match result {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Run setup failed: {}", e);
            HeadlessEvent::error(e.to_string(), true).emit();
            return Err(e);
        }
    };

    let result = run_suite(&settings, env, Arc::new(NoopDriver), overrides.dry_run).await;
    info!("simfleet headless mode exiting");
    result
}

async fn prepare(
    project_path: &Path,
    overrides: &RunOverrides,
) -> Result<(Settings, EngineEnv<ProcessExecutor>)> {
    let mut settings = load_settings_strict(project_path)?;
    overrides.apply(&mut settings);
    settings.validate()?;

    let tools = ToolAvailability::check().await;
    if !overrides.dry_run {
        check_tools(&settings, &tools)?;
    }

    let env = EngineEnv {
        runner: Arc::new(ProcessExecutor::new()),
        ports: Arc::new(PortAllocator::default()),
        tools: Arc::new(tools),
        retry: settings.retry,
    };
    Ok((settings, env))
}

/// Fail early when a configured engine's platform tools are missing
fn check_tools(settings: &Settings, tools: &ToolAvailability) -> Result<()> {
    for engine in &settings.engines {
        let missing = match engine.platform {
            Platform::Android => tools.android_unavailable_message(),
            Platform::Ios => tools.ios_unavailable_message(),
        };
        if let Some(message) = missing {
            return Err(Error::tool_unavailable(message));
        }
    }
    Ok(())
}

/// Run the suite against the engines described by `settings`.
///
/// Emits the full event stream; a failed run ends with an `error` event
/// instead of `all_tests_finished`.
pub async fn run_suite<R>(
    settings: &Settings,
    env: EngineEnv<R>,
    driver: Arc<dyn SessionDriver>,
    dry_run: bool,
) -> Result<RunReport>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    let result = execute(settings, env, driver, dry_run).await;
    match &result {
        Ok(report) if !dry_run => HeadlessEvent::all_tests_finished(report).emit(),
        Ok(_) => {}
        Err(e) => {
            error!("Run failed: {}", e);
            HeadlessEvent::error(e.to_string(), e.is_fatal()).emit();
        }
    }
    result
}

async fn execute<R>(
    settings: &Settings,
    env: EngineEnv<R>,
    driver: Arc<dyn SessionDriver>,
    dry_run: bool,
) -> Result<RunReport>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    if settings.engines.is_empty() {
        return Err(Error::config_invalid("no engines configured"));
    }

    let suite = CommandSuite::new(&settings.suite.command, Arc::clone(&env.runner))?;
    let registry = Arc::new(EngineRegistry::from_descriptors(
        &settings.engines,
        &settings.ports,
        &env,
        driver,
    )?);

    let scheduler_settings = &settings.scheduler;
    let listeners: Vec<Arc<dyn SchedulerListener>> = vec![
        Arc::new(EngineLifecycleListener::new(Arc::clone(&registry))),
        Arc::new(EventListener::new(
            scheduler_settings.total_retries,
            scheduler_settings.partition_size,
            registry.len(),
        )),
    ];
    let scheduler = RepeatScheduler::schedule(
        scheduler_settings.total_retries,
        scheduler_settings.partition_size,
        listeners,
    )?
    .with_consumer(ConsumeTimes(scheduler_settings.consume));

    if dry_run {
        for ctx in scheduler.tuples(registry.len()) {
            let device = settings
                .engines
                .get(ctx.slot)
                .map(|e| e.device_identity.clone());
            HeadlessEvent::iteration_planned(ctx, device).emit();
        }
        return Ok(RunReport::default());
    }

    info!("Suite command: {}", suite.command());
    let body = Arc::new(EventBody::new(Arc::new(suite)));
    let report = scheduler.run(registry, body).await?;

    info!(
        "Run finished: {} passed, {} failed",
        report.passed(),
        report.failed()
    );
    Ok(report)
}
