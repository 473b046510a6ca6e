use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;
use std::path::{Path, PathBuf};

use bluelight::scenario::Scenario;
use bluelight::{AnalysisSetting, CacheStats, OptimalLocations, Orchestrator, PassOutcome, PassReport};

/// 載入情境檔並執行一次完整的視線分析
#[derive(Parser, Debug)]
#[command(name = "bluelight", version, about)]
struct Args {
    /// 情境檔（JSON）
    scenario: PathBuf,

    /// 分析設定檔
    #[arg(short, long, default_value = "analysis.toml")]
    config: PathBuf,

    /// log4rs 設定檔
    #[arg(long, default_value = "log4rs.yml")]
    log_config: PathBuf,

    /// 同時在關注區域內搜尋最佳觀察位置
    #[arg(long)]
    optimal: bool,

    /// 輸出縮排過的 JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct Output<'a> {
    report: &'a PassReport,
    cache: CacheStats,
    optimal: Option<OptimalLocations>,
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        log4rs::init_file(path, Default::default())
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok(());
    }

    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S%.3f)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    warn!("{} not found, logging to stderr", path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_config)?;

    let mut setting = AnalysisSetting::load(&args.config)?;
    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;
    scenario.override_setting(&mut setting);

    let mut orchestrator = Orchestrator::new(setting)?;
    let handle = match scenario.apply(&mut orchestrator)? {
        Some(handle) => handle,
        None => orchestrator.request_recompute(bluelight::AnalysisMode::Final)?,
    };

    let report = match handle.wait() {
        PassOutcome::Completed(report) => report,
        PassOutcome::Cancelled { pass_id } => bail!("analysis pass {} was cancelled", pass_id),
    };
    info!(
        "pass {} finished with {} visible areas and {} failures",
        report.pass_id,
        report.visibilities.len(),
        report.failures.len()
    );

    let optimal = match (args.optimal, scenario.area_of_interest_polygon()) {
        (true, Some(area_of_interest)) => Some(orchestrator.find_optimal_locations(&area_of_interest, true)?),
        (true, None) => {
            warn!("--optimal needs an area_of_interest in the scenario");
            None
        }
        _ => None,
    };

    let output = Output {
        report: &report,
        cache: orchestrator.cache_stats(),
        optimal,
    };
    let text = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", text);
    Ok(())
}
