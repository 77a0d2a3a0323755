mod cli;
#[cfg_attr(not(feature = "classification"), allow(dead_code))]
mod reporting;

use anyhow::Context;
use cli::CliConfig;
use labelsort_core::{write_report, AssetLayout, Pipeline, RunLog, RunReport, Settings};
use std::io::{self, BufRead};

fn main() {
    let config = CliConfig::from_env().unwrap_or_else(|err| match err {
        cli::CliError::Help => {
            println!("{}", err);
            std::process::exit(0);
        }
        _ => {
            eprintln!("{}", err);
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
    });

    let outcome = run(&config);
    if let Err(error) = &outcome {
        eprintln!("Error: {:#}", error);
    }

    if config.wait_for_key {
        println!("Press Enter to exit...");
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
}

fn run(config: &CliConfig) -> anyhow::Result<()> {
    let layout = AssetLayout::new(&config.assets);
    let settings_path = config
        .config
        .clone()
        .unwrap_or_else(|| layout.config_file());
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("reading settings from {}", settings_path.display()))?;

    let pipeline = Pipeline::new(layout, settings);
    let log = RunLog::create(pipeline.layout().log_file()).context("creating run log")?;
    run_with_extractor(&pipeline, &log)
}

#[cfg(feature = "classification")]
fn run_with_extractor(pipeline: &Pipeline, log: &RunLog) -> anyhow::Result<()> {
    use labelsort_core::{init_ort_runtime, CentroidClassifier, ExtractorConfig, OnnxFeatureExtractor};

    let layout = pipeline.layout();
    let settings = pipeline.settings();
    if let Some(library) = settings.ort_library() {
        init_ort_runtime(layout.resolve(library)).context("initializing ONNX Runtime")?;
    }

    let model = layout.resolve(settings.feature_model());
    let extractor = OnnxFeatureExtractor::new(&model, ExtractorConfig::default())
        .with_context(|| format!("loading feature extractor {}", model.display()))?;
    execute(pipeline, CentroidClassifier::new(extractor), log)
}

#[cfg(not(feature = "classification"))]
fn run_with_extractor(_pipeline: &Pipeline, _log: &RunLog) -> anyhow::Result<()> {
    anyhow::bail!(
        "no feature extractor is compiled in; rebuild with `--features classification`"
    )
}

#[cfg_attr(not(feature = "classification"), allow(dead_code))]
fn execute<C>(pipeline: &Pipeline, mut classifier: C, log: &RunLog) -> anyhow::Result<()>
where
    C: labelsort_core::TrainableClassifier,
{
    let registry = pipeline
        .prepare(&mut classifier, log)
        .context("preparing classifier")?;
    log.log(
        &format!("Known images: {}. Classifying images...", registry.len()),
        true,
    )?;

    let classifier = std::sync::Mutex::new(classifier);
    let mut observer = reporting::ProgressObserver::new(log);
    let result = pipeline
        .sort(&classifier, &registry, &mut observer)
        .context("sorting images")?;
    observer.finish();

    let report = RunReport::new(&pipeline.sort_config(), &result);
    let report_path = pipeline.layout().report_file();
    match write_report(&report, &report_path) {
        Ok(_) => println!("Run report written to {}", report_path.display()),
        Err(error) => eprintln!("Error writing run report: {}", error),
    }

    log.log(&report.summary_line(), true)?;
    Ok(())
}
