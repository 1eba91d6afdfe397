//! Subcommand handlers.
//!
//! Handlers return `Result<(), String>`; the binary prints the error and
//! exits with status 1.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::args::{BrandingArgs, ConfigAction, SourceArgs};
use super::enums::Provider;
use crate::assembly::{
    AssemblyEngine, AssemblyPlan, AssemblyResult, AssemblySettings, StageOutcome,
    WatermarkPosition, WatermarkSettings,
};
use crate::cancel::CancelFlag;
use crate::clock::{Sleeper, TokioSleeper};
use crate::concat::{ConcatEngine, ConcatSettings};
use crate::config::{self, Config};
use crate::media::{FfmpegTools, MediaTools};
use crate::planner::{plan_with_overlap, total_secs, SegmentBounds};
use crate::project::ProjectDir;
use crate::provider::{KlingClient, ProviderError, ProviderKind, RunwayClient, VideoProvider};
use crate::run::{ProjectRun, RunFailure, RunRequest};
use crate::tracker::{JsonTracker, ProgressTracker};

/// Segment bounds of a provider as configured.
pub fn provider_bounds(provider: Provider, config: &Config) -> SegmentBounds {
    match provider {
        Provider::Kling => SegmentBounds::variable(config.kling.min_secs, config.kling.max_secs),
        Provider::Runway => SegmentBounds::fixed(config.runway.clip_secs as f64),
    }
}

/// Create the provider client, reading credentials from the environment.
pub fn build_provider(
    provider: Provider,
    config: &Config,
    sleeper: Arc<dyn Sleeper>,
) -> Result<Arc<dyn VideoProvider>, String> {
    let poll = config.poll.policy();
    let client: Result<Arc<dyn VideoProvider>, ProviderError> = match provider {
        Provider::Kling => {
            KlingClient::new(&config.kling, poll, sleeper).map(|c| Arc::new(c) as Arc<_>)
        }
        Provider::Runway => {
            RunwayClient::new(&config.runway, poll, sleeper).map(|c| Arc::new(c) as Arc<_>)
        }
    };
    client.map_err(|e| match e {
        ProviderError::MissingCredentials {
            provider: ProviderKind::Kling,
        } => "KLING_ACCESS_KEY and KLING_SECRET_KEY must be set.\n\n\
              Add them to a .env file or export them in your shell."
            .to_string(),
        ProviderError::MissingCredentials {
            provider: ProviderKind::Runway,
        } => "RUNWAY_API_KEY must be set.\n\n\
              Add it to a .env file or export it in your shell."
            .to_string(),
        other => format!("Failed to create {} client: {}", ProviderKind::from(provider), other),
    })
}

/// Print the planned segment lengths.
pub fn plan(duration: f64, provider: Provider, config: &Config) -> Result<(), String> {
    let bounds = provider_bounds(provider, config);
    let lengths = plan_with_overlap(duration, &bounds, config.concat.crossfade_secs)
        .map_err(|e| e.to_string())?;

    println!(
        "{} segment(s) for {:.2}s with {}:",
        lengths.len(),
        duration,
        ProviderKind::from(provider)
    );
    for (i, len) in lengths.iter().enumerate() {
        println!("  segment {:03}: {:.2}s", i, len);
    }
    println!("Total: {:.2}s", total_secs(&lengths));
    Ok(())
}

/// Join clips into one file.
pub fn concat(
    inputs: &[PathBuf],
    output: &Path,
    crossfade: Option<f64>,
    max_duration: Option<f64>,
    config: &Config,
) -> Result<(), String> {
    let mut settings = ConcatSettings::from(&config.concat).with_max_duration(max_duration);
    if let Some(crossfade) = crossfade {
        settings.crossfade_secs = crossfade;
    }
    let engine = ConcatEngine::new(Arc::new(FfmpegTools::new()), settings);
    let layout = engine
        .concatenate(inputs, output)
        .map_err(|e| e.to_string())?;

    println!(
        "Wrote {} ({} clip(s), {:.2}s)",
        output.display(),
        layout.clips.len(),
        layout.total_secs()
    );
    for (i, boundary) in layout.boundaries().iter().enumerate() {
        println!("  boundary {}: {:.3}s", i + 1, boundary);
    }
    Ok(())
}

/// Generate a chain and join it into `<project>/main.mp4`.
pub fn generate(source: &SourceArgs, config: &Config, cancel: CancelFlag) -> Result<(), String> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        let (project, tracker, run) = prepare_run(source, config, cancel)?;
        let request = run_request(source, &BrandingArgs::default(), config)?;

        let chain = run
            .generate(&project, &request)
            .await
            .map_err(|f| describe_failure(&f))?;

        println!(
            "Generated {} segment(s), {:.2}s realized",
            chain.segments.len(),
            chain.realized_secs()
        );
        println!("Main video: {}", project.main_path().display());
        println!("Tracker: {}", tracker.path().display());
        Ok(())
    })
}

/// Generate, join and assemble.
pub fn run(
    source: &SourceArgs,
    branding: &BrandingArgs,
    config: &Config,
    cancel: CancelFlag,
) -> Result<(), String> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        let (project, tracker, run) = prepare_run(source, config, cancel)?;
        let request = run_request(source, branding, config)?;

        let output = run
            .execute(&project, &request)
            .await
            .map_err(|f| describe_failure(&f))?;

        print_stages(&output.assembly);
        if let Some(path) = &output.report.final_path {
            println!("Final video: {}", path.display());
        }
        println!("Tracker: {}", tracker.path().display());
        Ok(())
    })
}

/// Apply finishing stages to an existing main video.
pub fn assemble(
    main: &Path,
    project_dir: &Path,
    audio: Option<&Path>,
    output: Option<&Path>,
    branding: &BrandingArgs,
    config: &Config,
    cancel: CancelFlag,
) -> Result<(), String> {
    let project = ProjectDir::acquire(project_dir).map_err(|e| e.to_string())?;
    let tracker = Arc::new(JsonTracker::create(project.path()).map_err(|e| e.to_string())?);
    let settings = assembly_settings(branding, config)?;

    let plan = AssemblyPlan {
        audio_path: audio.map(Path::to_path_buf),
        intro_path: branding.intro.clone(),
        outro_path: branding.outro.clone(),
        title_text: branding.title.clone(),
        subtitle_path: branding.subtitles.clone(),
        watermark: watermark(branding, config)?,
        ..AssemblyPlan::new(
            main,
            output
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project.final_path()),
        )
    };

    let engine = AssemblyEngine::new(Arc::new(FfmpegTools::new()), settings)
        .with_cancel(cancel)
        .with_tracker(tracker.clone() as Arc<dyn ProgressTracker>);

    match engine.assemble(&plan, project.path()) {
        Ok(result) => {
            print_stages(&result);
            println!("Final video: {}", plan.output_path.display());
            Ok(())
        }
        Err(failure) => {
            print_stages(&failure.result);
            if let Some(path) = &failure.last_good {
                println!("Last good video: {}", path.display());
            }
            Err(failure.to_string())
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, config_path: Option<&Path>) -> Result<(), String> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load(config_path).map_err(|e| e.to_string())?;
            if path.exists() {
                println!("# Config file: {} (exists)", path.display());
            } else {
                println!("# Config file: {} (not found, showing defaults)", path.display());
            }
            println!();
            print!("{}", config.to_toml().map_err(|e| e.to_string())?);
            Ok(())
        }
        ConfigAction::Init => {
            if path.exists() {
                return Err(format!(
                    "Config file already exists: {}\nUse 'reelsmith config show' to view current settings.",
                    path.display()
                ));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Error creating config directory: {}", e))?;
            }
            let content = Config::default().to_toml().map_err(|e| e.to_string())?;
            std::fs::write(&path, format!("# reelsmith configuration\n\n{}", content))
                .map_err(|e| format!("Error writing config file: {}", e))?;

            println!("Created config file: {}", path.display());
            Ok(())
        }
    }
}

fn prepare_run(
    source: &SourceArgs,
    config: &Config,
    cancel: CancelFlag,
) -> Result<(ProjectDir, Arc<JsonTracker>, ProjectRun), String> {
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let provider = build_provider(source.provider, config, Arc::clone(&sleeper))?;
    let media: Arc<dyn MediaTools> = Arc::new(FfmpegTools::new());

    let project = ProjectDir::acquire(&source.project).map_err(|e| e.to_string())?;
    let tracker = if source.resume {
        JsonTracker::open(project.path())
    } else {
        JsonTracker::create(project.path())
    };
    let tracker = Arc::new(tracker.map_err(|e| e.to_string())?);

    let run = ProjectRun::new(provider, media)
        .with_config(config)
        .map_err(|e| e.to_string())?
        .with_sleeper(sleeper)
        .with_prompts(source.prompt.clone())
        .with_cancel(cancel)
        .with_tracker(tracker.clone() as Arc<dyn ProgressTracker>);

    Ok((project, tracker, run))
}

fn run_request(
    source: &SourceArgs,
    branding: &BrandingArgs,
    config: &Config,
) -> Result<RunRequest, String> {
    Ok(RunRequest {
        source_image: source.image.clone(),
        target_secs: source.duration,
        audio_path: source.audio.clone(),
        intro_path: branding.intro.clone(),
        outro_path: branding.outro.clone(),
        title_text: branding.title.clone(),
        subtitle_path: branding.subtitles.clone(),
        watermark: watermark(branding, config)?,
        resume: source.resume,
    })
}

/// Assembly settings from config with CLI overrides.
fn assembly_settings(branding: &BrandingArgs, config: &Config) -> Result<AssemblySettings, String> {
    let mut settings = AssemblySettings::from_config(config).map_err(|e| e.to_string())?;
    if let Some(style) = branding.subtitle_style {
        settings.subtitle_style = style.into();
    }
    Ok(settings)
}

/// Watermark from CLI flags, falling back to the config file.
fn watermark(branding: &BrandingArgs, config: &Config) -> Result<Option<WatermarkSettings>, String> {
    let from_config = WatermarkSettings::from_config(&config.assembly.watermark)?;
    let Some(logo) = branding
        .logo
        .clone()
        .or_else(|| from_config.as_ref().map(|w| w.logo.clone()))
    else {
        return Ok(None);
    };

    let base = from_config.unwrap_or_else(|| WatermarkSettings::new(logo.clone()));
    let position = match branding.position {
        Some(p) => WatermarkPosition::from(p),
        None => base.position,
    };
    let settings = WatermarkSettings {
        logo,
        position,
        opacity: branding.opacity.unwrap_or(base.opacity),
        scale: branding.scale.unwrap_or(base.scale),
    };
    settings.validate()?;
    Ok(Some(settings))
}

fn print_stages(result: &AssemblyResult) {
    for report in &result.stages {
        let outcome = match &report.outcome {
            StageOutcome::Succeeded => "done".to_string(),
            StageOutcome::Skipped => "skipped".to_string(),
            StageOutcome::Failed { error } => format!("FAILED: {}", error),
        };
        println!("  {:<10} {:>6}ms  {}", report.stage.name(), report.duration_ms, outcome);
    }
}

fn describe_failure(failure: &RunFailure) -> String {
    let mut message = failure.to_string();
    if let Some(path) = &failure.report.partial_path {
        message.push_str(&format!("\nLast good video: {}", path.display()));
    }
    message
}
