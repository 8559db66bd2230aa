//! Subcommand handlers.

use crate::{Commands, ConfigAction, FitArgs};
use autoclass_core::config::workspace_config_path;
use autoclass_core::{FitConfig, FitOverrides, load_config, save_config};
use autoclass_ml::data::DatasetFetcher;
use autoclass_ml::{DatasetSource, FitSummary, ImageClassifier, ImageFolder, PredictInput};
use std::path::{Path, PathBuf};

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Fit(args) => handle_fit(args, workspace, config_file).await,
        Commands::Predict {
            run_dir,
            images,
            proba,
            json,
        } => handle_predict(&run_dir, images, proba, json),
        Commands::Summary { run_dir, json } => handle_summary(&run_dir, json),
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

impl FitArgs {
    fn overrides(&self) -> FitOverrides {
        FitOverrides {
            architectures: (!self.architectures.is_empty()).then(|| self.architectures.clone()),
            epochs: self.epochs,
            time_limit_secs: self.time_limit,
            num_trials: self.num_trials,
            search_strategy: self.strategy,
            seed: self.seed,
            ngpus_per_trial: self.ngpus_per_trial,
            total_gpus: self.total_gpus,
            max_concurrent_trials: self.max_concurrent,
            output_dir: self.output_dir.clone(),
            ..FitOverrides::default()
        }
    }
}

async fn handle_fit(
    args: FitArgs,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), config_file, Some(&args.overrides()))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let cache_dir = config.resolved_cache_dir();
    let source = DatasetSource::parse(&args.dataset);

    let mut classifier = ImageClassifier::new(config)?;
    let cancel = classifier.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping trials at the next epoch boundary");
            cancel.cancel();
        }
    });

    let fitted = classifier.fit(&source).await.map(FitSummary::clone);
    if let Some(dir) = classifier.run_dir() {
        println!("Run directory: {}", dir.display());
    }
    let summary = match fitted {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(summary) = classifier.fit_summary() {
                print_summary(summary);
            }
            return Err(e.into());
        }
    };
    print_summary(&summary);

    if !args.no_eval {
        let root = DatasetFetcher::new(cache_dir).resolve(&source).await?;
        if let Some(test) = ImageFolder::load(&root)?.test {
            let eval = classifier.evaluate(&test)?;
            println!(
                "Test accuracy: {:.4} ({} / {} known, {} unknown)",
                eval.accuracy, eval.correct, eval.known, eval.unknown
            );
        }
    }
    Ok(())
}

fn handle_predict(
    run_dir: &Path,
    images: Vec<PathBuf>,
    proba: bool,
    json: bool,
) -> anyhow::Result<()> {
    let classifier = ImageClassifier::load(run_dir)?;

    if proba {
        let classes = classifier.classes().unwrap_or_default().to_vec();
        let mut rows = Vec::with_capacity(images.len());
        for image in &images {
            rows.push((image, classifier.predict_proba(image)?));
        }
        if json {
            let out: Vec<_> = rows
                .iter()
                .map(|(path, probs)| {
                    serde_json::json!({
                        "image": path.display().to_string(),
                        "probabilities": probs,
                    })
                })
                .collect();
            let doc = serde_json::json!({ "classes": classes, "rows": out });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else {
            println!("image\t{}", classes.join("\t"));
            for (path, probs) in rows {
                let cells: Vec<String> = probs.iter().map(|p| format!("{p:.4}")).collect();
                println!("{}\t{}", path.display(), cells.join("\t"));
            }
        }
        return Ok(());
    }

    let predictions = classifier.predict(&PredictInput::Batch(images.clone()))?;
    if json {
        let out: Vec<_> = images
            .iter()
            .zip(&predictions)
            .map(|(path, p)| {
                serde_json::json!({
                    "image": path.display().to_string(),
                    "class": p.class,
                    "score": p.score,
                    "id": p.id,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (path, p) in images.iter().zip(&predictions) {
            println!("{}\t{}\t{:.4}\t{}", path.display(), p.class, p.score, p.id);
        }
    }
    Ok(())
}

fn handle_summary(run_dir: &Path, json: bool) -> anyhow::Result<()> {
    let summary = ImageClassifier::read_summary(run_dir)?
        .ok_or_else(|| anyhow::anyhow!("No summary found in {}", run_dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &FitSummary) {
    for (key, value) in summary.flatten() {
        println!("{key} = {value}");
    }
    if summary.trials.is_empty() {
        println!("No trial started within the time limit.");
        return;
    }
    println!();
    println!("{:<6} {:<10} {:<13} {:>7} {:>8}", "trial", "arch", "status", "epochs", "val_acc");
    for trial in &summary.trials {
        let val = trial
            .best_val_acc
            .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:<6} {:<10} {:<13} {:>7} {:>8}",
            trial.trial_index(),
            trial.config.architecture,
            trial.status,
            trial.epochs_run(),
            val
        );
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!("Configuration file already exists at: {}", config_path.display());
                return Ok(());
            }
            save_config(&config_path, &FitConfig::default())?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), config_file, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
