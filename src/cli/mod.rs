//! `dishlab` command dispatch and terminal output.

mod args;

pub use args::{BoxArg, ClassesCommand, Cli, Command, ConfigCommand, MonitorCommand};

use std::error::Error;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc;

use serde::Serialize;
use tracing::info;

use crate::api::{OpaqueMap, TrainingMode, TrainingStatus};
use crate::app_dirs;
use crate::config::{self, ClientConfig};
use crate::controller::AppController;
use crate::labeling::Point;
use crate::polling::{PollEvent, PollHandle, StopReason};
use crate::store::AppStore;

type CliResult = Result<(), Box<dyn Error>>;

/// Resolve configuration for `cli` and run its command.
pub fn run(cli: Cli) -> CliResult {
    let config = config::load(cli.api_url.as_deref())?;
    info!(
        "Using backend at {} ({:?})",
        config.api.base_url, config.base_url_source
    );
    let controller = AppController::from_config(&config, Arc::new(AppStore::new()));
    let output = Output { json: cli.json };
    dispatch(cli.command, &controller, &config, output)
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(self, value: &T, summary: impl FnOnce(&T)) -> CliResult {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            summary(value);
        }
        Ok(())
    }
}

fn dispatch(
    command: Command,
    controller: &AppController,
    config: &ClientConfig,
    output: Output,
) -> CliResult {
    match command {
        Command::Status => {
            let status = controller.refresh_status()?;
            output.emit(&status, print_status)
        }
        Command::Watch(args) => {
            let (events_tx, events_rx) = mpsc::channel();
            let handle = if args.until_idle {
                controller.watch_training(Some(events_tx))
            } else {
                controller.start_background_polling(Some(events_tx))
            };
            follow(handle, events_rx, output)
        }
        Command::Detect(args) => {
            let result = controller.detect(&args.image, args.confidence)?;
            if let Some(dest) = &args.save_annotated {
                match result.annotated_image()? {
                    Some(bytes) => {
                        std::fs::write(dest, bytes)?;
                        eprintln!("Annotated image written to {}", dest.display());
                    }
                    None => eprintln!("Backend returned no annotated image"),
                }
            }
            output.emit(&result, |result| {
                println!("{}", result.message);
                for detection in &result.detections {
                    let [x1, y1, x2, y2] = detection.bbox;
                    println!(
                        "  {:<16} {:>5.1}%  [{x1:.0}, {y1:.0}, {x2:.0}, {y2:.0}]",
                        detection.class_name,
                        detection.confidence * 100.0
                    );
                }
            })
        }
        Command::Label(args) => {
            let image = controller.open_image(&args.image)?;
            eprintln!(
                "Labeling {} ({}x{})",
                image.path.display(),
                image.width,
                image.height
            );
            for BoxArg { values, label } in &args.boxes {
                let [x, y, width, height] = *values;
                controller.add_label(x, y, width, height, label)?;
            }
            for BoxArg { values, label } in &args.drags {
                let [x1, y1, x2, y2] = *values;
                controller.add_label_from_drag(Point::new(x1, y1), Point::new(x2, y2), label)?;
            }
            let receipt = controller.submit_labels()?;
            output.emit(&receipt, |receipt| {
                println!(
                    "{} ({} labels saved to {})",
                    receipt.message, receipt.total_labels, receipt.saved_path
                );
            })
        }
        Command::Train(args) => {
            if !args.yes && !confirm(&format!("Start training for {} epochs?", args.epochs.trim()))? {
                eprintln!("Cancelled");
                return Ok(());
            }
            let mode = if args.sync {
                TrainingMode::Sync
            } else {
                TrainingMode::Async
            };
            if let Err(err) = controller.refresh_analysis() {
                tracing::debug!("Dataset analysis unavailable before training: {err}");
            }
            let response = controller.start_training(&args.epochs, mode)?;
            output.emit(&response, |response| println!("{}", response.message))?;
            if args.no_watch {
                return Ok(());
            }
            let (events_tx, events_rx) = mpsc::channel();
            let handle = controller.watch_training(Some(events_tx));
            follow(handle, events_rx, output)
        }
        Command::History => {
            let history = controller.refresh_history()?;
            output.emit(&history, |history| {
                if history.is_empty() {
                    println!("No training runs yet");
                }
                for run in history {
                    println!(
                        "{:<24} {:<20} {:>4} epochs  mAP50 {:.3}  mAP50-95 {:.3}",
                        run.run_name,
                        run.timestamp,
                        run.epochs,
                        run.final_metrics.map50,
                        run.final_metrics.map50_95
                    );
                }
            })
        }
        Command::Results => {
            let results = controller.training_results()?;
            output.emit(&results, |results| {
                println!("{}", results.message);
                for run in &results.training_runs {
                    match &run.metrics {
                        Some(metrics) => println!(
                            "{:<16} {:<20} {:>4} epochs  mAP50 {:.3}  mAP50-95 {:.3}  P {:.3}  R {:.3}",
                            run.name,
                            run.modified_date,
                            metrics.total_epochs,
                            metrics.final_map50,
                            metrics.final_map50_95,
                            metrics.final_precision,
                            metrics.final_recall
                        ),
                        None => println!(
                            "{:<16} {:<20} no results yet",
                            run.name, run.modified_date
                        ),
                    }
                }
            })
        }
        Command::Metrics(args) => {
            if let (Some(plot), Some(dest)) = (&args.plot, &args.output) {
                let written = controller.save_training_plot(&args.run_name, plot, dest)?;
                eprintln!("Wrote {written} bytes to {}", dest.display());
                return Ok(());
            }
            let metrics = controller.training_metrics(&args.run_name)?;
            output.emit(&metrics, |metrics| match &metrics.metrics {
                None => println!("Metrics for {} are not available yet", args.run_name),
                Some(series) => {
                    for (name, values) in series {
                        let last = values.last().copied().unwrap_or_default();
                        println!("{name:<28} {} points, last {last:.4}", values.len());
                    }
                }
            })
        }
        Command::Analysis => {
            let analysis = controller.refresh_analysis()?;
            output.emit(&analysis, |analysis| {
                println!(
                    "{} images, {} annotations",
                    analysis.total_images, analysis.total_annotations
                );
                for (class, count) in &analysis.class_distribution {
                    println!("  {class:<20} {count}");
                }
                let stats = &analysis.annotation_stats;
                println!(
                    "Box area avg {:.1} min {:.1} max {:.1}",
                    stats.avg_bbox_area, stats.min_bbox_area, stats.max_bbox_area
                );
            })
        }
        Command::Stats => {
            let stats = controller.training_data_stats()?;
            output.emit(&stats, |stats| {
                println!(
                    "{} images, {} labels in {}",
                    stats.total_images, stats.total_labels, stats.data_directory
                );
                for (class, count) in &stats.class_counts {
                    println!("  {class:<20} {count}");
                }
            })
        }
        Command::Models => {
            let models = controller.refresh_models()?;
            output.emit(&models, |models| {
                if models.is_empty() {
                    println!("No trained models");
                }
                for model in models {
                    println!(
                        "{:<24} {:<20} {}",
                        model.run_name,
                        model.timestamp,
                        model.preferred_path().unwrap_or("-")
                    );
                }
            })
        }
        Command::Compare => {
            let comparison = controller.compare_models()?;
            output.emit(&comparison, |comparison| {
                println!("{} models compared", comparison.models.len());
                for model in &comparison.models {
                    println!("  {}", serde_json::Value::Object(model.clone()));
                }
            })
        }
        Command::ModelStatus => {
            let status = controller.api().model_status()?;
            output.emit(&status, print_map)
        }
        Command::Info => {
            let info = controller.api().api_info()?;
            output.emit(&info, print_map)
        }
        Command::Load { model_path } => {
            let response = controller.load_model(&model_path)?;
            output.emit(&response, |response| println!("{}", response.message))
        }
        Command::Reload { model_path } => {
            let response = controller.reload_model(model_path.as_deref())?;
            output.emit(&response, |response| println!("{}", response.message))
        }
        Command::Backup => {
            let receipt = controller.backup_model()?;
            output.emit(&receipt, |receipt| {
                println!("{}", receipt.message);
                if let Some(path) = &receipt.backup_path {
                    println!("Backup: {path}");
                }
            })
        }
        Command::Validate { test_data } => {
            let metrics = controller.validate_model(test_data.as_deref())?;
            output.emit(&metrics, |metrics| {
                println!(
                    "mAP50 {:.3}  mAP50-95 {:.3}  precision {:.3}  recall {:.3}",
                    metrics.map50, metrics.map50_95, metrics.precision, metrics.recall
                );
            })
        }
        Command::Export(args) => {
            let written = controller.export_training_data(args.format, &args.output)?;
            eprintln!(
                "Exported {written} bytes ({}) to {}",
                args.format.file_extension(),
                args.output.display()
            );
            Ok(())
        }
        Command::Cleanup { keep_latest } => {
            let response = controller.cleanup_runs(keep_latest)?;
            output.emit(&response, |response| println!("{}", response.message))
        }
        Command::Classes(command) => match command {
            ClassesCommand::List => {
                let list = controller.classes()?;
                output.emit(&list, |list| println!("{}", list.classes.join(", ")))
            }
            ClassesCommand::Add { classes } => {
                let list = controller.add_classes(&classes)?;
                output.emit(&list, |list| {
                    println!("{}", list.message);
                    println!("{}", list.classes.join(", "));
                })
            }
            ClassesCommand::Clear => {
                let response = controller.clear_classes()?;
                output.emit(&response, |response| println!("{}", response.message))
            }
        },
        Command::Monitor(command) => match command {
            MonitorCommand::Status => {
                let status = controller.api().monitor_status()?;
                output.emit(&status, print_map)
            }
            MonitorCommand::Start => {
                let response = controller.api().start_monitor()?;
                output.emit(&response, |response| println!("{}", response.message))
            }
            MonitorCommand::Stop => {
                let response = controller.api().stop_monitor()?;
                output.emit(&response, |response| println!("{}", response.message))
            }
        },
        Command::Config(ConfigCommand::Show) => {
            let app_dir = config::app_dir()?;
            println!(
                "config file:      {} ({})",
                app_dir.file(config::CONFIG_FILE_NAME).display(),
                app_dir.origin
            );
            println!("logs:             {}", app_dir.root.join(app_dirs::LOGS_DIR_NAME).display());
            println!(
                "base_url:         {} ({:?})",
                config.api.base_url, config.base_url_source
            );
            println!("epochs_encoding:  {:?}", config.api.epochs_encoding);
            println!("request_timeout:  {:?}", config.api.request_timeout);
            println!("idle_interval:    {:?}", config.polling.idle_interval);
            println!("active_interval:  {:?}", config.polling.active_interval);
            println!("watch_ceiling:    {:?}", config.polling.training_watch_ceiling);
            Ok(())
        }
        Command::Config(ConfigCommand::SetUrl { url }) => {
            let parsed = config::parse_base_url(&url, "command line")?;
            let path = config::config_path()?;
            let mut file = config::load_file_from(&path)?;
            file.api.base_url = Some(parsed.to_string());
            config::save_file_to(&file, &path)?;
            println!("Saved {parsed} to {}", path.display());
            Ok(())
        }
    }
}

/// Print poll events until the loop stops; Ctrl-C cancels it.
fn follow(handle: PollHandle, events: mpsc::Receiver<PollEvent>, output: Output) -> CliResult {
    let canceller = handle.canceller();
    if let Err(err) = ctrlc::set_handler(move || canceller.cancel()) {
        tracing::warn!("Ctrl-C handler unavailable: {err}");
    }
    let mut last: Option<TrainingStatus> = None;
    for event in events {
        match event {
            PollEvent::Status(status) => {
                if last.as_ref() != Some(&status) {
                    output.emit(&status, print_status)?;
                    last = Some(status);
                }
            }
            PollEvent::Failed(message) => eprintln!("Poll failed: {message}"),
            PollEvent::Stopped(reason) => {
                match reason {
                    StopReason::TrainingFinished => eprintln!("Training finished"),
                    StopReason::CeilingReached => {
                        eprintln!("Stopped following; training may still be running")
                    }
                    StopReason::Cancelled => {}
                }
                break;
            }
        }
    }
    handle.join();
    Ok(())
}

fn print_map(map: &OpaqueMap) {
    for (key, value) in map {
        match value {
            serde_json::Value::String(text) => println!("{key}: {text}"),
            other => println!("{key}: {other}"),
        }
    }
}

fn print_status(status: &TrainingStatus) {
    if status.is_training {
        println!(
            "Training: epoch {}/{} ({:.0}%) {}",
            status.current_epoch,
            status.total_epochs,
            status.progress * 100.0,
            status.status_message
        );
    } else {
        println!("Idle: {}", status.status_message);
    }
}

fn confirm(prompt: &str) -> Result<bool, std::io::Error> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
