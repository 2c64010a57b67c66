use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::api::ExportFormat;

/// Command-line client for the dish detection and fine-tuning backend.
#[derive(Parser, Debug)]
#[command(name = "dishlab", author, version, about, long_about = None)]
pub struct Cli {
    /// Backend URL, overriding DISHLAB_API_URL and the config file
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output on stderr; repeat for trace
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings and errors on stderr
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the current training status
    Status,
    /// Follow training status until interrupted
    Watch(WatchArgs),
    /// Run object detection on an image
    Detect(DetectArgs),
    /// Submit bounding boxes for an image as training data
    Label(LabelArgs),
    /// Start fine-tuning and follow its progress
    Train(TrainArgs),
    /// List past training runs
    History,
    /// List run directories with final metrics and training arguments
    Results,
    /// Show per-epoch metrics for a run, or save one of its plots
    Metrics(MetricsArgs),
    /// Analyze the collected training dataset
    Analysis,
    /// Show counts of collected training images and labels
    Stats,
    /// List trained models
    Models,
    /// Compare trained models
    Compare,
    /// Show the loaded model and its status
    ModelStatus,
    /// Show backend name, version and endpoints
    Info,
    /// Load a trained model for detection
    Load {
        /// Model path as reported by `models`
        model_path: String,
    },
    /// Reload the detector, optionally from a different model
    Reload {
        #[arg(long, value_name = "PATH")]
        model_path: Option<String>,
    },
    /// Back up the current model on the backend
    Backup,
    /// Validate the current model
    Validate {
        /// Dataset config to validate against instead of the training data
        #[arg(long, value_name = "PATH")]
        test_data: Option<String>,
    },
    /// Download the collected training data
    Export(ExportArgs),
    /// Delete all but the newest training runs
    Cleanup {
        #[arg(long, default_value_t = 5, value_name = "COUNT")]
        keep_latest: u32,
    },
    /// Manage the detector's class vocabulary
    #[command(subcommand)]
    Classes(ClassesCommand),
    /// Control the backend's model file monitor
    #[command(subcommand)]
    Monitor(MonitorCommand),
    /// Inspect or edit the client configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Command {
    /// Subcommand name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Watch(_) => "watch",
            Self::Detect(_) => "detect",
            Self::Label(_) => "label",
            Self::Train(_) => "train",
            Self::History => "history",
            Self::Results => "results",
            Self::Metrics(_) => "metrics",
            Self::Analysis => "analysis",
            Self::Stats => "stats",
            Self::Models => "models",
            Self::Compare => "compare",
            Self::ModelStatus => "model-status",
            Self::Info => "info",
            Self::Load { .. } => "load",
            Self::Reload { .. } => "reload",
            Self::Backup => "backup",
            Self::Validate { .. } => "validate",
            Self::Export(_) => "export",
            Self::Cleanup { .. } => "cleanup",
            Self::Classes(_) => "classes",
            Self::Monitor(_) => "monitor",
            Self::Config(_) => "config",
        }
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Stop once a running job finishes
    #[arg(long)]
    pub until_idle: bool,
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    pub image: PathBuf,
    /// Confidence threshold (0.0 - 1.0)
    #[arg(long, value_name = "THRESHOLD")]
    pub confidence: Option<f64>,
    /// Write the backend's annotated image here
    #[arg(long, value_name = "FILE")]
    pub save_annotated: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LabelArgs {
    pub image: PathBuf,
    /// Box as `x,y,width,height:label` in image pixels
    #[arg(long = "box", value_name = "BOX")]
    pub boxes: Vec<BoxArg>,
    /// Box as drag corners `x1,y1,x2,y2:label`, in any order
    #[arg(long = "drag", value_name = "DRAG")]
    pub drags: Vec<BoxArg>,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Number of epochs (1 - 500)
    #[arg(default_value = "50")]
    pub epochs: String,
    /// Use the blocking start endpoint
    #[arg(long)]
    pub sync: bool,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
    /// Return right after starting instead of following progress
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(Args, Debug)]
pub struct MetricsArgs {
    pub run_name: String,
    /// Plot file to download, e.g. results.png
    #[arg(long, value_name = "NAME", requires = "output")]
    pub plot: Option<String>,
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, default_value = "zip")]
    pub format: ExportFormat,
    #[arg(long, short, value_name = "FILE")]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ClassesCommand {
    List,
    Add {
        #[arg(required = true)]
        classes: Vec<String>,
    },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum MonitorCommand {
    Status,
    Start,
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Persist the backend URL to the config file
    SetUrl { url: String },
}

/// Four numbers and a label, `a,b,c,d:label`.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxArg {
    pub values: [f64; 4],
    pub label: String,
}

impl FromStr for BoxArg {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (numbers, label) = raw
            .split_once(':')
            .ok_or_else(|| format!("expected `a,b,c,d:label`, got '{raw}'"))?;
        let label = label.trim();
        if label.is_empty() {
            return Err(format!("missing label in '{raw}'"));
        }
        let parsed: Vec<f64> = numbers
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|err| format!("invalid coordinate in '{raw}': {err}"))?;
        let values: [f64; 4] = parsed
            .try_into()
            .map_err(|_| format!("expected four coordinates in '{raw}'"))?;
        if values.iter().any(|value| !value.is_finite()) {
            return Err(format!("coordinates must be finite in '{raw}'"));
        }
        Ok(Self {
            values,
            label: label.to_string(),
        })
    }
}
