use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::Parser;
use training::{
    config::{DataConfig, ModelSection, OptimizerConfig, RuntimeConfig},
    Trainer, TrainingConfig, TrainingError,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("training failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "CNN regression training CLI", long_about = None)]
struct Args {
    #[arg(long, value_name = "PATH", help = "Optional config file the flags override")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Dataset root the manifest paths resolve against")]
    root_path: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Training manifest (one '<path> <targets...>' line per sample)")]
    train_list: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Validation manifest")]
    val_list: Option<PathBuf>,

    #[arg(long, help = "Network variant (drop0, drop1, drop4, drop6, drop8)")]
    variant: Option<String>,

    #[arg(long, help = "Train on the first CUDA device instead of the CPU")]
    cuda: bool,

    #[arg(short = 'j', long, value_name = "N", help = "Batches decoded ahead of the training loop")]
    workers: Option<usize>,

    #[arg(long, value_name = "N", help = "Total number of epochs to run")]
    epochs: Option<usize>,

    #[arg(long, value_name = "N", help = "Epoch to start from")]
    start_epoch: Option<usize>,

    #[arg(short = 'b', long, value_name = "N", help = "Samples per batch")]
    batch_size: Option<usize>,

    #[arg(long, value_name = "LR", help = "Base learning rate")]
    lr: Option<f64>,

    #[arg(long, value_name = "M", help = "SGD momentum")]
    momentum: Option<f64>,

    #[arg(long, value_name = "WD", help = "Weight decay")]
    weight_decay: Option<f64>,

    #[arg(short = 'p', long = "print-freq", value_name = "N", help = "Batches between progress lines")]
    print_freq: Option<usize>,

    #[arg(long, value_name = "PATH", help = "Checkpoint to resume model weights from")]
    resume: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory the best checkpoint is written to")]
    save_path: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Append-only validation loss log")]
    log_file: Option<PathBuf>,
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();

    let mut config = base_config(&args)?;
    apply_args(&mut config, &args);
    config.validate()?;

    let mut trainer = Trainer::new(config)?;

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|err| TrainingError::runtime(format!("failed to install signal handler: {err}")))?;

    trainer.run_with_shutdown(|| shutdown_flag.load(Ordering::Relaxed))?;

    Ok(())
}

/// With `--config` the file is the base layer; without it the three
/// dataset paths must come from flags and everything else starts at
/// its default.
fn base_config(args: &Args) -> Result<TrainingConfig, TrainingError> {
    if let Some(path) = &args.config {
        return TrainingConfig::load(path);
    }

    let (root, train_list, val_list) = match (&args.root_path, &args.train_list, &args.val_list) {
        (Some(root), Some(train), Some(val)) => (root.clone(), train.clone(), val.clone()),
        _ => {
            return Err(TrainingError::initialization(
                "--root-path, --train-list, and --val-list are required without --config",
            ))
        }
    };

    Ok(TrainingConfig {
        model: ModelSection::default(),
        data: DataConfig::new(root, train_list, val_list),
        optimizer: OptimizerConfig::default(),
        runtime: RuntimeConfig::default(),
    })
}

fn apply_args(config: &mut TrainingConfig, args: &Args) {
    if let Some(root) = &args.root_path {
        config.data.root = root.clone();
    }
    if let Some(train_list) = &args.train_list {
        config.data.train_list = train_list.clone();
    }
    if let Some(val_list) = &args.val_list {
        config.data.val_list = val_list.clone();
    }
    if let Some(variant) = &args.variant {
        config.model.variant = variant.clone();
    }
    if args.cuda {
        config.runtime.cuda = true;
    }
    if let Some(workers) = args.workers {
        config.data.workers = workers;
    }
    if let Some(epochs) = args.epochs {
        config.runtime.epochs = epochs;
    }
    if let Some(start_epoch) = args.start_epoch {
        config.runtime.start_epoch = start_epoch;
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        config.optimizer.learning_rate = lr;
    }
    if let Some(momentum) = args.momentum {
        config.optimizer.momentum = momentum;
    }
    if let Some(weight_decay) = args.weight_decay {
        config.optimizer.weight_decay = weight_decay;
    }
    if let Some(print_freq) = args.print_freq {
        config.runtime.print_every = print_freq;
    }
    if let Some(resume) = &args.resume {
        config.runtime.resume = Some(resume.clone());
    }
    if let Some(save_path) = &args.save_path {
        config.runtime.save_dir = save_path.clone();
    }
    if let Some(log_file) = &args.log_file {
        config.runtime.log_file = log_file.clone();
    }
}
