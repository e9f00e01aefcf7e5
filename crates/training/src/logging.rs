use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::{metrics::AverageMeter, TrainingError};

/// Console progress reporting plus the append-only validation loss
/// file. The file is opened once at startup and flushed after every
/// line so a crash loses at most the line being written.
pub struct Logger {
    loss_log: BufWriter<std::fs::File>,
}

impl Logger {
    pub fn create(log_file: &Path) -> Result<Self, TrainingError> {
        if let Some(parent) = log_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    TrainingError::initialization(format!(
                        "failed to create log directory {}: {}",
                        parent.display(),
                        err
                    ))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|err| {
                TrainingError::initialization(format!(
                    "failed to open log file {}: {}",
                    log_file.display(),
                    err
                ))
            })?;

        Ok(Self {
            loss_log: BufWriter::new(file),
        })
    }

    /// Periodic training progress line, current value alongside the
    /// running average for each tracked meter.
    pub fn log_progress(
        &self,
        epoch: usize,
        batch_idx: usize,
        total_batches: usize,
        batch_time: &AverageMeter,
        data_time: &AverageMeter,
        losses: &AverageMeter,
    ) {
        println!(
            "Epoch: [{}][{}/{}]\tTime {:.3} ({:.3})\tData {:.3} ({:.3})\tLoss {:.4} ({:.4})",
            epoch,
            batch_idx,
            total_batches,
            batch_time.val,
            batch_time.avg,
            data_time.val,
            data_time.avg,
            losses.val,
            losses.avg,
        );
    }

    /// Records one epoch's validation average, to stdout and to the
    /// loss file.
    pub fn log_validation(&mut self, epoch: usize, avg_loss: f64) -> Result<(), TrainingError> {
        println!("Validation: epoch {} loss {:.6}", epoch, avg_loss);
        self.append_loss(avg_loss)
    }

    /// Appends one validation average to the loss file. Every
    /// validation pass lands here, the pre-loop baseline included.
    pub fn append_loss(&mut self, avg_loss: f64) -> Result<(), TrainingError> {
        writeln!(self.loss_log, "{:.6}", avg_loss).map_err(|err| {
            TrainingError::runtime(format!("failed to write validation loss: {}", err))
        })?;
        self.loss_log.flush().map_err(|err| {
            TrainingError::runtime(format!("failed to flush validation loss log: {}", err))
        })
    }

    pub fn log_event(&self, message: &str) {
        println!("{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        eprintln!("warning: {}", message);
    }
}
