use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver},
        Arc,
    },
    thread::{self, JoinHandle},
};

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::TrainingError;

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

/// One (input, target) pair group consumed by a single
/// forward/backward step. Tensors are built on the CPU; device
/// placement happens explicitly via [`place_batch`].
#[derive(Debug)]
pub struct Batch {
    pub inputs: Tensor,
    pub targets: Tensor,
    pub size: usize,
}

/// Moves a batch onto the compute device. With a CPU device this is a
/// no-op, which is what lets the numeric tests run without an
/// accelerator.
pub fn place_batch(batch: &Batch, device: &Device) -> Result<(Tensor, Tensor)> {
    let inputs = batch.inputs.to_device(device).map_err(to_runtime_error)?;
    let targets = batch.targets.to_device(device).map_err(to_runtime_error)?;
    Ok((inputs, targets))
}

/// Loop-facing loader contract; synthetic sources implement this in
/// tests.
pub trait BatchSource: Send {
    fn next_batch(&mut self) -> Result<Option<Batch>>;
}

/// Pixel layout expected by the network input.
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone)]
struct Sample {
    path: PathBuf,
    targets: Vec<f32>,
}

/// Manifest-backed dataset: one `<relative_path> <target...>` line per
/// sample, resolved against a root directory.
#[derive(Debug, Clone)]
pub struct FileListDataset {
    samples: Vec<Sample>,
    target_dim: usize,
}

impl FileListDataset {
    pub fn from_manifest(
        root: &Path,
        list_path: &Path,
        target_dim: usize,
    ) -> Result<Self> {
        let contents = fs::read_to_string(list_path).map_err(|err| {
            TrainingError::initialization(format!(
                "failed to read manifest {}: {}",
                list_path.display(),
                err
            ))
        })?;

        let mut samples = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let relative = fields.next().ok_or_else(|| {
                TrainingError::initialization(format!(
                    "{}:{}: missing image path",
                    list_path.display(),
                    line_no + 1
                ))
            })?;

            let targets = fields
                .map(|field| {
                    field.parse::<f32>().map_err(|err| {
                        TrainingError::initialization(format!(
                            "{}:{}: invalid target value '{}': {}",
                            list_path.display(),
                            line_no + 1,
                            field,
                            err
                        ))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;

            if targets.len() != target_dim {
                return Err(TrainingError::initialization(format!(
                    "{}:{}: expected {} target value(s), found {}",
                    list_path.display(),
                    line_no + 1,
                    target_dim,
                    targets.len()
                )));
            }

            samples.push(Sample {
                path: root.join(relative),
                targets,
            });
        }

        if samples.is_empty() {
            return Err(TrainingError::initialization(format!(
                "manifest {} lists no samples",
                list_path.display()
            )));
        }

        Ok(Self {
            samples,
            target_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of batches one pass will yield, final short batch included.
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        (self.samples.len() + batch_size - 1) / batch_size
    }
}

/// Decodes manifest entries into tensors, one pass per construction.
/// Training passes shuffle with a per-epoch seed; validation passes
/// keep manifest order so their averages are comparable across epochs.
pub struct FileListLoader {
    dataset: Arc<FileListDataset>,
    spec: ImageSpec,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
}

impl FileListLoader {
    pub fn new(
        dataset: Arc<FileListDataset>,
        spec: ImageSpec,
        batch_size: usize,
        shuffle_seed: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainingError::initialization(
                "batch size must be greater than zero",
            ));
        }

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        Ok(Self {
            dataset,
            spec,
            batch_size,
            order,
            cursor: 0,
        })
    }
}

impl BatchSource for FileListLoader {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let size = indices.len();
        let pixels_per_image = self.spec.channels * self.spec.height * self.spec.width;
        let mut pixels = Vec::with_capacity(size * pixels_per_image);
        let mut targets = Vec::with_capacity(size * self.dataset.target_dim);

        for &index in indices {
            let sample = &self.dataset.samples[index];
            decode_image(&sample.path, self.spec, &mut pixels)?;
            targets.extend_from_slice(&sample.targets);
        }

        let inputs = Tensor::from_vec(
            pixels,
            (size, self.spec.channels, self.spec.height, self.spec.width),
            &Device::Cpu,
        )
        .map_err(to_runtime_error)?;
        let targets = Tensor::from_vec(targets, (size, self.dataset.target_dim), &Device::Cpu)
            .map_err(to_runtime_error)?;

        Ok(Some(Batch {
            inputs,
            targets,
            size,
        }))
    }
}

/// Decodes one image into normalized CHW f32 values appended to `out`.
fn decode_image(path: &Path, spec: ImageSpec, out: &mut Vec<f32>) -> Result<()> {
    let decoded = image::open(path).map_err(|err| {
        TrainingError::runtime(format!("failed to open image {}: {}", path.display(), err))
    })?;
    let resized = decoded.resize_exact(
        spec.width as u32,
        spec.height as u32,
        FilterType::Triangle,
    );

    match spec.channels {
        1 => {
            let gray = resized.to_luma8();
            for value in gray.as_raw() {
                out.push(*value as f32 / 255.0);
            }
        }
        3 => {
            let rgb = resized.to_rgb8();
            let raw = rgb.as_raw();
            // HWC to CHW.
            for channel in 0..3 {
                for pixel in raw.chunks_exact(3) {
                    out.push(pixel[channel] as f32 / 255.0);
                }
            }
        }
        other => {
            return Err(TrainingError::runtime(format!(
                "unsupported channel count {} for {}",
                other,
                path.display()
            )))
        }
    }

    Ok(())
}

/// Decodes ahead of the consumer on a background thread. Batches flow
/// through a bounded channel in production order, so the training loop
/// still sees a single strictly-ordered stream.
pub struct PrefetchLoader {
    receiver: Option<Receiver<Result<Batch>>>,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchLoader {
    pub fn spawn<S>(mut inner: S, depth: usize) -> Self
    where
        S: BatchSource + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(depth.max(1));
        let worker = thread::spawn(move || loop {
            match inner.next_batch() {
                Ok(Some(batch)) => {
                    if sender.send(Ok(batch)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = sender.send(Err(err));
                    break;
                }
            }
        });

        Self {
            receiver: Some(receiver),
            worker: Some(worker),
        }
    }
}

impl BatchSource for PrefetchLoader {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(None);
        };
        match receiver.recv() {
            Ok(Ok(batch)) => Ok(Some(batch)),
            Ok(Err(err)) => Err(err),
            // Sender gone: the pass is complete.
            Err(_) => Ok(None),
        }
    }
}

impl Drop for PrefetchLoader {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
