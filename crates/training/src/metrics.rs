/// Running average tracker for per-batch scalars (loss, timings).
///
/// Callers must feed at least one positive-weight update before reading
/// `avg`; with `count == 0` the average is meaningless and stays at the
/// reset value.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: f64,
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records `value` with the given weight (typically the batch size).
    /// `weight` must be positive.
    pub fn update(&mut self, value: f64, weight: f64) {
        self.val = value;
        self.sum += value * weight;
        self.count += weight;
        self.avg = self.sum / self.count;
    }
}
