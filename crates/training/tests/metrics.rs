use training::AverageMeter;

#[test]
fn tracks_weighted_running_average() {
    let mut meter = AverageMeter::new();

    meter.update(2.0, 4.0);
    meter.update(6.0, 2.0);

    assert!((meter.val - 6.0).abs() < 1e-12);
    assert!((meter.sum - 20.0).abs() < 1e-12);
    assert!((meter.count - 6.0).abs() < 1e-12);
    // (2*4 + 6*2) / 6
    assert!((meter.avg - 20.0 / 6.0).abs() < 1e-12);
}

#[test]
fn unit_weight_matches_plain_mean() {
    let mut meter = AverageMeter::new();
    for value in [1.0, 2.0, 3.0, 4.0] {
        meter.update(value, 1.0);
    }
    assert!((meter.avg - 2.5).abs() < 1e-12);
}

#[test]
fn reset_returns_to_initial_state() {
    let mut meter = AverageMeter::new();
    meter.update(3.0, 2.0);
    meter.reset();

    assert_eq!(meter.val, 0.0);
    assert_eq!(meter.sum, 0.0);
    assert_eq!(meter.count, 0.0);
    assert_eq!(meter.avg, 0.0);

    meter.update(7.0, 1.0);
    assert!((meter.avg - 7.0).abs() < 1e-12);
}
