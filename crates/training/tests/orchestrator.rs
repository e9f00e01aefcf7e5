use std::{fs, path::Path};

use anyhow::Result;
use training::{
    checkpoint,
    config::{DataConfig, LossKind, ModelSection, RuntimeConfig, TrainingConfig},
    BestTracker, Trainer,
};

#[test]
fn best_tracker_saves_only_on_strict_improvement() {
    let mut tracker = BestTracker::new();
    let observed: Vec<bool> = [5.0, 3.0, 4.0, 2.0]
        .into_iter()
        .map(|loss| tracker.observe(loss))
        .collect();

    assert_eq!(observed, vec![true, true, false, true]);
    assert_eq!(tracker.best(), 2.0);
}

fn write_gray_png(path: &Path, seed: u32) -> Result<()> {
    let img = image::GrayImage::from_fn(8, 8, |x, y| {
        image::Luma([((x + y * 8 + seed * 13) * 3 % 255) as u8])
    });
    img.save(path)?;
    Ok(())
}

fn test_config(root: &Path) -> Result<TrainingConfig> {
    let images = root.join("images");
    fs::create_dir_all(&images)?;
    for i in 0..6u32 {
        write_gray_png(&images.join(format!("img{}.png", i)), i)?;
    }

    let train_list = root.join("train.txt");
    fs::write(
        &train_list,
        "images/img0.png 0.25\nimages/img1.png 0.75\nimages/img2.png 0.5\nimages/img3.png 0.1\n",
    )?;
    let val_list = root.join("val.txt");
    fs::write(&val_list, "images/img4.png 0.4\nimages/img5.png 0.6\n")?;

    let mut data = DataConfig::new(root.to_path_buf(), train_list, val_list);
    data.batch_size = 2;
    data.workers = 2;

    Ok(TrainingConfig {
        model: ModelSection {
            variant: "drop0".to_string(),
            in_channels: 1,
            image_height: 8,
            image_width: 8,
            target_dim: 1,
        },
        data,
        optimizer: Default::default(),
        runtime: RuntimeConfig {
            cuda: false,
            seed: 7,
            epochs: 2,
            start_epoch: 0,
            print_every: 1,
            loss: LossKind::L1,
            save_dir: root.join("model"),
            log_file: root.join("validation_loss.txt"),
            resume: None,
            lr_decay: None,
        },
    })
}

#[test]
fn full_run_writes_best_checkpoint_and_loss_log() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path())?;
    let log_file = config.runtime.log_file.clone();

    let mut trainer = Trainer::new(config)?;
    trainer.run()?;

    let checkpoint_path = trainer.checkpoint_path();
    assert!(checkpoint_path.exists(), "best checkpoint was not written");

    let record = checkpoint::load(&checkpoint_path)?;
    assert!(record.epoch >= 1 && record.epoch <= 2);

    let log = fs::read_to_string(&log_file)?;
    let lines: Vec<&str> = log.lines().collect();
    // one line per validation pass: the baseline plus one per epoch
    assert_eq!(lines.len(), 3);
    for line in lines {
        let loss: f64 = line.trim().parse()?;
        assert!(loss.is_finite());
    }

    assert!(trainer.best_loss().is_finite());

    Ok(())
}

#[test]
fn missing_resume_checkpoint_warns_and_starts_fresh() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = test_config(dir.path())?;
    config.runtime.resume = Some(dir.path().join("not_there.json"));
    config.runtime.epochs = 1;

    let trainer = Trainer::new(config)?;
    assert_eq!(trainer.start_epoch(), 0);

    Ok(())
}

#[test]
fn shutdown_before_first_epoch_writes_no_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path())?;
    let log_file = config.runtime.log_file.clone();

    let mut trainer = Trainer::new(config)?;
    trainer.run_with_shutdown(|| true)?;

    assert!(!trainer.checkpoint_path().exists());
    // the baseline pass still records its loss line
    assert_eq!(fs::read_to_string(&log_file)?.lines().count(), 1);

    Ok(())
}

#[test]
fn resume_restores_saved_epoch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path())?;

    let mut trainer = Trainer::new(config)?;
    trainer.run()?;
    let saved = checkpoint::load(&trainer.checkpoint_path())?;

    let second_dir = tempfile::tempdir()?;
    let mut resumed_config = test_config(second_dir.path())?;
    resumed_config.runtime.resume = Some(trainer.checkpoint_path());
    resumed_config.runtime.epochs = 4;

    let resumed = Trainer::new(resumed_config)?;
    assert_eq!(resumed.start_epoch(), saved.epoch);

    Ok(())
}
