use anyhow::Result;
use training::{TrainingConfig, TrainingError};

#[test]
fn loads_toml_and_absolutizes_relative_paths() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("train.toml");
    std::fs::write(
        &path,
        r#"
[model]
variant = "drop4"
in_channels = 1
image_height = 32
image_width = 32

[data]
root = "dataset"
train_list = "train.txt"
val_list = "val.txt"
batch_size = 16

[runtime]
epochs = 10
save_dir = "out"
"#,
    )?;

    let config = TrainingConfig::load(&path)?;
    assert_eq!(config.model.variant, "drop4");
    assert_eq!(config.data.batch_size, 16);
    assert_eq!(config.data.root, dir.path().join("dataset"));
    assert_eq!(config.data.train_list, dir.path().join("train.txt"));
    assert_eq!(config.runtime.save_dir, dir.path().join("out"));
    // untouched sections fall back to defaults
    assert_eq!(config.runtime.print_every, 10);
    assert!(config.runtime.lr_decay.is_none());

    Ok(())
}

#[test]
fn loads_json_by_extension() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("train.json");
    std::fs::write(
        &path,
        r#"{
  "model": { "variant": "drop1" },
  "data": {
    "root": "/data",
    "train_list": "/data/train.txt",
    "val_list": "/data/val.txt"
  }
}"#,
    )?;

    let config = TrainingConfig::load(&path)?;
    assert_eq!(config.data.root, std::path::PathBuf::from("/data"));
    assert_eq!(config.runtime.epochs, 400);

    Ok(())
}

#[test]
fn validation_collects_every_violation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("train.toml");
    std::fs::write(
        &path,
        r#"
[model]
variant = "drop9"
in_channels = 2
image_height = 30
image_width = 32

[data]
root = "dataset"
train_list = "train.txt"
val_list = "val.txt"
batch_size = 0

[runtime]
epochs = 5
start_epoch = 7
"#,
    )?;

    match TrainingConfig::load(&path) {
        Err(TrainingError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("model.variant")));
            assert!(errors.iter().any(|e| e.contains("in_channels")));
            assert!(errors.iter().any(|e| e.contains("image dimensions")));
            assert!(errors.iter().any(|e| e.contains("batch_size")));
            assert!(errors.iter().any(|e| e.contains("start_epoch")));
        }
        other => panic!("expected Validation error, got {:?}", other),
    }

    Ok(())
}

#[test]
fn unsupported_extension_is_a_format_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("train.yaml");
    std::fs::write(&path, "model: {}")?;

    let result = TrainingConfig::load(&path);
    assert!(matches!(result, Err(TrainingError::ConfigFormat(_))));

    Ok(())
}
