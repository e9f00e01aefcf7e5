use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use model::{build_model, LightCnn, ModelConfig, RegressionModel, Variant};

fn build_config(variant: Variant) -> ModelConfig {
    ModelConfig {
        variant,
        in_channels: 1,
        image_height: 16,
        image_width: 16,
        target_dim: 3,
        device: Device::Cpu,
    }
}

#[test]
fn forward_produces_predictions() -> Result<()> {
    let model = LightCnn::new(build_config(Variant::Drop0))?;
    let images = Tensor::zeros((2, 1, 16, 16), DType::F32, &Device::Cpu)?;

    let output = model.forward(&images)?;

    assert_eq!(output.dims(), &[2, 3]);
    assert_eq!(output.dtype(), DType::F32);
    Ok(())
}

#[test]
fn forward_rejects_mismatched_shape() -> Result<()> {
    let model = LightCnn::new(build_config(Variant::Drop0))?;
    let images = Tensor::zeros((2, 3, 16, 16), DType::F32, &Device::Cpu)?;

    assert!(model.forward(&images).is_err());
    Ok(())
}

#[test]
fn named_parameters_are_sorted_and_nonempty() -> Result<()> {
    let model = build_model(build_config(Variant::Drop1))?;
    let params = model.named_parameters();

    assert!(!params.is_empty());
    let names: Vec<&str> = params.iter().map(|(name, _)| name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    Ok(())
}

#[test]
fn inference_mode_is_deterministic_with_dropout() -> Result<()> {
    let model = LightCnn::new(build_config(Variant::Drop8))?;
    model.set_training(false);
    let images = Tensor::rand(0f32, 1f32, (1, 1, 16, 16), &Device::Cpu)?;

    let first = model.forward(&images)?.to_vec2::<f32>()?;
    let second = model.forward(&images)?.to_vec2::<f32>()?;

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn variant_parsing_round_trips() {
    for variant in [
        Variant::Drop0,
        Variant::Drop1,
        Variant::Drop4,
        Variant::Drop6,
        Variant::Drop8,
    ] {
        assert_eq!(Variant::parse(variant.tag()), Some(variant));
    }
    assert_eq!(Variant::parse("resnet"), None);
}
