//! Square classifier network.
//!
//! The trained model is shipped as JSON: the input resolution, the channel order the
//! network was trained on, the class codes in output order, and a list of sequential
//! layers. Weights use the Keras memory layout so an exporter can dump them as-is:
//!
//! - `conv2d`: `[kernel][kernel][in_channels][filters]`, valid padding, stride 1
//! - `dense`: `[inputs][outputs]`
//!
//! Activations are NHWC with a batch of one.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VisionError, VisionResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    #[default]
    Bgr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    Conv2d {
        filters: usize,
        kernel: usize,
        in_channels: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        #[serde(default)]
        activation: Activation,
    },
    MaxPool2d {
        size: usize,
    },
    Flatten,
    Dense {
        inputs: usize,
        outputs: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        #[serde(default)]
        activation: Activation,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub input_size: u32,
    #[serde(default)]
    pub channel_order: ChannelOrder,
    pub classes: Vec<String>,
    pub layers: Vec<Layer>,
}

/// Height x width x channels activation buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), height * width * channels);
        Self { height, width, channels, data }
    }

    #[inline]
    fn at(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

/// Inference seam: anything that maps a preprocessed square to class probabilities.
pub trait SquareModel: Send + Sync {
    /// Side length of the square input, in pixels.
    fn input_size(&self) -> u32;
    fn channel_order(&self) -> ChannelOrder;
    fn class_codes(&self) -> &[String];
    fn predict(&self, input: &Tensor) -> Vec<f32>;
}

/// Sequential network loaded from a [`ModelFile`].
#[derive(Clone, Debug)]
pub struct SequentialModel {
    spec: ModelFile,
}

fn load_failure(path: &Path, reason: impl Into<String>) -> VisionError {
    VisionError::ModelLoadFailure { path: path.to_path_buf(), reason: reason.into() }
}

impl SequentialModel {
    pub fn load(path: &Path) -> VisionResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| load_failure(path, e.to_string()))?;
        let spec: ModelFile =
            serde_json::from_str(&raw).map_err(|e| load_failure(path, e.to_string()))?;
        Self::from_spec(spec).map_err(|reason| load_failure(path, reason))
    }

    /// Checks every layer's weight count against the shape flowing into it.
    pub fn from_spec(spec: ModelFile) -> Result<Self, String> {
        let size = spec.input_size as usize;
        if size == 0 {
            return Err("input_size must be positive".into());
        }
        let mut shape = (size, size, 3usize);
        for (i, layer) in spec.layers.iter().enumerate() {
            shape = match layer {
                Layer::Conv2d { filters, kernel, in_channels, weights, bias, .. } => {
                    if *in_channels != shape.2 {
                        return Err(format!("layer {i}: expects {in_channels} channels, got {}", shape.2));
                    }
                    if *kernel == 0 || *kernel > shape.0 || *kernel > shape.1 {
                        return Err(format!("layer {i}: kernel {kernel} does not fit {shape:?}"));
                    }
                    if weights.len() != kernel * kernel * in_channels * filters || bias.len() != *filters {
                        return Err(format!("layer {i}: conv2d weight count mismatch"));
                    }
                    (shape.0 - kernel + 1, shape.1 - kernel + 1, *filters)
                }
                Layer::MaxPool2d { size } => {
                    if *size == 0 || shape.0 / size == 0 || shape.1 / size == 0 {
                        return Err(format!("layer {i}: pool size {size} does not fit {shape:?}"));
                    }
                    (shape.0 / size, shape.1 / size, shape.2)
                }
                Layer::Flatten => (1, 1, shape.0 * shape.1 * shape.2),
                Layer::Dense { inputs, outputs, weights, bias, .. } => {
                    let flat = shape.0 * shape.1 * shape.2;
                    if *inputs != flat {
                        return Err(format!("layer {i}: dense expects {inputs} inputs, got {flat}"));
                    }
                    if weights.len() != inputs * outputs || bias.len() != *outputs {
                        return Err(format!("layer {i}: dense weight count mismatch"));
                    }
                    (1, 1, *outputs)
                }
            };
        }
        let outputs = shape.0 * shape.1 * shape.2;
        if outputs != spec.classes.len() {
            return Err(format!("network has {outputs} outputs for {} classes", spec.classes.len()));
        }
        Ok(Self { spec })
    }

}

impl SquareModel for SequentialModel {
    fn input_size(&self) -> u32 {
        self.spec.input_size
    }

    fn channel_order(&self) -> ChannelOrder {
        self.spec.channel_order
    }

    fn class_codes(&self) -> &[String] {
        &self.spec.classes
    }

    fn predict(&self, input: &Tensor) -> Vec<f32> {
        let mut x = input.clone();
        for layer in &self.spec.layers {
            x = match layer {
                Layer::Conv2d { filters, kernel, weights, bias, activation, .. } => {
                    conv2d(&x, *filters, *kernel, weights, bias, *activation)
                }
                Layer::MaxPool2d { size } => max_pool2d(&x, *size),
                Layer::Flatten => {
                    let len = x.data.len();
                    Tensor::new(1, 1, len, x.data)
                }
                Layer::Dense { outputs, weights, bias, activation, .. } => {
                    dense(&x, *outputs, weights, bias, *activation)
                }
            };
        }
        x.data
    }
}

fn activate(values: &mut [f32], activation: Activation) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::Softmax => softmax(values),
    }
}

pub fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

fn conv2d(
    x: &Tensor,
    filters: usize,
    kernel: usize,
    weights: &[f32],
    bias: &[f32],
    activation: Activation,
) -> Tensor {
    let out_h = x.height - kernel + 1;
    let out_w = x.width - kernel + 1;
    let in_c = x.channels;
    let mut out = vec![0.0f32; out_h * out_w * filters];
    for y in 0..out_h {
        for xo in 0..out_w {
            let cell = &mut out[(y * out_w + xo) * filters..][..filters];
            cell.copy_from_slice(bias);
            for ky in 0..kernel {
                for kx in 0..kernel {
                    for c in 0..in_c {
                        let v = x.at(y + ky, xo + kx, c);
                        if v == 0.0 {
                            continue;
                        }
                        let w = &weights[((ky * kernel + kx) * in_c + c) * filters..][..filters];
                        for (acc, w) in cell.iter_mut().zip(w) {
                            *acc += v * w;
                        }
                    }
                }
            }
        }
    }
    activate(&mut out, activation);
    Tensor::new(out_h, out_w, filters, out)
}

fn max_pool2d(x: &Tensor, size: usize) -> Tensor {
    let out_h = x.height / size;
    let out_w = x.width / size;
    let mut out = vec![f32::NEG_INFINITY; out_h * out_w * x.channels];
    for y in 0..out_h * size {
        for xi in 0..out_w * size {
            for c in 0..x.channels {
                let o = &mut out[((y / size) * out_w + xi / size) * x.channels + c];
                *o = o.max(x.at(y, xi, c));
            }
        }
    }
    Tensor::new(out_h, out_w, x.channels, out)
}

fn dense(x: &Tensor, outputs: usize, weights: &[f32], bias: &[f32], activation: Activation) -> Tensor {
    let mut out = bias.to_vec();
    for (i, v) in x.data.iter().enumerate() {
        if *v == 0.0 {
            continue;
        }
        let row = &weights[i * outputs..][..outputs];
        for (acc, w) in out.iter_mut().zip(row) {
            *acc += v * w;
        }
    }
    activate(&mut out, activation);
    Tensor::new(1, 1, outputs, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut v = [1.0, 2.0, 3.0];
        softmax(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn conv_pool_dense_forward_pass() {
        // 4x4x3 input -> conv 2x2 (1 filter summing channel 0) -> 3x3 -> pool 2 -> 1x1 -> dense 2
        let mut conv_w = vec![0.0; 2 * 2 * 3];
        for k in 0..4 {
            conv_w[k * 3] = 1.0;
        }
        let spec = ModelFile {
            input_size: 4,
            channel_order: ChannelOrder::Rgb,
            classes: classes(2),
            layers: vec![
                Layer::Conv2d {
                    filters: 1,
                    kernel: 2,
                    in_channels: 3,
                    weights: conv_w,
                    bias: vec![0.0],
                    activation: Activation::Relu,
                },
                Layer::MaxPool2d { size: 2 },
                Layer::Flatten,
                Layer::Dense {
                    inputs: 1,
                    outputs: 2,
                    weights: vec![1.0, -1.0],
                    bias: vec![0.0, 0.5],
                    activation: Activation::Linear,
                },
            ],
        };
        let model = SequentialModel::from_spec(spec).unwrap();

        let mut data = vec![0.0; 4 * 4 * 3];
        // channel 0 = x + y
        for y in 0..4 {
            for x in 0..4 {
                data[(y * 4 + x) * 3] = (x + y) as f32;
            }
        }
        let out = model.predict(&Tensor::new(4, 4, 3, data));
        // conv at (1,1): 2+3+3+4 = 12 is the pooled max over the top-left 2x2 window
        assert_eq!(out, vec![12.0, -11.5]);
    }

    #[test]
    fn rejects_mismatched_weights() {
        let spec = ModelFile {
            input_size: 2,
            channel_order: ChannelOrder::Bgr,
            classes: classes(2),
            layers: vec![
                Layer::Flatten,
                Layer::Dense {
                    inputs: 12,
                    outputs: 2,
                    weights: vec![0.0; 10],
                    bias: vec![0.0; 2],
                    activation: Activation::Softmax,
                },
            ],
        };
        assert!(SequentialModel::from_spec(spec).unwrap_err().contains("weight count"));
    }

    #[test]
    fn rejects_output_class_mismatch() {
        let spec = ModelFile {
            input_size: 1,
            channel_order: ChannelOrder::Bgr,
            classes: classes(13),
            layers: vec![Layer::Flatten],
        };
        assert!(SequentialModel::from_spec(spec).unwrap_err().contains("3 outputs"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SequentialModel::load(Path::new("does/not/exist.json")).unwrap_err();
        assert!(matches!(err, VisionError::ModelLoadFailure { .. }));
    }

    #[test]
    fn model_file_parses_from_json() {
        let raw = r#"{
            "input_size": 1,
            "classes": ["a", "b", "c"],
            "layers": [ { "kind": "flatten" } ]
        }"#;
        let spec: ModelFile = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.channel_order, ChannelOrder::Bgr);
        assert!(SequentialModel::from_spec(spec).is_ok());
    }
}
