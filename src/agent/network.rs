//! Q-value network
//!
//! A stack of `Linear` layers with ReLU between them on burn's ndarray
//! backend. Weights are drawn from the agent's seeded RNG so two agents built
//! from the same config start identical.

use burn::backend::Autodiff;
use burn::module::Param;
use burn::nn::{Linear, Relu};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::TensorData;
use burn_ndarray::{NdArray, NdArrayDevice};
use rand::Rng;
use std::path::Path;

use crate::error::TradingError;
use crate::Result;

/// CPU backend with gradient tracking
pub type TrainBackend = Autodiff<NdArray>;

/// Dense layers, ReLU on every layer but the last
#[derive(Module, Debug)]
pub struct QModel<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Relu,
}

impl<B: Backend> QModel<B> {
    /// He-uniform weights from `rng`, zero biases
    pub fn init<R: Rng>(sizes: &[usize], rng: &mut R, device: &B::Device) -> Self {
        let layers = sizes
            .windows(2)
            .map(|pair| dense(pair[0], pair[1], rng, device))
            .collect();
        Self {
            layers,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// Every weight and bias, layer by layer
    fn parameters(&self) -> Vec<f32> {
        let mut values = Vec::new();
        for layer in &self.layers {
            values.extend(to_f32(layer.weight.val().into_data()));
            if let Some(bias) = &layer.bias {
                values.extend(to_f32(bias.val().into_data()));
            }
        }
        values
    }
}

fn dense<B: Backend, R: Rng>(
    inputs: usize,
    outputs: usize,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let limit = (6.0 / inputs.max(1) as f64).sqrt() as f32;
    let weights: Vec<f32> = (0..inputs * outputs)
        .map(|_| rng.gen_range(-limit..limit))
        .collect();

    // burn stores weights as [inputs, outputs]
    Linear {
        weight: Param::from_tensor(Tensor::from_data(
            TensorData::new(weights, [inputs, outputs]),
            device,
        )),
        bias: Some(Param::from_tensor(Tensor::zeros([outputs], device))),
    }
}

fn to_f32(data: TensorData) -> Vec<f32> {
    data.to_vec::<f32>().unwrap_or_default()
}

/// `[rows, width]` input; short rows are zero-padded, long ones truncated
fn batch_tensor<B: Backend>(rows: &[&[f64]], width: usize, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = rows
        .iter()
        .flat_map(|row| {
            row.iter()
                .map(|&v| v as f32)
                .chain(std::iter::repeat(0.0))
                .take(width)
        })
        .collect();
    Tensor::from_data(TensorData::new(values, [rows.len(), width]), device)
}

#[derive(Debug, Clone)]
pub struct QNetwork {
    model: QModel<TrainBackend>,
    input_size: usize,
    output_size: usize,
    device: NdArrayDevice,
}

impl QNetwork {
    pub fn new<R: Rng>(
        input_size: usize,
        hidden_layers: &[usize],
        output_size: usize,
        rng: &mut R,
    ) -> Self {
        let mut sizes = Vec::with_capacity(hidden_layers.len() + 2);
        sizes.push(input_size);
        sizes.extend(hidden_layers.iter().copied().filter(|&h| h > 0));
        sizes.push(output_size);

        let device = NdArrayDevice::Cpu;
        Self {
            model: QModel::init(&sizes, rng, &device),
            input_size,
            output_size,
            device,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Q-value per action
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.forward_batch(&[input]).pop().unwrap_or_default()
    }

    pub fn forward_batch(&self, inputs: &[&[f64]]) -> Vec<Vec<f64>> {
        if inputs.is_empty() || self.output_size == 0 {
            return vec![Vec::new(); inputs.len()];
        }
        let x = batch_tensor::<TrainBackend>(inputs, self.input_size, &self.device);
        to_f32(self.model.forward(x).into_data())
            .chunks(self.output_size)
            .map(|row| row.iter().map(|&q| f64::from(q)).collect())
            .collect()
    }

    /// Copy weights from `other`
    pub fn copy_weights_from(&mut self, other: &QNetwork) {
        self.model = other.model.clone();
    }

    pub fn same_weights(&self, other: &QNetwork) -> bool {
        self.model.parameters() == other.model.parameters()
    }

    /// Write the weights as a named MessagePack record
    pub fn save(&self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| {
                TradingError::Checkpoint(format!("cannot write {}: {:?}", path.display(), e))
            })
    }

    /// Replace the weights with a record written by `save`
    ///
    /// The record must come from a network of the same shape.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.model = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &recorder, &self.device)
            .map_err(|e| {
                TradingError::Checkpoint(format!("cannot read {}: {:?}", path.display(), e))
            })?;
        Ok(())
    }
}

type AdamStep =
    Box<dyn FnMut(f64, QModel<TrainBackend>, GradientsParams) -> QModel<TrainBackend> + Send>;

/// Adam on the squared error of the chosen actions' Q-values
pub struct QOptimizer {
    learning_rate: f64,
    steps: u64,
    step: AdamStep,
}

impl QOptimizer {
    pub fn new(learning_rate: f64) -> Self {
        let mut adam = AdamConfig::new().init::<TrainBackend, QModel<TrainBackend>>();
        Self {
            learning_rate,
            steps: 0,
            step: Box::new(move |lr, model, grads| adam.step(lr, model, grads)),
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// One optimizer step on `network`
    ///
    /// Returns the batch loss before the update.
    pub fn train_batch(
        &mut self,
        network: &mut QNetwork,
        states: &[&[f64]],
        actions: &[usize],
        targets: &[f64],
    ) -> f64 {
        let batch = states.len().min(actions.len()).min(targets.len());
        if batch == 0 || network.output_size == 0 {
            return 0.0;
        }
        let device = network.device.clone();

        let inputs = batch_tensor::<TrainBackend>(&states[..batch], network.input_size, &device);
        let chosen: Vec<i64> = actions[..batch]
            .iter()
            .map(|&a| a.min(network.output_size - 1) as i64)
            .collect();
        let chosen = Tensor::<TrainBackend, 2, Int>::from_data(
            TensorData::new(chosen, [batch, 1]),
            &device,
        );
        let targets: Vec<f32> = targets[..batch].iter().map(|&t| t as f32).collect();
        let targets =
            Tensor::<TrainBackend, 1>::from_data(TensorData::new(targets, [batch]), &device);

        let q = network.model.forward(inputs).gather(1, chosen).squeeze::<1>(1);
        let loss = (q - targets).powf_scalar(2.0).mean();
        let value = f64::from(loss.clone().into_scalar());

        let grads = GradientsParams::from_grads(loss.backward(), &network.model);
        network.model = (self.step)(self.learning_rate, network.model.clone(), grads);
        self.steps += 1;

        value
    }
}
