// https://burn.dev/book/basic-workflow/model.html
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::sigmoid;

/// Hidden and cell state carried between time steps, each `[batch, hidden, lat, lon]`.
#[derive(Clone, Debug)]
pub struct ConvLstmState<B: Backend> {
    pub hidden: Tensor<B, 4>,
    pub cell: Tensor<B, 4>,
}

impl<B: Backend> ConvLstmState<B> {
    /// Cut the state out of the autodiff graph.
    pub fn detach(self) -> Self {
        Self {
            hidden: self.hidden.detach(),
            cell: self.cell.detach(),
        }
    }
}

/// LSTM cell whose gates are computed by a 2D convolution over the
/// concatenated input and hidden state.
#[derive(Module, Debug)]
pub struct ConvLstmCell<B: Backend> {
    conv: Conv2d<B>,
    hidden_dim: usize,
}

#[derive(Config, Debug)]
pub struct ConvLstmCellConfig {
    input_dim: usize,
    hidden_dim: usize,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = true)]
    bias: bool,
}

impl ConvLstmCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLstmCell<B> {
        let padding = self.kernel_size / 2;
        ConvLstmCell {
            conv: Conv2dConfig::new(
                [self.input_dim + self.hidden_dim, 4 * self.hidden_dim],
                [self.kernel_size, self.kernel_size],
            )
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(self.bias)
            .init(device),
            hidden_dim: self.hidden_dim,
        }
    }
}

impl<B: Backend> ConvLstmCell<B> {
    /// Zeroed state for a `[batch, _, lat, lon]` input.
    pub fn init_state(&self, batch_size: usize, grid: [usize; 2], device: &B::Device) -> ConvLstmState<B> {
        let shape = [batch_size, self.hidden_dim, grid[0], grid[1]];
        ConvLstmState {
            hidden: Tensor::zeros(shape, device),
            cell: Tensor::zeros(shape, device),
        }
    }

    /// # Shapes
    ///   - Input [batch_size, input_dim, lat, lon]
    ///   - State [batch_size, hidden_dim, lat, lon]
    pub fn forward(&self, input: Tensor<B, 4>, state: ConvLstmState<B>) -> ConvLstmState<B> {
        let combined = Tensor::cat(vec![input, state.hidden], 1);
        let gates = self.conv.forward(combined);

        let [batch_size, _, lat, lon] = gates.dims();
        let gate = |k: usize| {
            gates.clone().slice([
                0..batch_size,
                k * self.hidden_dim..(k + 1) * self.hidden_dim,
                0..lat,
                0..lon,
            ])
        };

        let input_gate = sigmoid(gate(0));
        let forget_gate = sigmoid(gate(1));
        let output_gate = sigmoid(gate(2));
        let candidate = gate(3).tanh();

        let cell = forget_gate * state.cell + input_gate * candidate;
        let hidden = output_gate * cell.clone().tanh();

        ConvLstmState { hidden, cell }
    }
}

/// Next-frame precipitation forecaster: a ConvLSTM cell unrolled over the
/// window with a 1x1 convolution reading the hidden state back to frames.
#[derive(Module, Debug)]
pub struct PrecipForecaster<B: Backend> {
    cell: ConvLstmCell<B>,
    head: Conv2d<B>,
    tbptt_steps: usize,
}

#[derive(Config, Debug)]
pub struct PrecipForecasterConfig {
    #[config(default = 1)]
    channels: usize,
    #[config(default = 64)]
    hidden_dim: usize,
    #[config(default = 3)]
    kernel_size: usize,
    /// Steps between detaching the recurrent state (truncated BPTT).
    #[config(default = 20)]
    tbptt_steps: usize,
}

impl PrecipForecasterConfig {
    // Returns the initialized model
    pub fn init<B: Backend>(&self, device: &B::Device) -> PrecipForecaster<B> {
        PrecipForecaster {
            cell: ConvLstmCellConfig::new(self.channels, self.hidden_dim)
                .with_kernel_size(self.kernel_size)
                .init(device),
            head: Conv2dConfig::new([self.hidden_dim, self.channels], [1, 1]).init(device),
            tbptt_steps: self.tbptt_steps.max(1),
        }
    }
}

impl<B: Backend> PrecipForecaster<B> {
    /// # Shapes
    ///   - Frames [batch_size, steps, channels, lat, lon]
    ///   - Output [batch_size, steps, channels, lat, lon], step `t` predicting frame `t + 1`
    pub fn forward(&self, frames: Tensor<B, 5>) -> Tensor<B, 5> {
        let [batch_size, steps, channels, lat, lon] = frames.dims();
        let device = frames.device();
        let mut state = self.cell.init_state(batch_size, [lat, lon], &device);

        let mut outputs = Vec::with_capacity(steps);
        for t in 0..steps {
            if t > 0 && t % self.tbptt_steps == 0 {
                state = state.detach();
            }
            let frame = frames
                .clone()
                .slice([0..batch_size, t..t + 1, 0..channels, 0..lat, 0..lon])
                .reshape([batch_size, channels, lat, lon]);
            state = self.cell.forward(frame, state);
            outputs.push(self.head.forward(state.hidden.clone()));
        }

        Tensor::stack(outputs, 1)
    }
}
