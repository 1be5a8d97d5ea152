// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tch::Tensor;

/// Exact Gaussian Error Linear Unit: `x * 0.5 * (1 + erf(x / sqrt(2)))`
pub fn _gelu(x: &Tensor) -> Tensor {
    x * 0.5 * (1.0 + (x / std::f64::consts::SQRT_2).erf())
}

pub fn _gelu_new(x: &Tensor) -> Tensor {
    x * 0.5 * (((x.pow(3.0f64) * 0.044715 + x) * ((2f64 / PI).sqrt())).tanh() + 1.0)
}

pub fn _relu(x: &Tensor) -> Tensor {
    x.relu()
}

pub fn _tanh(x: &Tensor) -> Tensor {
    x.tanh()
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
/// # Activation function used in the feed-forward sublayer and masked language model head
pub enum Activation {
    /// Gaussian Error Linear Unit ([Hendrycks et al., 2016,](https://arxiv.org/abs/1606.08415))
    gelu,
    /// Tanh approximation of the Gaussian Error Linear Unit
    gelu_new,
    /// Rectified Linear Unit
    relu,
    /// Hyperbolic tangent
    tanh,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::gelu
    }
}

impl Activation {
    pub fn get_function(&self) -> fn(&Tensor) -> Tensor {
        match self {
            Activation::gelu => _gelu,
            Activation::gelu_new => _gelu_new,
            Activation::relu => _relu,
            Activation::tanh => _tanh,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn gelu_matches_reference_values() {
        let x = Tensor::of_slice(&[-1.0f32, 0.0, 1.0, 2.0]);
        let y = _gelu(&x);
        let expected = Tensor::of_slice(&[-0.158_655_25f32, 0.0, 0.841_344_7, 1.954_499_7]);
        assert!(y.allclose(&expected, 1e-5, 1e-5, false));
    }

    #[test]
    fn gelu_approximation_is_close_to_exact() {
        let x = Tensor::randn(&[64], (Kind::Float, Device::Cpu));
        let exact = _gelu(&x);
        let approximate = _gelu_new(&x);
        assert!(exact.allclose(&approximate, 1e-2, 1e-2, false));
    }
}
