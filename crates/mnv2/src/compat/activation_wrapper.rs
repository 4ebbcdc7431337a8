//! # Activation Layer Wrapper
//!
//! `burn` 0.18 ships no `ReLU6`; [`Relu6`] fills that gap, and
//! [`Activation`] lets blocks switch activations by config.
use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Upper clamp of [`Relu6`].
pub const RELU6_MAX: f64 = 6.0;

/// Clamped rectifier: ``min(max(x, 0), 6)``.
#[derive(Module, Clone, Debug, Default)]
pub struct Relu6;

impl Relu6 {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }

    /// Applies ``clamp(x, 0, 6)`` element-wise.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        input.clamp(0.0, RELU6_MAX)
    }
}

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu6`] activation layer.
    Relu6,

    /// [`Relu`] activation layer.
    Relu,

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyReluConfig),

    /// [`Gelu`] activation layer.
    Gelu,

    /// [`PRelu`] activation layer.
    PRelu(PReluConfig),
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu6
    }
}

impl ActivationConfig {
    /// Initialize a wrapped activation layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            ActivationConfig::Relu6 => Activation::Relu6(Relu6),
            ActivationConfig::Relu => Activation::Relu(Relu),
            ActivationConfig::LeakyRelu(conf) => Activation::LeakyRelu(conf.init()),
            ActivationConfig::Gelu => Activation::Gelu(Gelu),
            ActivationConfig::PRelu(conf) => Activation::PRelu(conf.init(device)),
        }
    }
}

/// Activation Layer Wrapper.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// [`Relu6`] activation layer.
    Relu6(Relu6),

    /// [`Relu`] activation layer.
    Relu(Relu),

    /// [`LeakyRelu`] activation layer.
    LeakyRelu(LeakyRelu),

    /// [`Gelu`] activation layer.
    Gelu(Gelu),

    /// [`PRelu`] activation layer.
    PRelu(PRelu<B>),
}

impl<B: Backend> Activation<B> {
    /// Forward pass.
    #[tracing::instrument(skip_all)]
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu6(layer) => layer.forward(input),
            Activation::Relu(layer) => layer.forward(input),
            Activation::LeakyRelu(layer) => layer.forward(input),
            Activation::Gelu(layer) => layer.forward(input),
            Activation::PRelu(layer) => layer.forward(input),
        }
    }

    /// Build a [`ActivationConfig`] for this module.
    pub fn to_config(&self) -> ActivationConfig {
        match self {
            Activation::Relu6(_) => ActivationConfig::Relu6,
            Activation::Relu(_) => ActivationConfig::Relu,
            Activation::LeakyRelu(layer) => LeakyReluConfig::new()
                .with_negative_slope(layer.negative_slope)
                .into(),
            Activation::Gelu(_) => ActivationConfig::Gelu,
            Activation::PRelu(layer) => PReluConfig::new()
                .with_alpha(layer.alpha_value)
                .with_num_parameters(layer.num_params())
                .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn make_input<B: Backend>(device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data([[-1.0, -0.5, 0.0], [1.0, 6.5, 12.0]], device)
    }

    fn check_config_output<B: Backend, const D: usize>(
        config: ActivationConfig,
        input: Tensor<B, D>,
        expected: Tensor<B, D>,
        device: &B::Device,
    ) {
        let act1 = config.init(device);
        let record: ActivationRecord<B> = act1.into_record();

        let act = config.init(device).load_record(record);

        act.forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_relu6() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let expected: Tensor<TestBackend, 2> =
            Tensor::from_data([[0.0, 0.0, 0.0], [1.0, 6.0, 6.0]], &device);

        check_config_output(ActivationConfig::Relu6, input, expected, &device);
    }

    #[test]
    fn test_default_is_relu6() {
        assert!(matches!(ActivationConfig::default(), ActivationConfig::Relu6));
    }

    #[test]
    fn test_relu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let expected = Relu::default().forward(input.clone());

        check_config_output(ActivationConfig::Relu, input, expected, &device)
    }

    #[test]
    fn test_leaky_relu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let inner_config = LeakyReluConfig::new().with_negative_slope(0.1);
        let expected = inner_config.init().forward(input.clone());

        check_config_output(
            ActivationConfig::LeakyRelu(inner_config),
            input,
            expected,
            &device,
        )
    }

    #[test]
    fn test_gelu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let expected = Gelu::default().forward(input.clone());

        check_config_output(ActivationConfig::Gelu, input, expected, &device)
    }

    #[test]
    fn test_prelu() {
        let device = Default::default();
        let input = make_input::<TestBackend>(&device);

        let inner_config = PReluConfig::new();
        let expected = inner_config.init(&device).forward(input.clone());

        check_config_output(ActivationConfig::PRelu(inner_config), input, expected, &device)
    }

    #[derive(Clone, Default)]
    struct SpanNames(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanNames {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().unwrap().push(attrs.metadata().name().to_string());
        }
    }

    #[test]
    fn test_forward_is_instrumented() {
        use tracing_subscriber::layer::SubscriberExt;

        let names = SpanNames::default();
        let subscriber = tracing_subscriber::registry().with(names.clone());

        let device = Default::default();
        let act: Activation<TestBackend> = ActivationConfig::Relu6.init(&device);
        tracing::subscriber::with_default(subscriber, || {
            let _ = act.forward(make_input::<TestBackend>(&device));
        });

        assert!(names.0.lock().unwrap().iter().any(|name| name == "forward"));
    }

    #[test]
    fn test_to_config() {
        let device = Default::default();
        for config in [
            ActivationConfig::Relu6,
            ActivationConfig::Relu,
            ActivationConfig::Gelu,
            LeakyReluConfig::new().with_negative_slope(0.2).into(),
        ] {
            let layer: Activation<TestBackend> = config.init(&device);
            assert_eq!(
                format!("{:?}", layer.to_config()),
                format!("{:?}", config)
            );
        }
    }
}
