//! Prediction requests and pending async results.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::tensor::{InferInput, InferOutput, OutputSpec};

/// Transport used for tensor payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SharedMemoryMode {
    /// Payloads travel in-band with the RPC.
    #[default]
    None,
    /// Payloads travel through registered POSIX shared-memory regions.
    System,
}

/// One prediction to submit, built up fluently.
///
/// ```rust,no_run
/// use inferlink::{InferInput, OutputSpec, PredictRequest};
///
/// # fn example() -> inferlink::Result<PredictRequest> {
/// let request = PredictRequest::new("resnet50")
///     .version(2)
///     .input(InferInput::from_f32("pixels", vec![1, 3], &[0.1, 0.2, 0.3])?)
///     .output(OutputSpec::new("scores", 4000))
///     .attempts(3);
/// # Ok(request)
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PredictRequest {
    pub model_name: String,
    pub model_version: String,
    pub inputs: Vec<InferInput>,
    pub outputs: Vec<OutputSpec>,
    /// Attempt budget; falls back to the client configuration when unset.
    pub attempts: Option<usize>,
    pub shared_memory: SharedMemoryMode,
}

impl PredictRequest {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: "1".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attempts: None,
            shared_memory: SharedMemoryMode::None,
        }
    }

    /// Set the model version. Numeric versions are accepted and carried as
    /// strings on the wire.
    pub fn version(mut self, version: impl ToString) -> Self {
        self.model_version = version.to_string();
        self
    }

    pub fn input(mut self, input: InferInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Total attempt budget for transient server errors. 1 means no retry;
    /// 0 is treated as 1.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = Some(attempts.max(1));
        self
    }

    pub fn shared_memory(mut self, mode: SharedMemoryMode) -> Self {
        self.shared_memory = mode;
        self
    }
}

/// Decoded outputs of one prediction, keyed by output name.
pub type PredictionOutputs = HashMap<String, InferOutput>;

/// A prediction in flight, resolved exactly once by the dispatch task.
///
/// Returned by [`Client::predict_async`](crate::Client::predict_async), one
/// per requested model version. Await it to obtain the decoded outputs or
/// the final error after the attempt budget is spent.
#[derive(Debug)]
pub struct PendingPrediction {
    model_version: String,
    rx: oneshot::Receiver<Result<PredictionOutputs>>,
}

impl PendingPrediction {
    pub(crate) fn new(
        model_version: String,
        rx: oneshot::Receiver<Result<PredictionOutputs>>,
    ) -> Self {
        Self { model_version, rx }
    }

    /// The model version this prediction was dispatched against.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }
}

impl Future for PendingPrediction {
    type Output = Result<PredictionOutputs>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|recv| match recv {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(
                "prediction task dropped before resolving".to_string(),
            )),
        })
    }
}
