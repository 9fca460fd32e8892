//! Inference client.
//!
//! [`Client`] wraps the generated gRPC stub with tensor marshaling,
//! optional shared-memory transport, bounded retry on transient server
//! errors, and readiness polling. The channel is lazy: constructing a
//! client performs no I/O, so it can be created before the server is up
//! and [`Client::wait_for_server`] awaited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, TlsSettings};
use crate::error::{Error, Result};
use crate::proto::v1 as pb;
use crate::request::{PendingPrediction, PredictRequest, PredictionOutputs, SharedMemoryMode};
use crate::shm::SystemSharedMemory;
use crate::tensor::{numel, DType, InferOutput};

use pb::inference_service_client::InferenceServiceClient;

/// Interval between readiness probes in [`Client::wait_for_server`].
const SERVER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Process-wide sequence making region keys unique across clients.
static REGION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Which shared-memory registrations to release after a successful
/// prediction. The async path leaves input regions registered, as the
/// original completion callbacks did; `clear_shared_memory` sweeps them.
#[derive(Clone, Copy)]
enum Cleanup {
    InputsAndOutputs,
    OutputsOnly,
}

struct StagedRegion {
    name: String,
    shm: SystemSharedMemory,
}

/// Client for a KServe-style inference server.
///
/// Cloning is cheap (the underlying channel is reference-counted) and each
/// RPC uses its own stub clone, so a single client can serve concurrent
/// callers without locking.
#[derive(Clone)]
pub struct Client {
    inner: InferenceServiceClient<Channel>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Connect to an inference server with default configuration.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Server address (e.g., "127.0.0.1:8001" or
    ///   "https://server:8001")
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let client = Client::connect("127.0.0.1:8001").await?;
    /// client.wait_for_server(Duration::from_secs(30)).await?;
    /// ```
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Self::connect_with_config(ClientConfig::default().with_endpoint(endpoint)).await
    }

    /// Connect with explicit configuration (endpoint, timeout, TLS).
    pub async fn connect_with_config(config: ClientConfig) -> Result<Self> {
        let uri = if config.endpoint.starts_with("http://")
            || config.endpoint.starts_with("https://")
        {
            config.endpoint.clone()
        } else {
            format!("http://{}", config.endpoint)
        };

        debug!(uri = %uri, "setting up inference channel");

        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|e| Error::Connection(e.to_string()))?;

        if let Some(timeout) = config.request_timeout() {
            endpoint = endpoint.timeout(timeout);
        }

        if let Some(tls) = resolve_tls(&config.tls)? {
            endpoint = endpoint.tls_config(tls)?;
        }

        // Lazy: the first RPC performs the dial, so wait_for_server can be
        // used against a server that is still starting.
        let channel = endpoint.connect_lazy();

        info!(endpoint = %config.endpoint, "inference client ready");

        Ok(Self {
            inner: InferenceServiceClient::new(channel),
            config: Arc::new(config),
        })
    }

    /// The resolved client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn is_server_live(&self) -> Result<bool> {
        let response = self
            .inner
            .clone()
            .server_live(pb::ServerLiveRequest {})
            .await?;
        Ok(response.into_inner().live)
    }

    pub async fn is_server_ready(&self) -> Result<bool> {
        let response = self
            .inner
            .clone()
            .server_ready(pb::ServerReadyRequest {})
            .await?;
        Ok(response.into_inner().ready)
    }

    /// Whether the server reports a model (optionally a specific version)
    /// ready to serve.
    pub async fn is_model_ready(&self, model_name: &str, version: Option<&str>) -> Result<bool> {
        let response = self
            .inner
            .clone()
            .model_ready(pb::ModelReadyRequest {
                name: model_name.to_string(),
                version: version.unwrap_or("").to_string(),
            })
            .await?;
        Ok(response.into_inner().ready)
    }

    /// Poll server readiness once per second until it reports ready.
    ///
    /// Probe failures (server not yet accepting connections) are swallowed;
    /// once `timeout` has elapsed without a ready response the call fails
    /// with [`Error::StartupTimeout`].
    pub async fn wait_for_server(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.is_server_ready().await {
                Ok(true) => {
                    info!(waited = ?start.elapsed(), "server ready");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(error = %err, "readiness probe failed");
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::StartupTimeout { waited: timeout });
            }
            tokio::time::sleep(SERVER_POLL_INTERVAL).await;
        }
    }

    /// Fetch the server-side configuration of a model.
    pub async fn model_config(&self, model_name: &str) -> Result<pb::ModelConfig> {
        let response = self
            .inner
            .clone()
            .model_config(pb::ModelConfigRequest {
                name: model_name.to_string(),
                version: String::new(),
            })
            .await?;
        response
            .into_inner()
            .config
            .ok_or_else(|| Error::InvalidData(format!("no config returned for `{model_name}`")))
    }

    /// Register a system shared-memory region with the server.
    pub async fn register_system_shared_memory(
        &self,
        name: &str,
        key: &str,
        byte_size: u64,
    ) -> Result<()> {
        self.inner
            .clone()
            .system_shared_memory_register(pb::SystemSharedMemoryRegisterRequest {
                name: name.to_string(),
                key: key.to_string(),
                offset: 0,
                byte_size,
            })
            .await?;
        Ok(())
    }

    /// Unregister one system shared-memory region.
    pub async fn unregister_system_shared_memory(&self, name: &str) -> Result<()> {
        self.inner
            .clone()
            .system_shared_memory_unregister(pb::SystemSharedMemoryUnregisterRequest {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Release every shared-memory registration the server holds, including
    /// regions a failed or async prediction left behind.
    pub async fn clear_shared_memory(&self) -> Result<()> {
        self.unregister_system_shared_memory("").await
    }

    /// Run one prediction, retrying transient server errors.
    ///
    /// The attempt budget comes from the request, falling back to the
    /// client configuration: a budget of `n` means up to `n - 1` retries
    /// before the error propagates. Each attempt restages inputs and
    /// outputs from scratch. After success, shared-memory registrations
    /// for both inputs and outputs are released.
    pub async fn predict(&self, request: PredictRequest) -> Result<PredictionOutputs> {
        self.predict_with_cleanup(&request, Cleanup::InputsAndOutputs)
            .await
    }

    /// Dispatch one prediction per model version without waiting.
    ///
    /// Returns one [`PendingPrediction`] per version, each resolved exactly
    /// once by its dispatch task: with decoded outputs on success, or with
    /// the final error once that call's attempt budget is spent. An empty
    /// version list dispatches against the request's own version.
    ///
    /// Completion releases the call's output regions only; input regions
    /// are swept by [`Client::clear_shared_memory`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn predict_async(
        &self,
        request: PredictRequest,
        versions: impl IntoIterator<Item = impl ToString>,
    ) -> Vec<PendingPrediction> {
        let mut versions: Vec<String> = versions.into_iter().map(|v| v.to_string()).collect();
        if versions.is_empty() {
            versions.push(request.model_version.clone());
        }

        versions
            .into_iter()
            .map(|version| {
                let (tx, rx) = oneshot::channel();
                let client = self.clone();
                let mut request = request.clone();
                request.model_version = version.clone();
                tokio::spawn(async move {
                    let result = client
                        .predict_with_cleanup(&request, Cleanup::OutputsOnly)
                        .await;
                    // The receiver may have been dropped; nothing to do.
                    let _ = tx.send(result);
                });
                PendingPrediction::new(version, rx)
            })
            .collect()
    }

    async fn predict_with_cleanup(
        &self,
        request: &PredictRequest,
        cleanup: Cleanup,
    ) -> Result<PredictionOutputs> {
        let attempts = request.attempts.unwrap_or(self.config.attempts).max(1);
        let mut attempt = 1;
        loop {
            match self.predict_attempt(request, cleanup).await {
                Ok(outputs) => return Ok(outputs),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        model = %request.model_name,
                        version = %request.model_version,
                        attempt,
                        error = %err,
                        "transient server error, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn predict_attempt(
        &self,
        request: &PredictRequest,
        cleanup: Cleanup,
    ) -> Result<PredictionOutputs> {
        let use_shm = request.shared_memory == SharedMemoryMode::System;

        let mut pb_inputs = Vec::with_capacity(request.inputs.len());
        let mut raw_inputs = Vec::with_capacity(request.inputs.len());
        let mut input_regions = Vec::new();
        for input in &request.inputs {
            let mut tensor = pb::model_infer_request::InferInputTensor {
                name: input.name.clone(),
                datatype: input.dtype.as_str().to_string(),
                shape: input.shape.clone(),
                parameters: HashMap::new(),
            };
            if use_shm && !input.data.is_empty() {
                let region = self
                    .stage_region(&input.name, input.data.len() as u64, Some(&input.data))
                    .await?;
                tensor.parameters = shm_params(&region.name, input.data.len() as u64);
                input_regions.push(region);
                raw_inputs.push(Vec::new());
            } else {
                raw_inputs.push(input.data.to_vec());
            }
            pb_inputs.push(tensor);
        }

        let mut pb_outputs = Vec::with_capacity(request.outputs.len());
        let mut output_regions: HashMap<String, StagedRegion> = HashMap::new();
        for spec in &request.outputs {
            let mut tensor = pb::model_infer_request::InferRequestedOutputTensor {
                name: spec.name.clone(),
                parameters: HashMap::new(),
            };
            if use_shm && spec.byte_size > 0 {
                let region = self.stage_region(&spec.name, spec.byte_size, None).await?;
                tensor.parameters = shm_params(&region.name, spec.byte_size);
                output_regions.insert(spec.name.clone(), region);
            }
            pb_outputs.push(tensor);
        }

        debug!(
            model = %request.model_name,
            version = %request.model_version,
            inputs = request.inputs.len(),
            outputs = request.outputs.len(),
            shared_memory = use_shm,
            "submitting inference"
        );

        let infer_request = pb::ModelInferRequest {
            model_name: request.model_name.clone(),
            model_version: request.model_version.clone(),
            id: String::new(),
            parameters: HashMap::new(),
            inputs: pb_inputs,
            outputs: pb_outputs,
            raw_input_contents: raw_inputs,
        };

        let response = self.inner.clone().model_infer(infer_request).await?;
        let outputs = decode_outputs(response.into_inner(), &output_regions)?;

        // Registrations are released only after a successful decode, and
        // best-effort: a failed unregister is not worth failing the
        // prediction for.
        if matches!(cleanup, Cleanup::InputsAndOutputs) {
            for region in &input_regions {
                self.best_effort_unregister(&region.name).await;
            }
        }
        for region in output_regions.values() {
            self.best_effort_unregister(&region.name).await;
        }

        Ok(outputs)
    }

    async fn stage_region(
        &self,
        tensor_name: &str,
        byte_size: u64,
        data: Option<&[u8]>,
    ) -> Result<StagedRegion> {
        let seq = REGION_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_{}_{}", tensor_name, std::process::id(), seq);
        let key = format!("/inferlink_{name}");
        let mut shm = SystemSharedMemory::create(&key, byte_size as usize)?;
        if let Some(bytes) = data {
            shm.write_at(0, bytes)?;
        }
        self.register_system_shared_memory(&name, &key, byte_size)
            .await?;
        debug!(region = %name, bytes = byte_size, "registered shared-memory region");
        Ok(StagedRegion { name, shm })
    }

    async fn best_effort_unregister(&self, name: &str) {
        if let Err(err) = self.unregister_system_shared_memory(name).await {
            warn!(region = %name, error = %err, "failed to unregister shared-memory region");
        }
    }
}

fn shm_params(region: &str, byte_size: u64) -> HashMap<String, pb::InferParameter> {
    let mut params = HashMap::new();
    params.insert(
        "shared_memory_region".to_string(),
        pb::InferParameter {
            value: Some(pb::infer_parameter::Value::StringParam(region.to_string())),
        },
    );
    params.insert(
        "shared_memory_byte_size".to_string(),
        pb::InferParameter {
            value: Some(pb::infer_parameter::Value::Int64Param(byte_size as i64)),
        },
    );
    params
}

fn decode_outputs(
    response: pb::ModelInferResponse,
    regions: &HashMap<String, StagedRegion>,
) -> Result<PredictionOutputs> {
    let raw_count = response.raw_output_contents.len();
    if raw_count != 0 && raw_count != response.outputs.len() {
        return Err(Error::InvalidData(format!(
            "{raw_count} raw output buffers for {} output tensors",
            response.outputs.len()
        )));
    }

    let mut raw_contents = response.raw_output_contents.into_iter();
    let mut outputs = HashMap::with_capacity(response.outputs.len());
    for tensor in response.outputs {
        let raw = raw_contents.next();
        let dtype = DType::from_wire(&tensor.datatype)?;
        let expected = dtype
            .element_size()
            .map(|size| numel(&tensor.shape).map(|n| n * size))
            .transpose()?;

        let data = if let Some(region) = regions.get(&tensor.name) {
            // BYTES payloads have no computable length; hand back the
            // whole region.
            let byte_len = expected.unwrap_or(region.shm.len());
            Bytes::from(region.shm.read_at(0, byte_len)?)
        } else {
            let raw = raw.ok_or_else(|| {
                Error::InvalidData(format!(
                    "output `{}` has neither raw contents nor a shared-memory region",
                    tensor.name
                ))
            })?;
            Bytes::from(raw)
        };

        if let Some(expected) = expected {
            if data.len() != expected {
                return Err(Error::InvalidData(format!(
                    "output `{}`: {} bytes for {dtype} shape {:?}, expected {expected}",
                    tensor.name,
                    data.len(),
                    tensor.shape
                )));
            }
        }

        outputs.insert(
            tensor.name.clone(),
            InferOutput {
                name: tensor.name,
                dtype,
                shape: tensor.shape,
                data,
            },
        );
    }
    Ok(outputs)
}

fn resolve_tls(settings: &TlsSettings) -> Result<Option<ClientTlsConfig>> {
    let ca = material(settings.ca_pem.as_deref(), settings.ca_path.as_deref())?;
    let cert = material(settings.cert_pem.as_deref(), settings.cert_path.as_deref())?;
    let key = material(settings.key_pem.as_deref(), settings.key_path.as_deref())?;

    if !settings.enabled && ca.is_none() && cert.is_none() {
        return Ok(None);
    }

    let mut tls = ClientTlsConfig::new();
    if let Some(ca) = ca {
        tls = tls.ca_certificate(Certificate::from_pem(&ca));
    }
    if let (Some(cert), Some(key)) = (cert, key) {
        tls = tls.identity(Identity::from_pem(&cert, &key));
    }
    Ok(Some(tls))
}

fn material(pem: Option<&[u8]>, path: Option<&std::path::Path>) -> Result<Option<Vec<u8>>> {
    if let Some(pem) = pem {
        return Ok(Some(pem.to_vec()));
    }
    if let Some(path) = path {
        return Ok(Some(std::fs::read(path)?));
    }
    Ok(None)
}
