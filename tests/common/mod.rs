//! In-process mock inference server for integration tests.
//!
//! Serves the generated `InferenceService` on a loopback port with
//! scripted behavior: a readiness flag, a budget of transient failures,
//! and registration bookkeeping. Inference echoes each input tensor back
//! as the same-indexed requested output, through shared memory when the
//! request asks for it (regions are reached via `/dev/shm`).

use std::collections::HashMap;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use inferlink::proto::v1 as pb;
use pb::inference_service_server::{InferenceService, InferenceServiceServer};

#[derive(Clone)]
pub struct MockState {
    pub ready: Arc<AtomicBool>,
    pub infer_calls: Arc<AtomicUsize>,
    /// Number of upcoming ModelInfer calls to fail with `unavailable`.
    pub fail_budget: Arc<AtomicUsize>,
    /// Registered regions, name -> POSIX key.
    pub regions: Arc<Mutex<HashMap<String, String>>>,
    /// Names passed to unregister, in order ("" = unregister all).
    pub unregistered: Arc<Mutex<Vec<String>>>,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            infer_calls: Arc::new(AtomicUsize::new(0)),
            fail_budget: Arc::new(AtomicUsize::new(0)),
            regions: Arc::new(Mutex::new(HashMap::new())),
            unregistered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.fail_budget.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }
}

pub struct MockInferenceServer {
    state: MockState,
}

fn shm_path(key: &str) -> PathBuf {
    PathBuf::from("/dev/shm").join(key.trim_start_matches('/'))
}

fn region_param(params: &HashMap<String, pb::InferParameter>) -> Option<String> {
    match params.get("shared_memory_region")?.value.as_ref()? {
        pb::infer_parameter::Value::StringParam(name) => Some(name.clone()),
        _ => None,
    }
}

#[tonic::async_trait]
impl InferenceService for MockInferenceServer {
    async fn server_live(
        &self,
        _request: Request<pb::ServerLiveRequest>,
    ) -> Result<Response<pb::ServerLiveResponse>, Status> {
        Ok(Response::new(pb::ServerLiveResponse { live: true }))
    }

    async fn server_ready(
        &self,
        _request: Request<pb::ServerReadyRequest>,
    ) -> Result<Response<pb::ServerReadyResponse>, Status> {
        Ok(Response::new(pb::ServerReadyResponse {
            ready: self.state.ready.load(Ordering::SeqCst),
        }))
    }

    async fn model_ready(
        &self,
        _request: Request<pb::ModelReadyRequest>,
    ) -> Result<Response<pb::ModelReadyResponse>, Status> {
        Ok(Response::new(pb::ModelReadyResponse {
            ready: self.state.ready.load(Ordering::SeqCst),
        }))
    }

    async fn model_config(
        &self,
        request: Request<pb::ModelConfigRequest>,
    ) -> Result<Response<pb::ModelConfigResponse>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(pb::ModelConfigResponse {
            config: Some(pb::ModelConfig {
                name,
                platform: "mock".to_string(),
                max_batch_size: 8,
                inputs: vec![pb::TensorSpec {
                    name: "input0".to_string(),
                    datatype: "FP32".to_string(),
                    shape: vec![-1, 4],
                }],
                outputs: vec![pb::TensorSpec {
                    name: "output0".to_string(),
                    datatype: "FP32".to_string(),
                    shape: vec![-1, 4],
                }],
            }),
        }))
    }

    async fn model_infer(
        &self,
        request: Request<pb::ModelInferRequest>,
    ) -> Result<Response<pb::ModelInferResponse>, Status> {
        self.state.infer_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.state.fail_budget.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.fail_budget.store(remaining - 1, Ordering::SeqCst);
            return Err(Status::unavailable("scripted transient failure"));
        }

        let request = request.into_inner();
        if request.raw_input_contents.len() != request.inputs.len() {
            return Err(Status::invalid_argument(format!(
                "{} raw buffers for {} inputs",
                request.raw_input_contents.len(),
                request.inputs.len()
            )));
        }

        // Echo input i back as requested output i.
        let mut outputs = Vec::with_capacity(request.outputs.len());
        let mut raw_outputs = Vec::with_capacity(request.outputs.len());
        for (index, requested) in request.outputs.iter().enumerate() {
            let input = request
                .inputs
                .get(index)
                .ok_or_else(|| Status::invalid_argument("more outputs requested than inputs"))?;

            let data = match region_param(&input.parameters) {
                Some(region) => {
                    let key = self
                        .state
                        .regions
                        .lock()
                        .unwrap()
                        .get(&region)
                        .cloned()
                        .ok_or_else(|| {
                            Status::invalid_argument(format!("unregistered region `{region}`"))
                        })?;
                    std::fs::read(shm_path(&key))
                        .map_err(|e| Status::internal(format!("read {key}: {e}")))?
                }
                None => request.raw_input_contents[index].clone(),
            };

            match region_param(&requested.parameters) {
                Some(region) => {
                    let key = self
                        .state
                        .regions
                        .lock()
                        .unwrap()
                        .get(&region)
                        .cloned()
                        .ok_or_else(|| {
                            Status::invalid_argument(format!("unregistered region `{region}`"))
                        })?;
                    let file = std::fs::OpenOptions::new()
                        .write(true)
                        .open(shm_path(&key))
                        .map_err(|e| Status::internal(format!("open {key}: {e}")))?;
                    file.write_at(&data, 0)
                        .map_err(|e| Status::internal(format!("write {key}: {e}")))?;
                    raw_outputs.push(Vec::new());
                }
                None => raw_outputs.push(data.clone()),
            }

            outputs.push(pb::model_infer_response::InferOutputTensor {
                name: requested.name.clone(),
                datatype: input.datatype.clone(),
                shape: input.shape.clone(),
                parameters: HashMap::new(),
            });
        }

        Ok(Response::new(pb::ModelInferResponse {
            model_name: request.model_name,
            model_version: request.model_version,
            id: request.id,
            parameters: HashMap::new(),
            outputs,
            raw_output_contents: raw_outputs,
        }))
    }

    async fn system_shared_memory_register(
        &self,
        request: Request<pb::SystemSharedMemoryRegisterRequest>,
    ) -> Result<Response<pb::SystemSharedMemoryRegisterResponse>, Status> {
        let request = request.into_inner();
        let mut regions = self.state.regions.lock().unwrap();
        if regions.contains_key(&request.name) {
            return Err(Status::already_exists(format!(
                "region `{}` already registered",
                request.name
            )));
        }
        regions.insert(request.name, request.key);
        Ok(Response::new(pb::SystemSharedMemoryRegisterResponse {}))
    }

    async fn system_shared_memory_unregister(
        &self,
        request: Request<pb::SystemSharedMemoryUnregisterRequest>,
    ) -> Result<Response<pb::SystemSharedMemoryUnregisterResponse>, Status> {
        let request = request.into_inner();
        let mut regions = self.state.regions.lock().unwrap();
        if request.name.is_empty() {
            regions.clear();
        } else {
            regions.remove(&request.name);
        }
        self.state.unregistered.lock().unwrap().push(request.name);
        Ok(Response::new(pb::SystemSharedMemoryUnregisterResponse {}))
    }
}

/// Bind a loopback port, serve the mock on it, and return the endpoint.
pub async fn spawn_mock_server(state: MockState) -> String {
    // Honor RUST_LOG in test runs; ignore repeat installs.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = format!("http://127.0.0.1:{}", addr.port());

    let service = InferenceServiceServer::new(MockInferenceServer { state });
    let incoming = TcpListenerStream::new(listener);

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    endpoint
}
