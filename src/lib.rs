//! Async client library for KServe-style tensor inference servers.
//!
//! This crate wraps the server's gRPC inference protocol with tensor
//! marshaling, optional shared-memory transport, bounded retry on
//! transient server errors, and readiness polling.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use inferlink::{Client, InferInput, OutputSpec, PredictRequest};
//!
//! # async fn example() -> inferlink::Result<()> {
//! let client = Client::connect("127.0.0.1:8001").await?;
//! client.wait_for_server(Duration::from_secs(30)).await?;
//!
//! let request = PredictRequest::new("my_model")
//!     .input(InferInput::from_f32("input0", vec![1, 4], &[0.0; 4])?)
//!     .output(OutputSpec::new("output0", 16))
//!     .attempts(3);
//!
//! let outputs = client.predict(request).await?;
//! let scores = outputs["output0"].as_f32()?;
//! println!("scores: {scores:?}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod shm;
pub mod tensor;

/// Generated protocol types for advanced usage.
pub mod proto {
    pub mod v1 {
        tonic::include_proto!("inference.v1");
    }
}

// Re-export commonly used types
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use request::{PendingPrediction, PredictRequest, PredictionOutputs, SharedMemoryMode};
pub use tensor::{DType, InferInput, InferOutput, OutputSpec};
