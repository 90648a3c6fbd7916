//! Hosted face-descriptor extraction.
//!
//! The kiosk delegates detection and embedding to a recognition
//! service: a JPEG probe goes up, a fixed-length descriptor comes back
//! (or nothing, when no face clears the confidence threshold).

use crate::error::{GatewayError, Result};
use base64::Engine;
use mingle_core::{Descriptor, DESCRIPTOR_DIM};
use mingle_session::FaceAnalyzer;
use serde::{Deserialize, Serialize};

/// Detection score below which the service discards a candidate face.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Detector input size; 512 balances speed against accuracy.
pub const DEFAULT_INPUT_SIZE: u32 = 512;

#[derive(Serialize)]
struct ExtractRequest<'a> {
    image: &'a str,
    min_confidence: f32,
    input_size: u32,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

#[derive(Deserialize)]
struct DetectedFace {
    descriptor: Vec<f32>,
    #[serde(default)]
    confidence: f32,
}

/// Client for the hosted recognition service.
pub struct FaceService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    min_confidence: f32,
    input_size: u32,
}

impl FaceService {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(GatewayError::Config("base_url must be non-empty".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    pub fn min_confidence(mut self, value: f32) -> Self {
        self.min_confidence = value;
        self
    }

    pub fn input_size(mut self, value: u32) -> Self {
        self.input_size = value;
        self
    }

    /// Warm the service's detection and recognition models so the first
    /// probe doesn't pay the cold-start cost.
    pub async fn warmup(&self) -> Result<()> {
        let url = format!("{}/v1/models/warmup", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::api(status.as_u16(), body));
        }
        tracing::info!("recognition models warmed");
        Ok(())
    }

    /// Extract the most confident face descriptor from a JPEG probe.
    ///
    /// `Ok(None)` means the service saw no usable face; transport and
    /// protocol failures are errors, never silent misses.
    pub async fn extract_descriptor(&self, jpeg: &[u8]) -> Result<Option<Descriptor>> {
        let image = base64::engine::general_purpose::STANDARD.encode(jpeg);
        let url = format!("{}/v1/descriptors", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ExtractRequest {
                image: &image,
                min_confidence: self.min_confidence,
                input_size: self.input_size,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::api(status.as_u16(), body));
        }

        let parsed: ExtractResponse = resp.json().await?;
        let Some(face) = parsed
            .faces
            .into_iter()
            .filter(|f| f.confidence >= self.min_confidence)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            tracing::debug!("no face above confidence threshold");
            return Ok(None);
        };

        if face.descriptor.len() != DESCRIPTOR_DIM {
            return Err(GatewayError::Config(format!(
                "service returned a {}-dimension descriptor",
                face.descriptor.len()
            )));
        }
        Ok(Some(Descriptor::from_raw(face.descriptor)))
    }
}

/// Adapter so the capture state machine can drive the hosted service.
/// Errors cross the boundary as user-presentable strings.
impl FaceAnalyzer for FaceService {
    async fn prepare(&mut self) -> std::result::Result<(), String> {
        self.warmup()
            .await
            .map_err(|err| format!("face models unavailable: {err}"))
    }

    async fn extract(&mut self, jpeg: &[u8]) -> std::result::Result<Option<Descriptor>, String> {
        self.extract_descriptor(jpeg)
            .await
            .map_err(|err| format!("face extraction failed: {err}"))
    }
}
