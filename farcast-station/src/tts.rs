//! The external TTS server seam.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{StationError, StationResult};

/// Synthesized speech returned by the TTS server.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// PCM WAV bytes
    pub wav: Bytes,

    /// Duration reported by the synthesizer
    pub duration_sec: f64,

    /// Whether the server answered from its synthesis cache
    pub cached: bool,
}

/// The speech synthesis seam.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
        use_cache: bool,
    ) -> StationResult<SynthesizedAudio>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    model: &'a str,
    speed: f32,
    use_cache: bool,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    /// Hex-encoded WAV bytes
    audio: String,
    duration_sec: f64,
    #[serde(default)]
    cached: bool,
}

/// reqwest-backed TTS client.
pub struct HttpTtsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTtsClient {
    /// Create a client with a 60 s per-call budget.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client builds");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TtsClient for HttpTtsClient {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
        use_cache: bool,
    ) -> StationResult<SynthesizedAudio> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(&SynthesizeRequest {
                text,
                model: voice_id,
                speed,
                use_cache,
            })
            .send()
            .await
            .map_err(|e| StationError::Tts {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StationError::Tts {
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: SynthesizeResponse =
            response.json().await.map_err(|e| StationError::Tts {
                status: None,
                message: format!("bad synthesize response: {e}"),
            })?;

        let wav = hex::decode(&body.audio).map_err(|e| StationError::Tts {
            status: None,
            message: format!("bad hex audio payload: {e}"),
        })?;

        Ok(SynthesizedAudio {
            wav: Bytes::from(wav),
            duration_sec: body.duration_sec,
            cached: body.cached,
        })
    }
}
