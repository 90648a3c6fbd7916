use anyhow::Result;
use mingle_core::field::FieldSim;
use mingle_core::BiometricStore;
use mingle_gateway::{FaceService, FeedsClient, McClient};
use mingle_hw::AudioSink;
use mingle_session::{
    ConversationSession, FaceCaptureSession, Persona, VoiceTurnConfig, VoiceTurnController,
};
use tracing_subscriber::EnvFilter;

mod adapters;
mod config;
mod console;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::Config::from_env();
    tracing::info!(store = %cfg.store_path.display(), camera = %cfg.camera_device, "mingled starting");

    let store = BiometricStore::load(&cfg.store_path)?;

    let face = FaceService::new(&cfg.face_api_url, &cfg.api_key)?;
    let mc = McClient::new(&cfg.mc_api_url, &cfg.api_key)?;
    let feeds = FeedsClient::new(&cfg.feeds_url);

    let knowledge_base = feeds.knowledge_base().await;
    tracing::info!(rows = knowledge_base.len(), "knowledge base loaded");

    let capture = FaceCaptureSession::new(
        adapters::V4lSource::new(&cfg.camera_device),
        face,
        cfg.match_threshold,
    );

    let speaker = adapters::McSpeaker::new(mc.clone(), AudioSink::new());
    let convo = ConversationSession::new(
        store,
        knowledge_base,
        Persona::default(),
        mc.clone(),
        mc,
        speaker,
    );

    let voice = VoiceTurnController::new(VoiceTurnConfig {
        speech_threshold: cfg.speech_threshold,
        silence_window: cfg.silence_window(),
        min_payload_bytes: cfg.min_payload_bytes,
        sample_rate: mingle_hw::MIC_SAMPLE_RATE,
    });

    let kiosk = console::Kiosk {
        capture,
        convo,
        voice,
        feeds,
        field: FieldSim::new(cfg.field_width, cfg.field_height),
        poll_interval: cfg.poll_interval(),
    };

    console::run(kiosk).await?;
    tracing::info!("mingled shutting down");
    Ok(())
}
