//! One dubbing session from startup checks to cleanup.
//!
//! Everything fatal happens here, before the controller starts. Once playback
//! runs, failures only cost individual cues.

use crate::audio::RodioBackend;
use crate::cli::Cli;
use crate::clock::PlaybackClock;
use crate::config::{self, DubConfig};
use crate::console;
use crate::controller::{ControllerSettings, DubController, DubMode, StopReason};
use crate::error::{DubError, DubResult};
use crate::input::{DubCommand, KeyListener};
use crate::mpv::{self, MpvPlayer};
use crate::store::AssetStore;
use crate::subtitle;
use crate::synthesis::{self, SynthesisGateway, LANGUAGE_SAMPLE_CHARS};
use crate::timeline::Timeline;
use crate::tts;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const COMMAND_QUEUE: usize = 32;

pub async fn run(cli: Cli) -> DubResult<()> {
    if !cli.video.is_file() {
        return Err(DubError::VideoNotFound(cli.video.clone()));
    }
    let subs_path = subtitle::resolve_subtitle_path(&cli.video, cli.subs.as_deref())?;
    let timeline = Arc::new(Timeline::new(subtitle::load_srt(&subs_path)?));
    console::notice(format!(
        "Loaded {} subtitle(s) from {}",
        timeline.len(),
        subs_path.display()
    ));

    let mut config = config::load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate();

    let language = match &cli.lang {
        Some(lang) => lang.clone(),
        None => synthesis::detect_language(
            &timeline.text_sample(LANGUAGE_SAMPLE_CHARS),
            &config.voice.default_language,
        ),
    };
    console::notice(format!("Speech language: {language}"));

    let backend = RodioBackend::spawn()?;
    debug!("Audio output ready");

    // Dropped on every exit path, taking all synthesized audio with it.
    let temp_dir = tempfile::Builder::new().prefix("movie_dub_").tempdir()?;
    debug!("Temp directory: {}", temp_dir.path().display());

    let engine: Arc<dyn tts::TtsEngine> = Arc::from(tts::create_engine(&config.voice)?);
    console::notice(format!("TTS engine: {}", engine.engine_name()));
    let gateway = Arc::new(SynthesisGateway::new(
        engine,
        language,
        config.voice.voice.clone(),
        temp_dir.path().to_path_buf(),
        config.voice.retry_backoff(),
    ));
    let store = Arc::new(AssetStore::new());

    let player = MpvPlayer::launch(
        &config.player,
        &cli.video,
        &subs_path,
        &mpv::ipc_endpoint(temp_dir.path()),
    )
    .await?;

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let keys = KeyListener::spawn(tx.clone())?;
    if keys.is_none() {
        console::warning("not attached to a terminal, keyboard controls are unavailable");
    }
    tokio::spawn(forward_ctrl_c(tx));

    let mode = if cli.precache {
        DubMode::Precache
    } else {
        DubMode::OnDemand
    };
    let mut controller = DubController::new(
        Arc::clone(&timeline),
        Arc::clone(&store),
        gateway,
        player,
        backend,
        rx,
        ControllerSettings::from_config(&config),
        mode,
        config.voice.speed,
    );

    console::controls_banner();
    if mode == DubMode::Precache {
        controller.precache().await;
    }
    let reason = controller.run().await;
    controller.shutdown().await;
    drop(keys);

    let mut player = controller.into_clock();
    match reason {
        StopReason::StopDub => {
            console::notice("Video continues without dubbing; close the player to exit");
            player.release(false).await?;
        }
        StopReason::Quit => player.release(true).await?,
        StopReason::EndOfVideo => {
            player.release(false).await?;
            console::done("End of video");
        }
    }
    Ok(())
}

/// CLI flags win over file values.
fn apply_overrides(config: &mut DubConfig, cli: &Cli) {
    if let Some(speed) = cli.speed {
        config.voice.speed = speed;
    }
    if let Some(engine) = &cli.engine {
        config.voice.engine = engine.clone();
    }
    if let Some(voice) = &cli.voice {
        config.voice.voice = Some(voice.clone());
    }
    if let Some(lookahead) = cli.lookahead {
        config.sync.lookahead = lookahead;
    }
}

/// Without a terminal there is no raw-mode key reader, so Ctrl-C arrives as
/// a signal instead.
async fn forward_ctrl_c(tx: mpsc::Sender<DubCommand>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(DubCommand::Quit).await;
    }
}
