//! Line-oriented kiosk console.
//!
//! Drives the whole kiosk headless: face login, registration, text and
//! voice chat, the world-chat overlay, and sound control. One command
//! per line on stdin; state changes are printed as they happen.

use crate::adapters::{McSpeaker, V4lSource};
use mingle_core::field::FieldSim;
use mingle_gateway::{FaceService, FeedsClient, McClient, WorldChatPoller};
use mingle_hw::{MicHandle, Microphone};
use mingle_session::{
    CaptureEvent, CaptureState, ConversationSession, FaceCaptureSession, VoiceTurnController,
};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Success screens and world-chat reprints are driven off this cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// How many world-chat lines to show per refresh.
const WORLD_CHAT_TAIL: usize = 8;

pub struct Kiosk {
    pub capture: FaceCaptureSession<V4lSource, FaceService>,
    pub convo: ConversationSession<McClient, McClient, McSpeaker>,
    pub voice: VoiceTurnController,
    pub feeds: FeedsClient,
    pub field: FieldSim,
    pub poll_interval: Duration,
}

struct WorldOverlay {
    cancel: CancellationToken,
    _poller: WorldChatPoller,
    latest: watch::Receiver<Vec<mingle_core::ChatMessage>>,
}

enum Event {
    Line(Option<String>),
    MicChunk(Option<Vec<f32>>),
    Tick,
}

pub async fn run(mut kiosk: Kiosk) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut mic: Option<MicHandle> = None;
    let mut world: Option<WorldOverlay> = None;
    let mut last_state = kiosk.capture.state();

    print_help();

    loop {
        let event = {
            let mic_chunk = async {
                match mic.as_mut() {
                    Some(handle) => handle.next_chunk().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                line = lines.next_line() => Event::Line(line?),
                chunk = mic_chunk => Event::MicChunk(chunk),
                _ = ticker.tick() => Event::Tick,
            }
        };

        match event {
            Event::Line(None) => break,
            Event::Line(Some(line)) => {
                if !handle_command(&mut kiosk, &mut mic, &mut world, line.trim()).await {
                    break;
                }
            }
            Event::MicChunk(None) => {
                // Stream thread exited; drop the handle so `voice on`
                // can reopen the device.
                tracing::warn!("microphone stream ended");
                mic = None;
                kiosk.voice.disable();
            }
            Event::MicChunk(Some(chunk)) => {
                if let Some(payload) = kiosk.voice.push_samples(&chunk, Instant::now()) {
                    println!("[voice] utterance captured ({} samples)", payload.sample_count);
                    kiosk.convo.send_voice(&payload).await;
                    kiosk.voice.utterance_handled();
                    print_transcript_tail(&kiosk, 2);
                }
            }
            Event::Tick => {
                kiosk.field.advance(TICK_INTERVAL.as_secs_f32());
                kiosk.capture.tick(Instant::now());
                let state = kiosk.capture.state();
                if state != last_state {
                    println!("[login] {}", state_label(state));
                    last_state = state;
                }
                if let Some(overlay) = world.as_mut() {
                    if overlay.latest.has_changed().unwrap_or(false) {
                        let messages = overlay.latest.borrow_and_update().clone();
                        print_world_chat(&messages);
                    }
                }
            }
        }
    }

    if let Some(overlay) = world {
        overlay.cancel.cancel();
    }
    kiosk.capture.force_reset();
    Ok(())
}

/// Returns false when the console should exit.
async fn handle_command(
    kiosk: &mut Kiosk,
    mic: &mut Option<MicHandle>,
    world: &mut Option<WorldOverlay>,
    line: &str,
) -> bool {
    let (cmd, rest) = match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match (cmd, rest) {
        ("", _) => {}
        ("help", _) => print_help(),
        ("scan", _) => {
            if let Err(err) = kiosk.capture.request_scan().await {
                println!("[login] scan failed: {err}");
            } else {
                println!("[login] scanning; type `capture` when you are in frame");
            }
        }
        ("capture", _) => match kiosk.capture.capture(kiosk.convo.store(), Instant::now()).await {
            Ok(Some(CaptureEvent::MatchFound(outcome))) => {
                println!(
                    "[login] welcome back, {} (distance {:.3})",
                    outcome.profile_name.as_deref().unwrap_or("?"),
                    outcome.distance
                );
                if let Some(profile_id) = outcome.profile_id.as_deref() {
                    if let Err(err) = kiosk.convo.login(profile_id).await {
                        println!("[login] {err}");
                    } else {
                        print_transcript_tail(kiosk, 1);
                    }
                }
            }
            Ok(Some(CaptureEvent::RegistrationNeeded)) => {
                println!("[login] new face; type `name <your name>` to register");
            }
            Ok(Some(CaptureEvent::NoFaceDetected)) => {
                println!("[login] no face detected; still scanning, try `capture` again");
            }
            Ok(None) => println!("[login] not scanning; type `scan` first"),
            Err(err) => println!("[login] capture failed: {err}"),
        },
        ("name", "") => println!("usage: name <display name>"),
        ("name", name) => match kiosk.capture.submit_name(name, Instant::now()) {
            Some((name, descriptor)) => {
                let avatar = format!(
                    "https://ui-avatars.com/api/?name={}&background=random",
                    name.replace(' ', "+")
                );
                match kiosk
                    .convo
                    .register(&name, descriptor.as_slice().to_vec(), &avatar)
                    .await
                {
                    Ok(()) => print_transcript_tail(kiosk, 2),
                    Err(err) => println!("[login] registration failed: {err}"),
                }
            }
            None => println!("[login] nothing to name (blank, or not registering)"),
        },
        ("say", "") => println!("usage: say <message>"),
        ("say", text) => {
            kiosk.convo.send_text(text).await;
            print_transcript_tail(kiosk, 2);
        }
        ("voice", "on") => {
            if mic.is_some() {
                println!("[voice] already on");
            } else {
                match Microphone::start() {
                    Ok(handle) => {
                        *mic = Some(handle);
                        kiosk.voice.enable();
                        println!("[voice] listening");
                    }
                    Err(err) => println!("[voice] microphone unavailable: {err}"),
                }
            }
        }
        ("voice", "off") => {
            *mic = None;
            kiosk.voice.disable();
            println!("[voice] off");
        }
        ("world", "on") => {
            if world.is_none() {
                let cancel = CancellationToken::new();
                let poller = WorldChatPoller::spawn(
                    kiosk.feeds.clone(),
                    kiosk.poll_interval,
                    cancel.clone(),
                );
                let latest = poller.subscribe();
                *world = Some(WorldOverlay {
                    cancel,
                    _poller: poller,
                    latest,
                });
                println!("[world] polling every {:?}", kiosk.poll_interval);
            }
        }
        ("world", "off") => {
            if let Some(overlay) = world.take() {
                overlay.cancel.cancel();
                println!("[world] off");
            }
        }
        ("sound", "on") => {
            kiosk.convo.set_sound(true);
            println!("[sound] on");
        }
        ("sound", "off") => {
            kiosk.convo.set_sound(false);
            println!("[sound] off");
        }
        ("attendees", _) => {
            // Sync the floating field with the feed, then print a
            // snapshot of the simulation.
            let attendees = kiosk.feeds.attendees().await;
            let ids: Vec<String> = attendees.iter().map(|a| a.id.clone()).collect();
            kiosk.field.retain_ids(&ids);
            let mut rng = rand::thread_rng();
            for attendee in &attendees {
                if !kiosk.field.contains(&attendee.id) {
                    kiosk.field.spawn(
                        &mut rng,
                        attendee.id.clone(),
                        attendee.name.clone(),
                        attendee.role.clone(),
                        attendee.avatar_url.clone(),
                    );
                }
            }
            for bubble in kiosk.field.bubbles() {
                println!(
                    "  {} - {} at ({:.0}, {:.0})",
                    bubble.name, bubble.role, bubble.x, bubble.y
                );
            }
        }
        ("users", _) => {
            for profile in kiosk.convo.store().profiles() {
                println!(
                    "  {} - {} ({} messages)",
                    profile.id,
                    profile.name,
                    profile.history.len()
                );
            }
        }
        ("logout", _) => {
            kiosk.convo.logout();
            kiosk.capture.force_reset();
            println!("[login] logged out");
        }
        ("cancel", _) => {
            kiosk.capture.cancel();
            println!("[login] cancelled");
        }
        ("clear", "yes") => match kiosk.convo.clear_all_users(true) {
            Ok(true) => println!("[store] all users erased"),
            Ok(false) => {}
            Err(err) => println!("[store] clear failed: {err}"),
        },
        ("clear", _) => println!("this erases every enrolled user; type `clear yes` to confirm"),
        ("quit", _) | ("exit", _) => return false,
        _ => println!("unknown command; type `help`"),
    }
    true
}

fn print_transcript_tail(kiosk: &Kiosk, count: usize) {
    let messages = kiosk.convo.messages();
    let start = messages.len().saturating_sub(count);
    for msg in &messages[start..] {
        println!("  {}: {}", msg.user_name, msg.text);
    }
}

fn print_world_chat(messages: &[mingle_core::ChatMessage]) {
    let start = messages.len().saturating_sub(WORLD_CHAT_TAIL);
    println!("[world] --- latest ---");
    for msg in &messages[start..] {
        println!("  {}: {}", msg.user_name, msg.text);
    }
}

fn print_help() {
    println!("commands:");
    println!("  scan | capture | name <n> | cancel    face login");
    println!("  say <text>                            chat with the MC");
    println!("  voice on|off                          push-free voice chat");
    println!("  world on|off                          world chat overlay");
    println!("  sound on|off                          spoken replies");
    println!("  users | attendees | logout | clear    session & store");
    println!("  quit");
}

fn state_label(state: CaptureState) -> &'static str {
    match state {
        CaptureState::Idle => "idle",
        CaptureState::LoadingModels => "loading models",
        CaptureState::Scanning => "scanning",
        CaptureState::Processing => "processing",
        CaptureState::Registering => "registering",
        CaptureState::Success => "success",
    }
}
