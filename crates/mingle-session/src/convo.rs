//! Conversation orchestrator.
//!
//! Owns the authenticated user, the message log, and the sound flag,
//! and coordinates the capture/voice machines with the hosted MC
//! collaborators. Every mutation of the current user's log is mirrored
//! into the biometric store and persisted.

use crate::voice::UtterancePayload;
use mingle_core::{BiometricStore, ChatMessage, StoreError, UserProfile};
use serde_json::Value;
use thiserror::Error;

/// Sender id used for MC messages in the transcript.
pub const BOT_USER_ID: &str = "bot";

/// Fallback avatar for unauthenticated senders.
pub const GUEST_AVATAR: &str = "https://picsum.photos/id/64/200/200";

/// Messages starting with this prefix are directives to the MC, not
/// user speech; they are never appended to the transcript.
const SYSTEM_PREFIX: &str = "System:";

/// How many transcript entries accompany a text prompt.
const TEXT_CONTEXT_WINDOW: usize = 10;
/// How many transcript entries accompany a voice turn.
const VOICE_CONTEXT_WINDOW: usize = 5;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one voice interaction with the MC service. Either field
/// may be empty on failure.
#[derive(Debug, Clone, Default)]
pub struct VoiceTurn {
    pub transcription: String,
    pub reply: String,
}

/// Generative reply collaborator. Implementations handle their own
/// failures and return a fixed apology string instead of erroring.
pub trait ReplyGenerator {
    async fn generate_reply(&self, message: &str, recent: &[ChatMessage], kb: &[Value]) -> String;
}

/// Multimodal voice collaborator: transcription plus reply in one call.
pub trait VoiceGateway {
    async fn process_utterance(
        &self,
        payload: &UtterancePayload,
        recent: &[ChatMessage],
        kb: &[Value],
    ) -> VoiceTurn;
}

/// Speech playback collaborator; `stop` cancels at any time.
pub trait Speaker {
    async fn speak(&self, text: &str);
    fn stop(&self);
}

/// Display identity of the MC persona.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub avatar_url: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Event MC".to_string(),
            avatar_url: GUEST_AVATAR.to_string(),
        }
    }
}

pub struct ConversationSession<R, V, S> {
    store: BiometricStore,
    knowledge_base: Vec<Value>,
    persona: Persona,
    replies: R,
    voice: V,
    speaker: S,
    current_user: Option<UserProfile>,
    messages: Vec<ChatMessage>,
    sound_enabled: bool,
    speaking: bool,
}

impl<R, V, S> ConversationSession<R, V, S>
where
    R: ReplyGenerator,
    V: VoiceGateway,
    S: Speaker,
{
    pub fn new(
        store: BiometricStore,
        knowledge_base: Vec<Value>,
        persona: Persona,
        replies: R,
        voice: V,
        speaker: S,
    ) -> Self {
        Self {
            store,
            knowledge_base,
            persona,
            replies,
            voice,
            speaker,
            current_user: None,
            messages: Vec::new(),
            sound_enabled: true,
            speaking: false,
        }
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.current_user.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn store(&self) -> &BiometricStore {
        &self.store
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    /// Face login succeeded for an enrolled profile: restore their
    /// history (greeting them as a returning user) or start a fresh
    /// exchange if the history is empty.
    pub async fn login(&mut self, profile_id: &str) -> Result<(), SessionError> {
        let profile = self
            .store
            .find(profile_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownProfile(profile_id.to_string()))?;

        tracing::info!(profile = %profile.id, name = %profile.name, "face login");
        let returning = !profile.history.is_empty();
        self.messages = profile.history.clone();
        let name = profile.name.clone();
        self.current_user = Some(profile);

        if returning {
            self.send_text(&format!(
                "{SYSTEM_PREFIX} User {name} logged in via face recognition."
            ))
            .await;
        } else {
            self.send_text(&format!("Hi, I'm {name}. I just signed up at the kiosk."))
                .await;
        }
        Ok(())
    }

    /// A new face was captured and named: enroll it, make it current,
    /// and open with a first-time greeting.
    pub async fn register(
        &mut self,
        name: &str,
        descriptor: Vec<f32>,
        avatar_url: &str,
    ) -> Result<(), SessionError> {
        let profile = self.store.enroll(name, descriptor, avatar_url)?;
        self.messages.clear();
        self.current_user = Some(profile);
        self.send_text(&format!("Hi, I'm {name}. I just signed up at the kiosk."))
            .await;
        Ok(())
    }

    /// Clear the active user and transcript. The profile itself stays
    /// enrolled.
    pub fn logout(&mut self) {
        if let Some(user) = &self.current_user {
            tracing::info!(profile = %user.id, "logout");
        }
        self.current_user = None;
        self.messages.clear();
    }

    /// Erase every enrolled profile. Requires explicit confirmation;
    /// returns whether anything happened.
    pub fn clear_all_users(&mut self, confirmed: bool) -> Result<bool, SessionError> {
        if !confirmed {
            return Ok(false);
        }
        self.store.clear()?;
        self.logout();
        Ok(true)
    }

    /// Toggle speech playback. Disabling stops in-progress speech
    /// immediately.
    pub fn set_sound(&mut self, enabled: bool) {
        if !enabled {
            self.speaker.stop();
            self.speaking = false;
        }
        self.sound_enabled = enabled;
    }

    /// Send a text message (or a `System:` directive) and append the
    /// MC's reply.
    pub async fn send_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let is_directive = text.starts_with(SYSTEM_PREFIX);

        // Context is the log before this message, like the original
        // exchange the MC persona was tuned on.
        let context = self.recent(TEXT_CONTEXT_WINDOW);

        if !is_directive {
            self.append_user_message(text);
        }

        let prompt = if is_directive {
            let name = self
                .current_user
                .as_ref()
                .map(|u| u.name.as_str())
                .unwrap_or("Guest");
            format!(
                "User {name} has returned. Greet them warmly by name as the event MC. \
                 Do not mention \"System\"."
            )
        } else {
            text.to_string()
        };

        let reply = self
            .replies
            .generate_reply(&prompt, &context, &self.knowledge_base)
            .await;
        self.append_bot_message(&reply);
        self.maybe_speak(&reply).await;
    }

    /// Hand a completed utterance to the MC service. An empty
    /// transcription suppresses the user message; an empty reply
    /// suppresses the bot response.
    pub async fn send_voice(&mut self, payload: &UtterancePayload) {
        let context = self.recent(VOICE_CONTEXT_WINDOW);
        let turn = self
            .voice
            .process_utterance(payload, &context, &self.knowledge_base)
            .await;

        if !turn.transcription.is_empty() {
            self.append_user_message(&turn.transcription);
        }
        if !turn.reply.is_empty() {
            self.append_bot_message(&turn.reply);
            self.maybe_speak(&turn.reply).await;
        }
    }

    fn recent(&self, window: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(window);
        self.messages[start..].to_vec()
    }

    fn append_user_message(&mut self, text: &str) {
        let (id, name, avatar) = match &self.current_user {
            Some(u) => (u.id.clone(), u.name.clone(), u.avatar_url.clone()),
            None => (
                "guest".to_string(),
                "Guest".to_string(),
                GUEST_AVATAR.to_string(),
            ),
        };
        self.append(ChatMessage::new(id, name, avatar, text));
    }

    fn append_bot_message(&mut self, text: &str) {
        self.append(ChatMessage::new(
            BOT_USER_ID,
            self.persona.name.clone(),
            self.persona.avatar_url.clone(),
            text,
        ));
    }

    /// Append to the transcript and mirror the log into the current
    /// user's store entry. A failed save is logged, never fatal.
    fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if let Some(user) = self.current_user.as_mut() {
            user.history = self.messages.clone();
            let id = user.id.clone();
            if let Err(err) = self.store.update_history(&id, self.messages.clone()) {
                tracing::warn!(error = %err, profile = %id, "history persist failed");
            }
        }
    }

    async fn maybe_speak(&mut self, text: &str) {
        if !self.sound_enabled {
            return;
        }
        self.speaking = true;
        self.speaker.speak(text).await;
        self.speaking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_core::DESCRIPTOR_DIM;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeReplies {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ReplyGenerator for FakeReplies {
        async fn generate_reply(&self, message: &str, _: &[ChatMessage], _: &[Value]) -> String {
            self.prompts.lock().unwrap().push(message.to_string());
            format!("re: {message}")
        }
    }

    #[derive(Clone)]
    struct FakeVoice {
        turn: VoiceTurn,
    }

    impl VoiceGateway for FakeVoice {
        async fn process_utterance(
            &self,
            _: &UtterancePayload,
            _: &[ChatMessage],
            _: &[Value],
        ) -> VoiceTurn {
            self.turn.clone()
        }
    }

    #[derive(Clone, Default)]
    struct FakeSpeaker {
        spoken: Arc<Mutex<Vec<String>>>,
        stopped: Arc<AtomicBool>,
    }

    impl Speaker for FakeSpeaker {
        async fn speak(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn payload() -> UtterancePayload {
        UtterancePayload {
            base64_wav: "UklGRg==".into(),
            sample_count: 16_000,
            sample_rate: 16_000,
        }
    }

    fn session(
        store: BiometricStore,
        turn: VoiceTurn,
    ) -> (
        ConversationSession<FakeReplies, FakeVoice, FakeSpeaker>,
        FakeReplies,
        FakeSpeaker,
    ) {
        let replies = FakeReplies::default();
        let speaker = FakeSpeaker::default();
        let session = ConversationSession::new(
            store,
            Vec::new(),
            Persona::default(),
            replies.clone(),
            FakeVoice { turn },
            speaker.clone(),
        );
        (session, replies, speaker)
    }

    #[tokio::test]
    async fn test_text_send_appends_user_then_bot() {
        let (mut s, _, speaker) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.send_text("hello there").await;

        assert_eq!(s.messages().len(), 2);
        assert_eq!(s.messages()[0].user_id, "guest");
        assert_eq!(s.messages()[0].text, "hello there");
        assert_eq!(s.messages()[1].user_id, BOT_USER_ID);
        assert_eq!(s.messages()[1].text, "re: hello there");
        assert_eq!(speaker.spoken.lock().unwrap().as_slice(), ["re: hello there"]);
    }

    #[tokio::test]
    async fn test_system_directive_not_appended_as_user_message() {
        let (mut s, replies, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.send_text("System: User Nok logged in via face recognition.")
            .await;

        // Only the bot reply lands in the transcript.
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].user_id, BOT_USER_ID);
        let prompts = replies.prompts.lock().unwrap();
        assert!(prompts[0].contains("has returned"));
        assert!(!prompts[0].starts_with("System:"));
    }

    #[tokio::test]
    async fn test_register_enrolls_and_greets() {
        let (mut s, _, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.register("Nok", vec![0.5; DESCRIPTOR_DIM], "http://a/x.png")
            .await
            .unwrap();

        assert_eq!(s.store().len(), 1);
        let user = s.current_user().unwrap();
        assert_eq!(user.name, "Nok");
        // Greeting exchange: first-time user message plus the reply.
        assert_eq!(s.messages().len(), 2);
        assert!(s.messages()[0].text.contains("Nok"));
        // History mirrored into the store.
        let stored = s.store().profiles()[0].clone();
        assert_eq!(stored.history.len(), 2);
    }

    #[tokio::test]
    async fn test_login_restores_history() {
        let mut store = BiometricStore::in_memory();
        let profile = store.enroll("Nok", vec![0.5; DESCRIPTOR_DIM], "").unwrap();
        let old = vec![
            ChatMessage::new(profile.id.clone(), "Nok", "", "earlier message"),
            ChatMessage::new(BOT_USER_ID, "Event MC", "", "earlier reply"),
        ];
        store.update_history(&profile.id, old).unwrap();

        let (mut s, replies, _) = session(store, VoiceTurn::default());
        s.login(&profile.id).await.unwrap();

        // Two restored + the returning-user greeting reply.
        assert_eq!(s.messages().len(), 3);
        assert_eq!(s.messages()[0].text, "earlier message");
        assert!(replies.prompts.lock().unwrap()[0].contains("Nok has returned"));
    }

    #[tokio::test]
    async fn test_login_unknown_profile_fails() {
        let (mut s, _, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        assert!(matches!(
            s.login("missing").await,
            Err(SessionError::UnknownProfile(_))
        ));
    }

    #[tokio::test]
    async fn test_voice_empty_transcription_appends_only_reply() {
        let turn = VoiceTurn {
            transcription: String::new(),
            reply: "I heard something".into(),
        };
        let (mut s, _, speaker) = session(BiometricStore::in_memory(), turn);
        s.send_voice(&payload()).await;

        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].user_id, BOT_USER_ID);
        assert_eq!(
            speaker.spoken.lock().unwrap().as_slice(),
            ["I heard something"]
        );
    }

    #[tokio::test]
    async fn test_voice_empty_reply_suppresses_bot_message() {
        let turn = VoiceTurn {
            transcription: "hello".into(),
            reply: String::new(),
        };
        let (mut s, _, speaker) = session(BiometricStore::in_memory(), turn);
        s.send_voice(&payload()).await;

        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].text, "hello");
        assert!(speaker.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sound_disabled_suppresses_speech() {
        let (mut s, _, speaker) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.set_sound(false);
        s.send_text("quiet please").await;
        assert_eq!(s.messages().len(), 2);
        assert!(speaker.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabling_sound_stops_playback() {
        let (mut s, _, speaker) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.set_sound(false);
        assert!(speaker.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_logout_keeps_profile_enrolled() {
        let (mut s, _, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.register("Nok", vec![0.5; DESCRIPTOR_DIM], "").await.unwrap();
        s.logout();
        assert!(s.current_user().is_none());
        assert!(s.messages().is_empty());
        assert_eq!(s.store().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_requires_confirmation() {
        let (mut s, _, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.register("Nok", vec![0.5; DESCRIPTOR_DIM], "").await.unwrap();

        assert!(!s.clear_all_users(false).unwrap());
        assert_eq!(s.store().len(), 1);

        assert!(s.clear_all_users(true).unwrap());
        assert_eq!(s.store().len(), 0);
        assert!(s.current_user().is_none());
    }

    #[tokio::test]
    async fn test_history_mirrored_on_every_append() {
        let (mut s, _, _) = session(BiometricStore::in_memory(), VoiceTurn::default());
        s.register("Nok", vec![0.5; DESCRIPTOR_DIM], "").await.unwrap();
        let id = s.current_user().unwrap().id.clone();

        s.send_text("how are you?").await;
        let stored = s.store().find(&id).unwrap();
        assert_eq!(stored.history.len(), s.messages().len());
        assert_eq!(stored.history.last().unwrap().text, "re: how are you?");
    }
}
