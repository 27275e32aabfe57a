//! # Conversation Module
//!
//! The bordering dialogue: collects an aspect ratio and a canvas size for an uploaded picture,
//! then runs the compositor and hands back the result.
//!
//! ```text
//! Idle --document--> AwaitingAspect --preset--> AwaitingCanvas --preset--> Idle (picture sent)
//!                          |   ^                      |   ^
//!                       custom |                   custom |
//!                          v   | a/b                  v   | number
//!                   AwaitingCustomAspect        AwaitingCustomCanvas
//! ```
//!
//! `/cancel` leaves any waiting state. A new document restarts the cycle and drops the previous
//! upload. Malformed values re-prompt in the same state, anything else the current state does not
//! expect re-sends that state's prompt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::compositor::compose_with_quality;
use crate::config::RenderSettings;
use crate::dialogue::{
    is_custom_choice, match_preset, parse_aspect_ratio, parse_canvas_size, Choice,
    ConversationState, ASPECT_PRESETS, CANVAS_PRESETS,
};
use crate::errors::{BorderError, InputError};
use crate::events::{Action, Event, EventKind, Keyboard, KeyboardButton};
use crate::image_store::ImageStore;
use crate::localization::{t_args_lang, t_lang};
use crate::session_store::{InMemorySessionStore, Session, SessionStore, UserKey, UserLocks};

const OUTPUT_PREFIX: &str = "brd_";
const BUTTONS_PER_ROW: usize = 3;

/// Drives every user's bordering dialogue
pub struct Conversation<S: SessionStore = InMemorySessionStore> {
    store: Arc<S>,
    images: ImageStore,
    locks: UserLocks,
    render: RenderSettings,
}

/// Reply target of the event being handled
struct Reply {
    chat_id: i64,
    language_code: Option<String>,
}

impl Reply {
    fn lang(&self) -> Option<&str> {
        self.language_code.as_deref()
    }

    fn text(&self, key: &str) -> Action {
        self.send(t_lang(key, self.lang()), None)
    }

    fn send(&self, text: String, keyboard: Option<Keyboard>) -> Action {
        Action::SendText {
            chat_id: self.chat_id,
            text,
            keyboard,
        }
    }

    fn invalid_value(&self, key: &str, value: &str) -> Action {
        self.send(t_args_lang(key, &[("value", value.trim())], self.lang()), None)
    }

    /// The question asked in `state`, with its keyboard
    fn prompt(&self, state: ConversationState) -> Action {
        match state {
            ConversationState::Idle => self.text("send-picture-hint"),
            ConversationState::AwaitingAspect => self.send(
                t_lang("aspect-prompt", self.lang()),
                Some(choice_keyboard(
                    &ASPECT_PRESETS,
                    Choice::Aspect,
                    Choice::CustomAspect,
                    self.lang(),
                )),
            ),
            ConversationState::AwaitingCustomAspect => self.text("custom-aspect-prompt"),
            ConversationState::AwaitingCanvas => self.send(
                t_lang("canvas-prompt", self.lang()),
                Some(choice_keyboard(
                    &CANVAS_PRESETS,
                    Choice::Canvas,
                    Choice::CustomCanvas,
                    self.lang(),
                )),
            ),
            ConversationState::AwaitingCustomCanvas => self.text("custom-canvas-prompt"),
        }
    }

    /// Re-ask the current question after an unexpected message
    fn reprompt(&self, state: ConversationState) -> Action {
        match self.prompt(state) {
            Action::SendText { chat_id, text, keyboard } => Action::SendText {
                chat_id,
                text: format!("{}\n\n{}", t_lang("choose-option", self.lang()), text),
                keyboard,
            },
            other => other,
        }
    }
}

fn choice_keyboard(
    presets: &[&str],
    preset: fn(String) -> Choice,
    custom: Choice,
    language_code: Option<&str>,
) -> Keyboard {
    let mut buttons: Vec<KeyboardButton> = presets
        .iter()
        .map(|label| KeyboardButton {
            label: label.to_string(),
            choice: preset(label.to_string()),
        })
        .collect();
    buttons.push(KeyboardButton {
        label: t_lang("custom-button", language_code),
        choice: custom,
    });

    Keyboard {
        rows: buttons
            .chunks(BUTTONS_PER_ROW)
            .map(|row| row.to_vec())
            .collect(),
    }
}

/// `brd_<upload stem>.jpeg`, or `brd_<user>.jpeg` when the upload had no usable name
fn output_filename(user: UserKey, source_name: Option<&str>) -> String {
    let stem: Option<String> = source_name
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            stem.chars()
                .filter(|c| c.is_alphanumeric() || matches!(*c, '-' | '_' | '.'))
                .collect()
        })
        .filter(|stem: &String| !stem.is_empty());

    match stem {
        Some(stem) => format!("{OUTPUT_PREFIX}{stem}.jpeg"),
        None => format!("{OUTPUT_PREFIX}{user}.jpeg"),
    }
}

impl<S: SessionStore> Conversation<S> {
    pub fn new(store: Arc<S>, images: ImageStore, render: RenderSettings) -> Self {
        Self {
            store,
            images,
            locks: UserLocks::new(),
            render,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Current state of `user`'s dialogue
    pub async fn state_of(&self, user: UserKey) -> ConversationState {
        self.store
            .get(user)
            .await
            .map(|session| session.state)
            .unwrap_or_default()
    }

    /// Apply one event and return what to send back
    ///
    /// Events of one user are handled one at a time; other users are not held up.
    pub async fn handle(&self, event: Event) -> Vec<Action> {
        let user = event.user_id;
        let guard = self.locks.acquire(user).await;
        let actions = self.dispatch(user, event).await;
        self.locks.release(user, guard);
        actions
    }

    async fn dispatch(&self, user: UserKey, event: Event) -> Vec<Action> {
        let session = self.store.get(user).await;
        let reply = Reply {
            chat_id: event.chat_id,
            language_code: event
                .language_code
                .or_else(|| session.as_ref().and_then(|s| s.language_code.clone())),
        };
        debug!(
            user_id = user,
            state = ?session.as_ref().map(|s| s.state).unwrap_or_default(),
            "Handling event"
        );

        match event.kind {
            EventKind::Document { bytes, file_name } => {
                self.on_document(user, &reply, session, &bytes, file_name)
                    .await
            }
            EventKind::Command { name, args } => {
                self.on_command(user, &reply, session, &name, &args).await
            }
            EventKind::Text { text } => self.on_text(user, &reply, session, &text).await,
            EventKind::Button { data, message_id } => {
                self.on_button(user, &reply, session, &data, message_id)
                    .await
            }
        }
    }

    async fn on_document(
        &self,
        user: UserKey,
        reply: &Reply,
        previous: Option<Session>,
        bytes: &[u8],
        file_name: Option<String>,
    ) -> Vec<Action> {
        if let Some(previous) = previous {
            info!(user_id = user, "New picture replaces the pending one");
            self.end_session(user, &previous).await;
        }

        let path = match self.images.save(user, bytes) {
            Ok(path) => path,
            Err(e) => {
                error!(user_id = user, error = %e, "Failed to store uploaded picture");
                return vec![reply.text("processing-failed")];
            }
        };

        let mut session = Session::new(reply.chat_id, path);
        session.source_name = file_name;
        session.language_code = reply.language_code.clone();
        self.store.set(user, session).await;

        info!(user_id = user, size = bytes.len(), "Picture received");
        vec![reply.prompt(ConversationState::AwaitingAspect)]
    }

    async fn on_command(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Option<Session>,
        name: &str,
        args: &[String],
    ) -> Vec<Action> {
        match name {
            "cancel" => match session {
                Some(session) => {
                    self.end_session(user, &session).await;
                    info!(user_id = user, "User cancelled the conversation");
                    vec![reply.text("cancelled")]
                }
                None => vec![reply.text("nothing-to-cancel")],
            },
            "start" => vec![reply.text("welcome")],
            "help" => vec![reply.text("help")],
            "custom" => self.on_custom_command(user, reply, session, args).await,
            _ => self.unmatched(user, reply, session.as_ref()),
        }
    }

    /// `/custom A B C`: border the pending picture in one go
    async fn on_custom_command(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Option<Session>,
        args: &[String],
    ) -> Vec<Action> {
        let Some(mut session) = session else {
            return vec![reply.text("picture-first")];
        };

        let [width, height, canvas] = args else {
            return vec![reply.text("custom-incorrect-args")];
        };

        let parsed = parse_aspect_ratio(&format!("{width}/{height}"))
            .and_then(|aspect| parse_canvas_size(canvas).map(|canvas| (aspect, canvas)));
        match parsed {
            Ok((aspect_ratio, canvas_size)) => {
                session.aspect_ratio = Some(aspect_ratio);
                self.finish(user, reply, session, canvas_size, None).await
            }
            Err(InputError::OutOfRange { .. }) => vec![reply.text("custom-extreme-values")],
            Err(_) => vec![reply.text("custom-incorrect-args")],
        }
    }

    async fn on_text(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Option<Session>,
        text: &str,
    ) -> Vec<Action> {
        let Some(session) = session else {
            return vec![reply.text("send-picture-hint")];
        };

        match session.state {
            ConversationState::AwaitingAspect => {
                if let Some(preset) = match_preset(text, &ASPECT_PRESETS) {
                    self.choose_aspect(user, reply, session, preset).await
                } else if is_custom_choice(text) {
                    self.advance(user, reply, session, ConversationState::AwaitingCustomAspect)
                        .await
                } else {
                    self.unmatched(user, reply, Some(&session))
                }
            }
            ConversationState::AwaitingCustomAspect => match parse_aspect_ratio(text) {
                Ok(aspect_ratio) => self.set_aspect(user, reply, session, aspect_ratio).await,
                Err(e) => {
                    debug!(user_id = user, error = %e, "Rejected custom aspect ratio");
                    vec![reply.invalid_value("invalid-aspect", text)]
                }
            },
            ConversationState::AwaitingCanvas => {
                if let Some(preset) = match_preset(text, &CANVAS_PRESETS) {
                    self.choose_canvas(user, reply, session, preset, None).await
                } else if is_custom_choice(text) {
                    self.advance(user, reply, session, ConversationState::AwaitingCustomCanvas)
                        .await
                } else {
                    self.unmatched(user, reply, Some(&session))
                }
            }
            ConversationState::AwaitingCustomCanvas => match parse_canvas_size(text) {
                Ok(canvas_size) => self.finish(user, reply, session, canvas_size, None).await,
                Err(e) => {
                    debug!(user_id = user, error = %e, "Rejected custom canvas size");
                    vec![reply.invalid_value("invalid-canvas", text)]
                }
            },
            ConversationState::Idle => vec![reply.text("send-picture-hint")],
        }
    }

    async fn on_button(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Option<Session>,
        data: &str,
        message_id: Option<i32>,
    ) -> Vec<Action> {
        let Some(session) = session else {
            return vec![reply.text("picture-first")];
        };

        match (session.state, Choice::from_data(data)) {
            (ConversationState::AwaitingAspect, Some(Choice::Aspect(value))) => {
                self.choose_aspect(user, reply, session, &value).await
            }
            (ConversationState::AwaitingAspect, Some(Choice::CustomAspect)) => {
                self.advance(user, reply, session, ConversationState::AwaitingCustomAspect)
                    .await
            }
            (ConversationState::AwaitingCanvas, Some(Choice::Canvas(value))) => {
                self.choose_canvas(user, reply, session, &value, message_id)
                    .await
            }
            (ConversationState::AwaitingCanvas, Some(Choice::CustomCanvas)) => {
                self.advance(user, reply, session, ConversationState::AwaitingCustomCanvas)
                    .await
            }
            _ => self.unmatched(user, reply, Some(&session)),
        }
    }

    async fn choose_aspect(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Session,
        value: &str,
    ) -> Vec<Action> {
        match parse_aspect_ratio(value) {
            Ok(aspect_ratio) => self.set_aspect(user, reply, session, aspect_ratio).await,
            Err(e) => {
                warn!(user_id = user, error = %e, "Preset aspect ratio rejected");
                self.unmatched(user, reply, Some(&session))
            }
        }
    }

    async fn choose_canvas(
        &self,
        user: UserKey,
        reply: &Reply,
        session: Session,
        value: &str,
        message_id: Option<i32>,
    ) -> Vec<Action> {
        match parse_canvas_size(value) {
            Ok(canvas_size) => {
                self.finish(user, reply, session, canvas_size, message_id)
                    .await
            }
            Err(e) => {
                warn!(user_id = user, error = %e, "Preset canvas size rejected");
                self.unmatched(user, reply, Some(&session))
            }
        }
    }

    async fn set_aspect(
        &self,
        user: UserKey,
        reply: &Reply,
        mut session: Session,
        aspect_ratio: f64,
    ) -> Vec<Action> {
        debug!(user_id = user, aspect_ratio, "Aspect ratio selected");
        session.aspect_ratio = Some(aspect_ratio);
        self.advance(user, reply, session, ConversationState::AwaitingCanvas)
            .await
    }

    async fn advance(
        &self,
        user: UserKey,
        reply: &Reply,
        mut session: Session,
        next: ConversationState,
    ) -> Vec<Action> {
        debug!(user_id = user, from = ?session.state, to = ?next, "Transition");
        session.state = next;
        self.store.set(user, session).await;
        vec![reply.prompt(next)]
    }

    fn unmatched(&self, user: UserKey, reply: &Reply, session: Option<&Session>) -> Vec<Action> {
        match session {
            Some(session) => {
                debug!(user_id = user, state = ?session.state, "Unexpected message, asking again");
                vec![reply.reprompt(session.state)]
            }
            None => vec![reply.text("send-picture-hint")],
        }
    }

    /// Run the compositor and deliver the result
    ///
    /// The session ends unless the pending picture could not be read; the user is then asked the
    /// current question again, since the edited prompt lost its keyboard.
    async fn finish(
        &self,
        user: UserKey,
        reply: &Reply,
        mut session: Session,
        canvas_size: f64,
        message_id: Option<i32>,
    ) -> Vec<Action> {
        let Some(aspect_ratio) = session.aspect_ratio else {
            warn!(user_id = user, "Canvas size chosen before aspect ratio");
            return self.unmatched(user, reply, Some(&session));
        };
        session.canvas_size = Some(canvas_size);

        let mut actions = Vec::new();
        if let Some(message_id) = message_id {
            actions.push(Action::EditMessage {
                chat_id: reply.chat_id,
                message_id,
                text: t_lang("working", reply.lang()),
            });
        }

        match self.render(&session.pending_image, aspect_ratio, canvas_size).await {
            Ok(bytes) => {
                info!(
                    user_id = user,
                    aspect_ratio,
                    canvas_size,
                    output_size = bytes.len(),
                    "Bordered picture delivered"
                );
                actions.push(Action::SendDocument {
                    chat_id: reply.chat_id,
                    bytes,
                    filename: output_filename(user, session.source_name.as_deref()),
                });
                self.end_session(user, &session).await;
            }
            Err(BorderError::Storage(e)) => {
                error!(user_id = user, error = %e, "Pending picture unavailable");
                actions.push(reply.text("processing-failed"));
                actions.push(reply.prompt(session.state));
            }
            Err(BorderError::Decode(e)) => {
                warn!(user_id = user, error = %e, "No decodable pending picture");
                actions.push(reply.text("picture-first"));
                self.end_session(user, &session).await;
            }
            Err(e) => {
                error!(user_id = user, error = %e, "Bordering failed");
                actions.push(reply.text("processing-failed"));
                self.end_session(user, &session).await;
            }
        }

        actions
    }

    async fn render(
        &self,
        path: &Path,
        aspect_ratio: f64,
        canvas_size: f64,
    ) -> Result<Vec<u8>, BorderError> {
        let raw = self.images.read(path).await.map_err(|e| {
            if e.is_not_found() {
                BorderError::Decode(e.to_string())
            } else {
                BorderError::Storage(e)
            }
        })?;
        let render = self.render;

        let bytes = tokio::task::spawn_blocking(move || {
            compose_with_quality(
                &raw,
                aspect_ratio,
                canvas_size,
                render.background,
                render.jpeg_quality,
            )
        })
        .await
        .map_err(|e| BorderError::Compose(format!("compositor task failed: {e}")))??;

        Ok(bytes)
    }

    /// Forget the session and delete its pending picture
    async fn end_session(&self, user: UserKey, session: &Session) {
        self.store.delete(user).await;
        self.images.discard(&session.pending_image);
    }

    /// Drop sessions older than `ttl`, returning the notices for their users
    pub async fn reap_expired(&self, ttl: Duration) -> Vec<Action> {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        for user in self.store.expired(cutoff) {
            let guard = self.locks.acquire(user).await;
            // The user may have finished or restarted while we waited
            let Some(session) = self
                .store
                .get(user)
                .await
                .filter(|s| s.created_at < cutoff)
            else {
                self.locks.release(user, guard);
                continue;
            };

            info!(user_id = user, state = ?session.state, "Session expired");
            self.end_session(user, &session).await;
            self.locks.release(user, guard);
            actions.push(Action::SendText {
                chat_id: session.chat_id,
                text: t_lang("session-expired", session.language_code.as_deref()),
                keyboard: None,
            });
        }

        let pruned = self.locks.prune();
        if pruned > 0 {
            debug!(pruned, "Pruned idle user locks");
        }
        actions
    }
}
