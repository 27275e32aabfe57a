//! # Conversation Tests
//!
//! Drives the bordering dialogue end to end with real temporary files and synthetic pictures.

use anyhow::Result;
use borderify::config::RenderSettings;
use borderify::conversation::Conversation;
use borderify::dialogue::{Choice, ConversationState};
use borderify::events::{Action, Event, EventKind};
use borderify::image_store::ImageStore;
use borderify::session_store::{InMemorySessionStore, SessionStore};
use chrono::Utc;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const USER: u64 = 1001;
const CHAT: i64 = 2002;

fn setup() -> (TempDir, Conversation) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let conversation = Conversation::new(
        Arc::new(InMemorySessionStore::new()),
        ImageStore::new(dir.path()),
        RenderSettings::default(),
    );
    (dir, conversation)
}

fn picture(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([30, 90, 160]));
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .expect("PNG encoding should succeed");
    cursor.into_inner()
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

fn texts(actions: &[Action]) -> Vec<&str> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::SendText { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn documents(actions: &[Action]) -> Vec<(&[u8], &str)> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::SendDocument {
                bytes, filename, ..
            } => Some((bytes.as_slice(), filename.as_str())),
            _ => None,
        })
        .collect()
}

fn aspect_button(value: &str) -> Event {
    Event::button(USER, CHAT, Choice::Aspect(value.to_string()).to_data())
}

fn canvas_button(value: &str) -> Event {
    Event::button(USER, CHAT, Choice::Canvas(value.to_string()).to_data())
}

async fn upload(conversation: &Conversation, width: u32, height: u32) -> Vec<Action> {
    conversation
        .handle(Event::document(USER, CHAT, picture(width, height)))
        .await
}

/// A document from idle opens a session waiting for the aspect ratio
#[tokio::test]
async fn test_document_starts_conversation() -> Result<()> {
    let (dir, conversation) = setup();
    assert_eq!(conversation.state_of(USER).await, ConversationState::Idle);

    let actions = upload(&conversation, 40, 20).await;

    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);
    assert_eq!(file_count(dir.path()), 1);
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        Action::SendText {
            chat_id,
            text,
            keyboard: Some(keyboard),
        } => {
            assert_eq!(*chat_id, CHAT);
            assert!(text.contains("aspect ratio"));
            let choices: Vec<_> = keyboard.buttons().map(|b| b.choice.clone()).collect();
            assert_eq!(choices.len(), 7);
            assert!(choices.contains(&Choice::Aspect("9/19".to_string())));
            assert!(choices.contains(&Choice::CustomAspect));
        }
        other => panic!("Unexpected action: {other:?}"),
    }
    Ok(())
}

/// Upload, preset 1/1, preset 1: one document, no session, no files left
#[tokio::test]
async fn test_preset_flow_end_to_end() -> Result<()> {
    let (dir, conversation) = setup();
    upload(&conversation, 40, 20).await;

    let actions = conversation.handle(aspect_button("1/1")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingCanvas);
    assert_eq!(conversation.store().get(USER).await.unwrap().aspect_ratio, Some(1.0));
    assert!(texts(&actions)[0].contains("canvas"));

    let actions = conversation.handle(canvas_button("1")).await;
    let docs = documents(&actions);
    assert_eq!(docs.len(), 1);
    assert_eq!(actions.len(), 1);
    assert_eq!(docs[0].1, format!("brd_{USER}.jpeg"));

    let output = image::load_from_memory(docs[0].0)?;
    assert_eq!(output.dimensions(), (40, 40));

    assert!(conversation.store().is_empty());
    assert_eq!(conversation.state_of(USER).await, ConversationState::Idle);
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

/// Pressing a canvas button first edits the keyboard message
#[tokio::test]
async fn test_canvas_button_edits_prompt_message() -> Result<()> {
    let (_dir, conversation) = setup();
    conversation
        .handle(Event::new(
            USER,
            CHAT,
            EventKind::Document {
                bytes: picture(30, 60),
                file_name: Some("beach.png".to_string()),
            },
        ))
        .await;
    conversation.handle(aspect_button("4/5")).await;

    let actions = conversation
        .handle(Event::new(
            USER,
            CHAT,
            EventKind::Button {
                data: Choice::Canvas("1.1".to_string()).to_data(),
                message_id: Some(77),
            },
        ))
        .await;

    assert_eq!(actions.len(), 2);
    assert!(matches!(
        &actions[0],
        Action::EditMessage { chat_id: CHAT, message_id: 77, text } if text.contains("second")
    ));
    assert_eq!(documents(&actions)[0].1, "brd_beach.jpeg");
    Ok(())
}

/// Typing a preset label works like pressing its button
#[tokio::test]
async fn test_typed_presets() -> Result<()> {
    let (dir, conversation) = setup();
    upload(&conversation, 50, 50).await;

    conversation.handle(Event::text(USER, CHAT, "16/9")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingCanvas);

    let actions = conversation.handle(Event::text(USER, CHAT, "1.05")).await;
    assert_eq!(documents(&actions).len(), 1);
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

/// "9/1" is refused and re-prompted, "3/2" is accepted
#[tokio::test]
async fn test_custom_aspect_entry() -> Result<()> {
    let (_dir, conversation) = setup();
    upload(&conversation, 40, 20).await;

    let actions = conversation
        .handle(Event::button(USER, CHAT, Choice::CustomAspect.to_data()))
        .await;
    assert_eq!(
        conversation.state_of(USER).await,
        ConversationState::AwaitingCustomAspect
    );
    assert!(texts(&actions)[0].contains("3/2"));

    for bad in ["9/1", "0/4", "abc", "1.5/1", "__import__('os')"] {
        let actions = conversation.handle(Event::text(USER, CHAT, bad)).await;
        assert_eq!(
            conversation.state_of(USER).await,
            ConversationState::AwaitingCustomAspect,
            "{bad}"
        );
        assert_eq!(actions.len(), 1);
        assert!(texts(&actions)[0].contains("not a usable aspect ratio"));
    }

    conversation.handle(Event::text(USER, CHAT, "3/2")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingCanvas);
    assert_eq!(conversation.store().get(USER).await.unwrap().aspect_ratio, Some(1.5));
    Ok(())
}

/// "3.5" is refused, "1.1" fires the compositor exactly once
#[tokio::test]
async fn test_custom_canvas_entry() -> Result<()> {
    let (dir, conversation) = setup();
    upload(&conversation, 40, 20).await;
    conversation.handle(aspect_button("4/5")).await;

    conversation
        .handle(Event::text(USER, CHAT, "custom"))
        .await;
    assert_eq!(
        conversation.state_of(USER).await,
        ConversationState::AwaitingCustomCanvas
    );

    let actions = conversation.handle(Event::text(USER, CHAT, "3.5")).await;
    assert!(documents(&actions).is_empty());
    assert!(texts(&actions)[0].contains("not a usable canvas size"));
    assert_eq!(
        conversation.state_of(USER).await,
        ConversationState::AwaitingCustomCanvas
    );

    let actions = conversation.handle(Event::text(USER, CHAT, "1.1")).await;
    assert_eq!(documents(&actions).len(), 1);
    assert!(conversation.store().get(USER).await.is_none());
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

/// Cancel from every waiting state returns to idle and deletes the upload
#[tokio::test]
async fn test_cancel_from_every_state() -> Result<()> {
    let steps: Vec<Vec<Event>> = vec![
        vec![],
        vec![Event::button(USER, CHAT, Choice::CustomAspect.to_data())],
        vec![aspect_button("1/1")],
        vec![
            aspect_button("1/1"),
            Event::button(USER, CHAT, Choice::CustomCanvas.to_data()),
        ],
    ];

    for events in steps {
        let (dir, conversation) = setup();
        upload(&conversation, 20, 20).await;
        for event in events {
            conversation.handle(event).await;
        }
        let state = conversation.state_of(USER).await;
        assert!(!state.is_idle());

        let actions = conversation.handle(Event::command(USER, CHAT, "cancel")).await;
        assert_eq!(conversation.state_of(USER).await, ConversationState::Idle, "{state:?}");
        assert!(conversation.store().is_empty());
        assert_eq!(file_count(dir.path()), 0);
        assert!(texts(&actions)[0].contains("Bye"));
    }
    Ok(())
}

#[tokio::test]
async fn test_cancel_when_idle() -> Result<()> {
    let (_dir, conversation) = setup();
    let actions = conversation.handle(Event::command(USER, CHAT, "cancel")).await;
    assert_eq!(texts(&actions), vec!["There is nothing to cancel."]);
    assert!(conversation.store().is_empty());
    Ok(())
}

/// A second upload replaces the first one
#[tokio::test]
async fn test_new_document_restarts_cycle() -> Result<()> {
    let (dir, conversation) = setup();
    upload(&conversation, 20, 20).await;
    let first = conversation.store().get(USER).await.unwrap().pending_image;
    conversation.handle(aspect_button("1/1")).await;

    upload(&conversation, 30, 30).await;
    let session = conversation.store().get(USER).await.unwrap();
    assert_eq!(session.state, ConversationState::AwaitingAspect);
    assert_eq!(session.aspect_ratio, None);
    assert_ne!(session.pending_image, first);
    assert!(!first.exists());
    assert_eq!(file_count(dir.path()), 1);
    Ok(())
}

/// Unexpected input repeats the current question without changing state
#[tokio::test]
async fn test_unmatched_input_reprompts() -> Result<()> {
    let (_dir, conversation) = setup();
    upload(&conversation, 20, 20).await;

    let actions = conversation.handle(Event::text(USER, CHAT, "hello")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);
    match &actions[..] {
        [Action::SendText {
            text,
            keyboard: Some(_),
            ..
        }] => {
            assert!(text.contains("pick one of the options"));
            assert!(text.contains("aspect ratio"));
        }
        other => panic!("Unexpected actions: {other:?}"),
    }

    // A stale canvas button while choosing the aspect ratio
    conversation.handle(canvas_button("1.1")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);

    // Tampered payload
    conversation.handle(aspect_button("50/1")).await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);
    Ok(())
}

#[tokio::test]
async fn test_idle_messages() -> Result<()> {
    let (_dir, conversation) = setup();

    let actions = conversation.handle(Event::text(USER, CHAT, "hi")).await;
    assert!(texts(&actions)[0].contains("Send me a picture"));

    let actions = conversation.handle(aspect_button("1/1")).await;
    assert_eq!(texts(&actions), vec!["You need to send me a picture first."]);

    let actions = conversation.handle(Event::command(USER, CHAT, "start")).await;
    assert!(texts(&actions)[0].starts_with("Hello!"));

    assert!(conversation.store().is_empty());
    Ok(())
}

/// A document that is not a picture fails at bordering time and ends the session
#[tokio::test]
async fn test_undecodable_document() -> Result<()> {
    let (dir, conversation) = setup();
    let actions = conversation
        .handle(Event::document(USER, CHAT, b"%PDF-1.4 not a picture".to_vec()))
        .await;
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);
    assert_eq!(actions.len(), 1);

    conversation.handle(aspect_button("1/1")).await;
    let actions = conversation.handle(canvas_button("1")).await;

    assert!(documents(&actions).is_empty());
    assert_eq!(texts(&actions), vec!["You need to send me a picture first."]);
    assert!(conversation.store().is_empty());
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

/// A vanished pending file counts as no picture: the session ends
#[tokio::test]
async fn test_missing_pending_file() -> Result<()> {
    let (_dir, conversation) = setup();
    upload(&conversation, 20, 20).await;
    conversation.handle(aspect_button("1/1")).await;

    let pending = conversation.store().get(USER).await.unwrap().pending_image;
    std::fs::remove_file(&pending)?;

    let actions = conversation.handle(canvas_button("1")).await;
    assert!(documents(&actions).is_empty());
    assert_eq!(texts(&actions), vec!["You need to send me a picture first."]);
    assert_eq!(conversation.state_of(USER).await, ConversationState::Idle);
    assert!(conversation.store().is_empty());

    // A second press finds no session at all
    let actions = conversation.handle(canvas_button("1")).await;
    assert_eq!(texts(&actions), vec!["You need to send me a picture first."]);
    Ok(())
}

/// An unreadable pending file keeps the session and asks the question again with its keyboard
#[tokio::test]
async fn test_unreadable_pending_file_reprompts() -> Result<()> {
    let (_dir, conversation) = setup();
    upload(&conversation, 20, 20).await;
    conversation.handle(aspect_button("1/1")).await;

    // Reading a directory fails with something other than "not found"
    let pending = conversation.store().get(USER).await.unwrap().pending_image;
    std::fs::remove_file(&pending)?;
    std::fs::create_dir(&pending)?;

    let actions = conversation
        .handle(Event::new(
            USER,
            CHAT,
            EventKind::Button {
                data: Choice::Canvas("1".to_string()).to_data(),
                message_id: Some(12),
            },
        ))
        .await;

    assert!(matches!(&actions[0], Action::EditMessage { message_id: 12, .. }));
    assert!(documents(&actions).is_empty());
    assert!(texts(&actions)[0].contains("Something went wrong"));
    match actions.last() {
        Some(Action::SendText {
            text,
            keyboard: Some(keyboard),
            ..
        }) => {
            assert!(text.contains("canvas"));
            assert!(keyboard.buttons().any(|b| b.choice == Choice::CustomCanvas));
        }
        other => panic!("Unexpected action: {other:?}"),
    }
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingCanvas);

    // Cancelling still works
    conversation.handle(Event::command(USER, CHAT, "cancel")).await;
    assert!(conversation.store().is_empty());
    Ok(())
}

fn custom_command(args: &[&str]) -> Event {
    Event::new(
        USER,
        CHAT,
        EventKind::Command {
            name: "custom".to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        },
    )
}

/// `/custom A B C` borders the pending picture directly
#[tokio::test]
async fn test_custom_command() -> Result<()> {
    let (dir, conversation) = setup();

    let actions = conversation.handle(custom_command(&["3", "2", "1.1"])).await;
    assert_eq!(texts(&actions), vec!["You need to send me a picture first."]);

    upload(&conversation, 60, 40).await;

    let actions = conversation.handle(custom_command(&["3", "2"])).await;
    assert_eq!(texts(&actions), vec!["Incorrect arguments. Try again."]);
    let actions = conversation.handle(custom_command(&["3", "0", "1"])).await;
    assert_eq!(texts(&actions), vec!["Incorrect arguments. Try again."]);
    let actions = conversation.handle(custom_command(&["9", "1", "1"])).await;
    assert_eq!(texts(&actions), vec!["Too extreme values. Try again."]);
    let actions = conversation.handle(custom_command(&["3", "2", "4"])).await;
    assert_eq!(texts(&actions), vec!["Too extreme values. Try again."]);
    assert_eq!(conversation.state_of(USER).await, ConversationState::AwaitingAspect);

    let actions = conversation.handle(custom_command(&["3", "2", "1.1"])).await;
    let docs = documents(&actions);
    assert_eq!(docs.len(), 1);
    let output = image::load_from_memory(docs[0].0)?;
    // 60x40 is already 3:2, width 66 binds
    assert_eq!(output.dimensions(), (66, 44));
    assert!(conversation.store().is_empty());
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

/// Abandoned sessions are dropped along with their uploads
#[tokio::test]
async fn test_reap_expired_sessions() -> Result<()> {
    let (dir, conversation) = setup();
    upload(&conversation, 20, 20).await;
    conversation
        .handle(Event::document(USER + 1, CHAT + 1, picture(10, 10)))
        .await;

    let mut stale = conversation.store().get(USER).await.unwrap();
    stale.created_at = Utc::now() - chrono::Duration::hours(3);
    conversation.store().set(USER, stale).await;

    let notices = conversation.reap_expired(Duration::from_secs(3600)).await;
    assert_eq!(notices.len(), 1);
    assert!(matches!(&notices[0], Action::SendText { chat_id: CHAT, .. }));

    assert!(conversation.store().get(USER).await.is_none());
    assert!(conversation.store().get(USER + 1).await.is_some());
    assert_eq!(file_count(dir.path()), 1);
    Ok(())
}

/// Users do not share sessions and can be served concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_users() -> Result<()> {
    let (dir, conversation) = setup();
    let conversation = Arc::new(conversation);

    let mut tasks = Vec::new();
    for user in 0..8u64 {
        let conversation = Arc::clone(&conversation);
        tasks.push(tokio::spawn(async move {
            let chat = user as i64;
            conversation
                .handle(Event::document(user, chat, picture(20 + user as u32, 20)))
                .await;
            conversation
                .handle(Event::button(user, chat, Choice::Aspect("4/5".to_string()).to_data()))
                .await;
            conversation
                .handle(Event::button(user, chat, Choice::Canvas("1.2".to_string()).to_data()))
                .await
        }));
    }

    for task in tasks {
        let actions = task.await?;
        assert_eq!(documents(&actions).len(), 1);
    }
    assert!(conversation.store().is_empty());
    assert_eq!(file_count(dir.path()), 0);
    Ok(())
}

#[tokio::test]
async fn test_replies_follow_user_language() -> Result<()> {
    let (_dir, conversation) = setup();
    let actions = conversation
        .handle(Event::document(USER, CHAT, picture(10, 10)).with_language(Some("fr-FR".to_string())))
        .await;
    assert_eq!(texts(&actions), vec!["Quel format souhaitez-vous ?"]);

    // Later events without a language reuse the session's
    let actions = conversation.handle(Event::text(USER, CHAT, "1/9")).await;
    assert!(texts(&actions)[0].starts_with("Choisissez"));
    Ok(())
}
