use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

use crate::app::{App, InputMode, OnboardField, Screen, UserProfile};
use crate::tui::{AppEvent, ReplyEvent};

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn insert_char(input: &mut String, cursor: &mut usize, c: char) {
    let byte_pos = char_to_byte_index(input, *cursor);
    input.insert(byte_pos, c);
    *cursor += 1;
}

fn delete_back(input: &mut String, cursor: &mut usize) {
    if *cursor > 0 {
        *cursor -= 1;
        let byte_pos = char_to_byte_index(input, *cursor);
        input.remove(byte_pos);
    }
}

fn delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor < input.chars().count() {
        let byte_pos = char_to_byte_index(input, *cursor);
        input.remove(byte_pos);
    }
}

pub async fn handle_event(
    app: &mut App,
    event: AppEvent,
    tx: &UnboundedSender<AppEvent>,
) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, tx).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Reply(reply) => handle_reply(app, reply),
    }
    Ok(())
}

fn handle_reply(app: &mut App, reply: ReplyEvent) {
    match reply {
        ReplyEvent::Fragment(fragment) => app.push_fragment(&fragment),
        ReplyEvent::Completed => {
            if let Some(text) = app.finish_reply() {
                if let Some(session) = app.session.as_mut() {
                    session.record_reply(&text);
                }
            }
        }
        ReplyEvent::Failed => app.fail_reply(),
    }
}

async fn handle_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    match app.screen {
        Screen::Onboarding => handle_onboarding_key(app, key).await,
        Screen::Chatting => handle_chat_key(app, key, tx),
        Screen::Error => handle_error_key(app, key),
    }

    Ok(())
}

async fn handle_onboarding_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.should_quit = true,

        KeyCode::Tab | KeyCode::Down | KeyCode::Up => {
            app.onboard_field = match app.onboard_field {
                OnboardField::Name => OnboardField::Pronouns,
                OnboardField::Pronouns => OnboardField::Name,
            };
        }

        KeyCode::Enter => match app.onboard_field {
            OnboardField::Name => app.onboard_field = OnboardField::Pronouns,
            OnboardField::Pronouns => submit_onboarding(app).await,
        },

        KeyCode::Backspace => {
            let (input, cursor) = onboard_field_mut(app);
            delete_back(input, cursor);
        }
        KeyCode::Delete => {
            let (input, cursor) = onboard_field_mut(app);
            delete_forward(input, cursor);
        }
        KeyCode::Left => {
            let (_, cursor) = onboard_field_mut(app);
            *cursor = cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let (input, cursor) = onboard_field_mut(app);
            *cursor = (*cursor + 1).min(input.chars().count());
        }
        KeyCode::Home => {
            let (_, cursor) = onboard_field_mut(app);
            *cursor = 0;
        }
        KeyCode::End => {
            let (input, cursor) = onboard_field_mut(app);
            *cursor = input.chars().count();
        }
        KeyCode::Char(c) => {
            let (input, cursor) = onboard_field_mut(app);
            insert_char(input, cursor, c);
        }
        _ => {}
    }
}

fn onboard_field_mut(app: &mut App) -> (&mut String, &mut usize) {
    match app.onboard_field {
        OnboardField::Name => (&mut app.name_input, &mut app.name_cursor),
        OnboardField::Pronouns => (&mut app.pronouns_input, &mut app.pronouns_cursor),
    }
}

/// Validates the form and opens the model session. Success enters the chat;
/// a session failure is terminal (the Error screen has no recovery action).
async fn submit_onboarding(app: &mut App) {
    let Some(profile) = UserProfile::from_input(&app.name_input, &app.pronouns_input) else {
        app.onboard_rejected = true;
        return;
    };
    app.onboard_rejected = false;

    match app.gemini.start_session(&profile).await {
        Ok(session) => app.enter_chat(profile, session),
        Err(e) => {
            error!("failed to start chat session: {e:#}");
            app.screen = Screen::Error;
        }
    }
}

fn handle_chat_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) {
    match app.input_mode {
        InputMode::Normal => match key.code {
            KeyCode::Char('q') => app.should_quit = true,
            KeyCode::Char('i') | KeyCode::Char('/') => {
                app.input_mode = InputMode::Editing;
                app.chat_cursor = app.chat_input.chars().count();
            }
            KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
            KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
            KeyCode::Char('g') => app.chat_scroll = 0,
            KeyCode::Char('G') => app.scroll_chat_to_bottom(),
            _ => {}
        },
        InputMode::Editing => match key.code {
            KeyCode::Esc => app.input_mode = InputMode::Normal,
            KeyCode::Enter => send_chat_message(app, tx),
            KeyCode::Backspace => delete_back(&mut app.chat_input, &mut app.chat_cursor),
            KeyCode::Delete => delete_forward(&mut app.chat_input, &mut app.chat_cursor),
            KeyCode::Left => app.chat_cursor = app.chat_cursor.saturating_sub(1),
            KeyCode::Right => {
                app.chat_cursor = (app.chat_cursor + 1).min(app.chat_input.chars().count());
            }
            KeyCode::Home => app.chat_cursor = 0,
            KeyCode::End => app.chat_cursor = app.chat_input.chars().count(),
            KeyCode::Char(c) => insert_char(&mut app.chat_input, &mut app.chat_cursor, c),
            _ => {}
        },
    }
}

fn handle_error_key(app: &mut App, key: KeyEvent) {
    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
        app.should_quit = true;
    }
}

/// Kicks off one send cycle: appends the user and placeholder messages, then
/// spawns a task that drives the reply stream and forwards each fragment back
/// through the event queue so the UI redraws between fragments.
fn send_chat_message(app: &mut App, tx: &UnboundedSender<AppEvent>) {
    let input = app.chat_input.clone();
    let Some(text) = app.begin_send(&input) else {
        return;
    };
    app.chat_input.clear();
    app.chat_cursor = 0;

    let Some(session) = app.session.as_mut() else {
        error!("send attempted without an active session");
        app.fail_reply();
        return;
    };

    // Snapshot the history before recording the new turn; the request carries
    // the turn explicitly, and the reply is recorded only on completion.
    let snapshot = session.clone();
    session.push_user(&text);

    let client = app.gemini.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let mut stream = match client.send_message(&snapshot, &text).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("send failed: {e:#}");
                let _ = tx.send(AppEvent::Reply(ReplyEvent::Failed));
                return;
            }
        };

        loop {
            match stream.next().await {
                Some(Ok(fragment)) => {
                    if tx
                        .send(AppEvent::Reply(ReplyEvent::Fragment(fragment)))
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!("reply stream failed: {e:#}");
                    let _ = tx.send(AppEvent::Reply(ReplyEvent::Failed));
                    return;
                }
                None => {
                    let _ = tx.send(AppEvent::Reply(ReplyEvent::Completed));
                    return;
                }
            }
        }
    });
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if app.screen != Screen::Chatting {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            app.scroll_down();
            app.scroll_down();
            app.scroll_down();
        }
        MouseEventKind::ScrollUp => {
            app.scroll_up();
            app.scroll_up();
            app.scroll_up();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_to_byte_index_handles_multibyte() {
        let s = "héllo";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 1), 1);
        assert_eq!(char_to_byte_index(s, 2), 3);
        assert_eq!(char_to_byte_index(s, 10), s.len());
    }

    #[test]
    fn insert_and_delete_are_utf8_safe() {
        let mut input = "çav".to_string();
        let mut cursor = 2;

        insert_char(&mut input, &mut cursor, 'a');
        assert_eq!(input, "çaav");
        assert_eq!(cursor, 3);

        delete_back(&mut input, &mut cursor);
        assert_eq!(input, "çav");
        assert_eq!(cursor, 2);

        delete_forward(&mut input, &mut cursor);
        assert_eq!(input, "ça");
        assert_eq!(cursor, 2);

        // Deleting at the end is a no-op
        delete_forward(&mut input, &mut cursor);
        assert_eq!(input, "ça");
    }

    #[test]
    fn delete_back_at_start_is_a_no_op() {
        let mut input = "abc".to_string();
        let mut cursor = 0;
        delete_back(&mut input, &mut cursor);
        assert_eq!(input, "abc");
        assert_eq!(cursor, 0);
    }
}
