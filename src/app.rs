use crate::gemini::{ChatSession, GeminiClient};

/// Shown in place of the reply when a send fails mid-stream. Any partial
/// text already accumulated is discarded, never mixed with the fallback.
pub const FALLBACK_REPLY: &str = "(Ana semble distraite...)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Onboarding,
    Chatting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardField {
    Name,
    Pronouns,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub pronouns: String,
}

impl UserProfile {
    /// Accepts any two fields that are non-empty after trimming. No length
    /// limits, no character restrictions.
    pub fn from_input(name: &str, pronouns: &str) -> Option<Self> {
        let name = name.trim();
        let pronouns = pronouns.trim();
        if name.is_empty() || pronouns.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            pronouns: pronouns.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: u64,
    pub role: ChatRole,
    pub text: String,
    pub streaming: bool,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,

    // Onboarding form state
    pub onboard_field: OnboardField,
    pub name_input: String,
    pub name_cursor: usize,
    pub pronouns_input: String,
    pub pronouns_cursor: usize,
    pub onboard_rejected: bool,

    // Session state
    pub profile: Option<UserProfile>,
    pub session: Option<ChatSession>,
    pub messages: Vec<ChatMessage>,
    pub is_processing: bool,
    next_message_id: u64,

    // Composer state
    pub chat_input: String,
    pub chat_cursor: usize,

    // Chat log view state
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model client
    pub gemini: GeminiClient,
}

impl App {
    pub fn new(gemini: GeminiClient) -> Self {
        Self {
            should_quit: false,
            screen: Screen::Onboarding,
            input_mode: InputMode::Editing,

            onboard_field: OnboardField::Name,
            name_input: String::new(),
            name_cursor: 0,
            pronouns_input: String::new(),
            pronouns_cursor: 0,
            onboard_rejected: false,

            profile: None,
            session: None,
            messages: Vec::new(),
            is_processing: false,
            next_message_id: 0,

            chat_input: String::new(),
            chat_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            gemini,
        }
    }

    fn alloc_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    /// Completes onboarding: the profile is set exactly once, before any
    /// message exists, and the session handle it produced is owned here.
    pub fn enter_chat(&mut self, profile: UserProfile, session: ChatSession) {
        self.profile = Some(profile);
        self.session = Some(session);
        self.screen = Screen::Chatting;
        self.input_mode = InputMode::Editing;
    }

    /// Starts a send cycle. Rejects empty or whitespace-only input and sends
    /// attempted while one is already in flight; on accept, appends the user
    /// message and the streaming placeholder and returns the trimmed text.
    pub fn begin_send(&mut self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.is_processing {
            return None;
        }

        let user_id = self.alloc_message_id();
        self.messages.push(ChatMessage {
            id: user_id,
            role: ChatRole::User,
            text: trimmed.to_string(),
            streaming: false,
        });

        let reply_id = self.alloc_message_id();
        self.messages.push(ChatMessage {
            id: reply_id,
            role: ChatRole::Assistant,
            text: String::new(),
            streaming: true,
        });

        self.is_processing = true;
        self.scroll_chat_to_bottom();
        Some(trimmed.to_string())
    }

    fn streaming_message_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().rev().find(|m| m.streaming)
    }

    /// Folds one fragment into the in-flight reply.
    pub fn push_fragment(&mut self, fragment: &str) {
        if let Some(msg) = self.streaming_message_mut() {
            msg.text.push_str(fragment);
        }
        self.scroll_chat_to_bottom();
    }

    /// Ends the send cycle on success: the reply keeps the full concatenation
    /// (possibly empty, which is not an error). Returns the final text so the
    /// caller can record it into the session history.
    pub fn finish_reply(&mut self) -> Option<String> {
        let text = self.streaming_message_mut().map(|msg| {
            msg.streaming = false;
            msg.text.clone()
        });
        self.end_send_cycle();
        text
    }

    /// Ends the send cycle on failure: the whole reply is replaced by the
    /// fixed fallback string, regardless of how much had streamed in.
    pub fn fail_reply(&mut self) {
        if let Some(msg) = self.streaming_message_mut() {
            msg.text = FALLBACK_REPLY.to_string();
            msg.streaming = false;
        }
        self.end_send_cycle();
    }

    fn end_send_cycle(&mut self) {
        self.is_processing = false;
        // Return focus to the composer, exactly once per cycle.
        self.input_mode = InputMode::Editing;
        self.scroll_chat_to_bottom();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_processing {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
    }

    /// Pins the chat view to the latest content so each fragment is visible
    /// as it arrives.
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.messages {
            total_lines += 1; // Role line ("You:" or "Ana:")
            for line in msg.text.lines() {
                // Character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            if msg.streaming {
                total_lines += 1; // Typing indicator line
            }
            total_lines += 1; // Blank line after message
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_app() -> App {
        App::new(GeminiClient::new(&Config::new()))
    }

    #[test]
    fn onboarding_accepts_non_empty_fields() {
        let profile = UserProfile::from_input("Alex", "they/them").unwrap();
        assert_eq!(profile.name, "Alex");
        assert_eq!(profile.pronouns, "they/them");
    }

    #[test]
    fn onboarding_trims_fields() {
        let profile = UserProfile::from_input("  Alex  ", " elle ").unwrap();
        assert_eq!(profile.name, "Alex");
        assert_eq!(profile.pronouns, "elle");
    }

    #[test]
    fn onboarding_rejects_empty_or_whitespace() {
        assert!(UserProfile::from_input("", "they/them").is_none());
        assert!(UserProfile::from_input("  ", "she/her").is_none());
        assert!(UserProfile::from_input("Alex", "").is_none());
        assert!(UserProfile::from_input("Alex", "   ").is_none());
    }

    #[test]
    fn send_appends_user_message_and_streaming_placeholder() {
        let mut app = test_app();
        let sent = app.begin_send("  Hello  ").unwrap();

        assert_eq!(sent, "Hello");
        assert_eq!(app.messages.len(), 2);
        assert_eq!(app.messages[0].role, ChatRole::User);
        assert_eq!(app.messages[0].text, "Hello");
        assert!(!app.messages[0].streaming);
        assert_eq!(app.messages[1].role, ChatRole::Assistant);
        assert_eq!(app.messages[1].text, "");
        assert!(app.messages[1].streaming);
        assert!(app.is_processing);
    }

    #[test]
    fn send_rejects_blank_input() {
        let mut app = test_app();
        assert!(app.begin_send("").is_none());
        assert!(app.begin_send("   ").is_none());
        assert!(app.messages.is_empty());
        assert!(!app.is_processing);
    }

    #[test]
    fn second_send_while_processing_is_a_no_op() {
        let mut app = test_app();
        app.begin_send("first").unwrap();
        assert!(app.begin_send("second").is_none());
        assert_eq!(app.messages.len(), 2);
    }

    #[test]
    fn reply_is_concatenation_of_fragments() {
        let mut app = test_app();
        app.begin_send("Hello").unwrap();

        for fragment in ["Salut", ", ", "Alex", " !"] {
            app.push_fragment(fragment);
        }
        let text = app.finish_reply().unwrap();

        assert_eq!(text, "Salut, Alex !");
        let reply = app.messages.last().unwrap();
        assert_eq!(reply.text, "Salut, Alex !");
        assert!(!reply.streaming);
        assert!(!app.is_processing);
    }

    #[test]
    fn empty_fragment_sequence_is_not_an_error() {
        let mut app = test_app();
        app.begin_send("Hello").unwrap();
        let text = app.finish_reply().unwrap();

        assert_eq!(text, "");
        let reply = app.messages.last().unwrap();
        assert_eq!(reply.text, "");
        assert!(!reply.streaming);
        assert!(!app.is_processing);
    }

    #[test]
    fn failure_discards_partial_text_for_the_fallback() {
        let mut app = test_app();
        app.begin_send("Hello").unwrap();
        app.push_fragment("Salut, je");
        app.fail_reply();

        let reply = app.messages.last().unwrap();
        assert_eq!(reply.text, FALLBACK_REPLY);
        assert!(!reply.streaming);
        assert!(!app.is_processing);
    }

    #[test]
    fn failure_with_zero_fragments_also_shows_fallback() {
        let mut app = test_app();
        app.begin_send("Hello").unwrap();
        app.fail_reply();
        assert_eq!(app.messages.last().unwrap().text, FALLBACK_REPLY);
    }

    #[test]
    fn at_most_one_message_streams_at_a_time() {
        let mut app = test_app();
        app.begin_send("one").unwrap();
        app.push_fragment("a");
        app.finish_reply();
        app.begin_send("two").unwrap();

        let streaming = app.messages.iter().filter(|m| m.streaming).count();
        assert_eq!(streaming, 1);
    }

    #[test]
    fn message_ids_are_unique_across_many_sends() {
        let mut app = test_app();
        for i in 0..500 {
            app.begin_send(&format!("message {i}")).unwrap();
            app.finish_reply();
        }

        let mut ids: Vec<u64> = app.messages.iter().map(|m| m.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn processing_spans_send_to_stream_end() {
        let mut app = test_app();
        assert!(!app.is_processing);
        app.begin_send("Hello").unwrap();
        assert!(app.is_processing);
        app.push_fragment("Hi");
        assert!(app.is_processing);
        app.finish_reply();
        assert!(!app.is_processing);
    }

    #[test]
    fn end_to_end_hello_scenario() {
        let mut app = test_app();

        app.begin_send("Hello").unwrap();
        assert_eq!(app.messages[0].text, "Hello");
        assert!(app.messages[1].streaming);

        app.push_fragment("Hi");
        assert_eq!(app.messages[1].text, "Hi");
        app.push_fragment(" there");
        assert_eq!(app.messages[1].text, "Hi there");

        app.finish_reply();
        assert!(!app.messages[1].streaming);
        assert_eq!(app.messages[1].text, "Hi there");
        assert!(!app.is_processing);
    }

    #[test]
    fn focus_returns_to_composer_after_each_cycle() {
        let mut app = test_app();
        app.input_mode = InputMode::Normal;
        app.begin_send("Hello").unwrap();
        app.finish_reply();
        assert_eq!(app.input_mode, InputMode::Editing);

        app.input_mode = InputMode::Normal;
        app.begin_send("Again").unwrap();
        app.fail_reply();
        assert_eq!(app.input_mode, InputMode::Editing);
    }
}
