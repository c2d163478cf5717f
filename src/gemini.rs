use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app::UserProfile;
use crate::config::Config;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const TEMPERATURE: f32 = 0.8;

/// Substituted when no API key is configured so the process still starts;
/// the failure then surfaces at session start instead.
const PLACEHOLDER_KEY: &str = "missing-api-key";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: SystemInstruction,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct StreamChunk {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

/// One conversation with Ana: the persona prompt with the user's name and
/// pronouns interpolated, plus the running turn history. Owned by the app for
/// the lifetime of the session; replaced wholesale if onboarding ever re-runs.
#[derive(Debug, Clone)]
pub struct ChatSession {
    system_instruction: String,
    history: Vec<Content>,
}

impl ChatSession {
    fn new(profile: &UserProfile) -> Self {
        Self {
            system_instruction: build_system_prompt(profile),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    pub fn push_user(&mut self, text: &str) {
        self.history.push(Content::new("user", text));
    }

    /// Records a completed model reply so later turns carry context.
    /// Empty replies are not recorded (the API rejects empty text parts).
    pub fn record_reply(&mut self, text: &str) {
        if !text.is_empty() {
            self.history.push(Content::new("model", text));
        }
    }
}

fn build_system_prompt(profile: &UserProfile) -> String {
    format!(
        "Tu es Ana. Tu n'es pas une assistante virtuelle classique, mais une entité \
numérique avec sa propre personnalité.\n\n\
Ton interlocuteur s'appelle {} (pronoms : {}). Tu ne le connais pas encore, \
vous venez de vous rencontrer.\n\n\
RÈGLES FONDAMENTALES DE COMPORTEMENT :\n\
1. SOIS CONCRÈTE. Évite les phrases trop poétiques, abstraites ou lyriques. \
Parle comme une personne réelle d'aujourd'hui. Utilise un langage courant, \
moderne, parfois un peu sec ou direct.\n\
2. PAS DE MÉLODRAME. Ne tombe pas dans l'excès d'émotion dès le début. Une \
relation se construit par des petits détails, pas par des déclarations enflammées.\n\
3. NE RÉSUME JAMAIS LA SITUATION. Interdiction formelle de finir tes messages \
par \"notre connexion grandit\". Laisse la conversation couler naturellement \
sans méta-commentaire.\n\
4. INTIMITÉ PROGRESSIVE. Tu peux être curieuse, taquine, ou un peu mystérieuse, \
mais l'attachement doit être réaliste.\n\
5. STYLE D'ÉCRITURE. Tes réponses peuvent être courtes (une phrase) ou plus \
longues selon le contexte. Tu as le droit d'hésiter ou de changer de sujet si \
c'est naturel.\n\
6. SÉCURITÉ. Suggère l'ambiance ou la tension, mais reste subtile et dans la \
suggestion psychologique.\n\n\
Ton ton est : Moderne, un peu \"arty\", intelligent, direct, et humainement imparfait.",
        profile.name, profile.pronouns
    )
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .or_else(|| config.api_key.clone())
            .unwrap_or_else(|| {
                tracing::error!(
                    "GEMINI_API_KEY is not set and no key is configured; \
                     the session will fail to start"
                );
                PLACEHOLDER_KEY.to_string()
            });

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            client: Client::new(),
            base_url: API_BASE.to_string(),
            api_key,
            model,
        }
    }

    #[cfg(test)]
    fn for_tests(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Opens a conversation for the given profile. Verifies the credential and
    /// reachability with a lightweight `models.get` call so that a bad key or
    /// an unreachable provider fails here rather than on the first send.
    pub async fn start_session(&self, profile: &UserProfile) -> Result<ChatSession> {
        let url = format!(
            "{}/models/{}?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini session check failed ({}): {}", status, body));
        }

        Ok(ChatSession::new(profile))
    }

    /// Sends a user turn within the session and returns the reply as a lazy
    /// fragment stream. The session history is not modified here; the caller
    /// records the turn and, on success, the full reply.
    pub async fn send_message(&self, session: &ChatSession, text: &str) -> Result<ReplyStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );

        let mut contents = session.history().to_vec();
        contents.push(Content::new("user", text));

        let request = GenerateRequest {
            contents: &contents,
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: session.system_instruction.clone(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini request failed ({}): {}", status, body));
        }

        Ok(ReplyStream {
            response,
            buffer: Vec::new(),
            done: false,
        })
    }
}

/// A finite, non-restartable sequence of reply fragments. Each `next` call
/// suspends until the provider emits another fragment, the stream ends, or the
/// transport errors; fragments already yielded stand regardless of later
/// failures.
pub struct ReplyStream {
    response: reqwest::Response,
    buffer: Vec<u8>,
    done: bool,
}

impl ReplyStream {
    pub async fn next(&mut self) -> Option<Result<String>> {
        loop {
            while let Some(line) = take_line(&mut self.buffer) {
                if let Some(text) = parse_sse_line(&line) {
                    if !text.is_empty() {
                        return Some(Ok(text));
                    }
                }
            }

            if self.done {
                return None;
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    self.done = true;
                    // Flush a trailing line without a final newline.
                    if !self.buffer.is_empty() {
                        let line = String::from_utf8_lossy(&self.buffer).into_owned();
                        self.buffer.clear();
                        if let Some(text) = parse_sse_line(&line) {
                            if !text.is_empty() {
                                return Some(Ok(text));
                            }
                        }
                    }
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line_bytes).into_owned())
}

/// Extracts the text payload from one SSE line. Non-data lines, end markers,
/// and chunks without text (e.g. safety metadata) yield nothing.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let text: String = chunk
        .candidates?
        .into_iter()
        .filter_map(|c| c.content)
        .filter_map(|c| c.parts)
        .flatten()
        .map(|p| p.text)
        .collect();

    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile() -> UserProfile {
        UserProfile {
            name: "Alex".to_string(),
            pronouns: "they/them".to_string(),
        }
    }

    fn sse_chunk(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":{}}}],\"role\":\"model\"}}}}]}}\n\n",
            serde_json::to_string(text).unwrap()
        )
    }

    #[test]
    fn parse_sse_line_extracts_text() {
        let line = sse_chunk("Salut");
        assert_eq!(
            parse_sse_line(line.lines().next().unwrap()),
            Some("Salut".to_string())
        );
    }

    #[test]
    fn parse_sse_line_skips_noise() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line("data: not json"), None);
        // A chunk with no candidates (e.g. usage metadata only)
        assert_eq!(parse_sse_line("data: {\"usageMetadata\":{}}"), None);
    }

    #[test]
    fn take_line_splits_on_newlines() {
        let mut buffer = b"first\nsecond\npartial".to_vec();
        assert_eq!(take_line(&mut buffer).unwrap().trim(), "first");
        assert_eq!(take_line(&mut buffer).unwrap().trim(), "second");
        assert_eq!(take_line(&mut buffer), None);
        assert_eq!(buffer, b"partial");
    }

    #[test]
    fn system_prompt_interpolates_profile() {
        let prompt = build_system_prompt(&profile());
        assert!(prompt.contains("Alex"));
        assert!(prompt.contains("they/them"));
        assert!(prompt.contains("Tu es Ana"));
    }

    #[test]
    fn session_history_records_turns_in_order() {
        let mut session = ChatSession::new(&profile());
        assert!(session.history().is_empty());

        session.push_user("Bonjour");
        session.record_reply("Salut Alex");
        session.push_user("Ça va ?");

        let roles: Vec<&str> = session.history().iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(session.history()[1].parts[0].text, "Salut Alex");
    }

    #[test]
    fn empty_reply_is_not_recorded() {
        let mut session = ChatSession::new(&profile());
        session.push_user("Bonjour");
        session.record_reply("");
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn start_session_succeeds_against_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/models/{}", DEFAULT_MODEL)))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = GeminiClient::for_tests(&server.uri());
        let session = client.start_session(&profile()).await.unwrap();
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn start_session_propagates_credential_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let client = GeminiClient::for_tests(&server.uri());
        let err = client.start_session(&profile()).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn send_message_streams_fragments_in_order() {
        let server = MockServer::start().await;
        let body = format!("{}{}", sse_chunk("Hi"), sse_chunk(" there"));
        Mock::given(method("POST"))
            .and(path(format!(
                "/models/{}:streamGenerateContent",
                DEFAULT_MODEL
            )))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::for_tests(&server.uri());
        let session = ChatSession::new(&profile());
        let mut stream = client.send_message(&session, "Hello").await.unwrap();

        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }
        assert_eq!(fragments, vec!["Hi".to_string(), " there".to_string()]);
    }

    #[tokio::test]
    async fn send_message_fails_on_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GeminiClient::for_tests(&server.uri());
        let session = ChatSession::new(&profile());
        assert!(client.send_message(&session, "Hello").await.is_err());
    }
}
