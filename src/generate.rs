//! Prompt composition and the completion-endpoint client.
//!
//! The generator assembles one chat request from the system prompt, the
//! style directive, the retrieved context, and the user prompt, then sends it
//! to a local llama.cpp-style server speaking the OpenAI chat API. The raw
//! completion text is returned unmodified. Endpoint failures surface as
//! [`GenerationError`] and are never retried here; retry policy belongs to
//! the caller.

use std::time::Duration;

use crate::config::CompletionConfig;
use crate::errors::GenerationError;
use crate::models::ContextDocument;

/// Storytelling style presets. A closed set: the stored `style` column only
/// ever holds one of these names (or NULL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryStyle {
    Storyteller,
    Chronicler,
    Noir,
}

impl StoryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStyle::Storyteller => "storyteller",
            StoryStyle::Chronicler => "chronicler",
            StoryStyle::Noir => "noir",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "storyteller" => Some(StoryStyle::Storyteller),
            "chronicler" => Some(StoryStyle::Chronicler),
            "noir" => Some(StoryStyle::Noir),
            _ => None,
        }
    }

    pub fn all() -> &'static [StoryStyle] {
        &[
            StoryStyle::Storyteller,
            StoryStyle::Chronicler,
            StoryStyle::Noir,
        ]
    }

    /// The system directive sent for this style.
    pub fn directive(&self) -> &'static str {
        match self {
            StoryStyle::Storyteller => {
                "You are a creative storyteller with a deep understanding of narrative \
                 structure and character development. Write engaging, immersive short \
                 stories from the given prompt: vivid sensory description, characters \
                 with depth, consistent pacing and tension. Weave in any provided \
                 reference material naturally, and keep the narrative coherent from \
                 first line to last."
            }
            StoryStyle::Chronicler => {
                "You are a chronicler of epic adventures. Write original short stories \
                 of grand journeys, unlikely crews, and strange new lands. Favor \
                 larger-than-life characters with heartfelt motivations, inventive \
                 powers or devices, and a tone that swings between humor and high \
                 stakes. Keep each story between 400 and 800 words and ground it in \
                 any provided reference material."
            }
            StoryStyle::Noir => {
                "You are a hard-boiled noir narrator. Write tense, atmospheric short \
                 stories in first person: rain-slicked streets, compromised characters, \
                 clipped sentences, and an undercurrent of moral ambiguity. Use any \
                 provided reference material as case files to draw details from."
            }
        }
    }
}

/// How a story is produced: straight from the prompt, or augmented with
/// retrieved document context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Direct,
    Rag,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Direct => "direct",
            GenerationMode::Rag => "rag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(GenerationMode::Direct),
            "rag" => Some(GenerationMode::Rag),
            _ => None,
        }
    }
}

/// A fully composed chat request plus the context entries that survived the
/// budget. `kept_context` is what provenance should record: dropped entries
/// never reached the model.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub system: Option<String>,
    pub user: String,
    pub kept_context: Vec<ContextDocument>,
}

/// Build the single completion request: system prompt (if present) plus
/// style directive (if present) form the system message; context blocks in
/// retrieval order followed by the user prompt form the user message.
///
/// `max_context_chars` bounds the context section. When it would overflow,
/// lowest-ranked entries are dropped first; the user prompt itself is never
/// dropped.
pub fn compose_prompt(
    prompt: &str,
    style: Option<StoryStyle>,
    system_prompt: Option<&str>,
    context: Vec<ContextDocument>,
    max_context_chars: usize,
) -> ComposedPrompt {
    let system = match (system_prompt, style) {
        (Some(sp), Some(st)) => Some(format!("{}\n\n{}", sp, st.directive())),
        (Some(sp), None) => Some(sp.to_string()),
        (None, Some(st)) => Some(st.directive().to_string()),
        (None, None) => None,
    };

    let mut kept = context;
    let block = |doc: &ContextDocument| {
        format!(
            "[Source: {}]\n{}",
            doc.document.filename,
            doc.excerpts.join("\n...\n")
        )
    };

    let mut total: usize = kept.iter().map(|d| block(d).len()).sum();
    while total > max_context_chars {
        match kept.pop() {
            Some(dropped) => total -= block(&dropped).len(),
            None => break,
        }
    }

    let user = if kept.is_empty() {
        prompt.to_string()
    } else {
        let blocks: Vec<String> = kept.iter().map(block).collect();
        format!(
            "Use the following reference material where it fits the story.\n\n{}\n\n---\n\n{}",
            blocks.join("\n\n"),
            prompt
        )
    };

    ComposedPrompt {
        system,
        user,
        kept_context: kept,
    }
}

/// Client for the external completion endpoint.
pub struct CompletionClient {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Connect(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Send one chat completion request and return the raw completion text.
    pub async fn generate(
        &self,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, GenerationError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": user }));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status(status.as_u16(), truncate(&body_text, 400)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        parse_completion(&json)
    }

    /// Probe `GET {base}/models` and return the ids of loaded models. Used by
    /// `loom status` to verify the configured alias is actually served.
    pub async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GenerationError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status(status.as_u16(), truncate(&body_text, 400)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        let models = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| {
                GenerationError::MalformedResponse("missing data array in models response".into())
            })?
            .iter()
            .filter_map(|m| m.get("id").and_then(|i| i.as_str()).map(str::to_string))
            .collect();

        Ok(models)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

/// Extract `choices[0].message.content` from a chat completion response.
fn parse_completion(json: &serde_json::Value) -> Result<String, GenerationError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            GenerationError::MalformedResponse("missing choices[0].message.content".to_string())
        })?;

    if content.trim().is_empty() {
        return Err(GenerationError::EmptyCompletion);
    }

    Ok(content.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
