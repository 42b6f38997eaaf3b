use super::LlmError;

/// Structured-output constraint attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// One chat completion: a system prompt plus a user turn made of optional
/// text and an optional PNG image.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user_text: Option<&'a str>,
    pub image_png: Option<&'a [u8]>,
    pub temperature: Option<f32>,
    pub json_schema: Option<&'a JsonSchema>,
}

impl<'a> ChatRequest<'a> {
    pub fn new(model: &'a str, system: &'a str) -> Self {
        Self {
            model,
            system,
            user_text: None,
            image_png: None,
            temperature: None,
            json_schema: None,
        }
    }

    pub fn with_text(mut self, text: &'a str) -> Self {
        self.user_text = Some(text);
        self
    }

    pub fn with_image(mut self, png: &'a [u8]) -> Self {
        self.image_png = Some(png);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_schema(mut self, schema: &'a JsonSchema) -> Self {
        self.json_schema = Some(schema);
        self
    }
}

/// Chat-completion backend. Returns the assistant message text (empty when
/// the model sent no content).
pub trait ChatClient: Send + Sync {
    fn complete(&self, request: &ChatRequest<'_>) -> Result<String, LlmError>;
}
