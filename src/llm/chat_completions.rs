//! Streaming client for the Chat Completions API.

use std::pin::Pin;

use futures::{Stream, StreamExt};

use super::{ChatMessage, LlmSettings};

/// One increment of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    Text(String),
    Done,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatDelta>> + Send>>;

#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsClient {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Open a streamed completion.
    pub async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<DeltaStream> {
        let url = self.settings.provider.chat_url(&self.settings.base_url);

        let mut body = serde_json::json!({
            "stream": true,
            "messages": messages,
        });
        if self.settings.provider.sends_model() {
            body["model"] = serde_json::Value::String(self.settings.model.clone());
        }
        if let Some(t) = self.settings.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let rb = self.http.post(&url).json(&body);
        let rb = self
            .settings
            .provider
            .authorize(rb, self.settings.api_key.as_deref());

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for data in text.lines().filter_map(data_line) {
                        if data == "[DONE]" {
                            yield ChatDelta::Done;
                            continue;
                        }
                        if let Some(s) = content_delta(data)? {
                            yield ChatDelta::Text(s);
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}

fn data_line(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

/// Extract `choices[0].delta.content` from one SSE data payload.
fn content_delta(data: &str) -> serde_json::Result<Option<String>> {
    let v: serde_json::Value = serde_json::from_str(data)?;
    Ok(v["choices"][0]["delta"]
        .get("content")
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
