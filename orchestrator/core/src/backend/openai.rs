//! OpenAI Backend Implementation
//!
//! Streaming chat-completions client over SSE.
//!
//! # Wire format
//!
//! POST `/v1/chat/completions` with `stream: true`. The response is a
//! server-sent event stream: each event line is `data: <json>` carrying a
//! `choices[0].delta`, and the stream ends with `data: [DONE]`.
//!
//! Plain content deltas are forwarded as fragments verbatim. A function-call
//! delta sequence is rewritten into the inline sentinel form the downstream
//! detector recognizes: on the first call delta we emit
//! `function_call: {"id": ..., "name": ..., "arguments": ` and then forward
//! the raw argument deltas as they arrive. The object is left unclosed; the
//! detector closes it at end of stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest, StreamChunk};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI streaming chat backend
#[derive(Clone)]
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a backend against the default API endpoint
    pub fn new(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a backend against a custom endpoint (proxies, compatible servers)
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the request body in chat-completions form
    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        for msg in &request.messages {
            let mut entry = serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            });
            if let Some(name) = &msg.name {
                entry["name"] = serde_json::json!(name);
            }
            if let Some(call) = &msg.function_call {
                // OpenAI expects arguments as a JSON-encoded string
                entry["function_call"] = serde_json::json!({
                    "name": call.name,
                    "arguments": serde_json::Value::Object(call.arguments.clone()).to_string(),
                });
            }
            messages.push(entry);
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "temperature": request.temperature,
            "stream": true,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["functions"] = serde_json::json!(request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect::<Vec<_>>());
        }
        body
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut decoder = SseDeltaDecoder::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Failed(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are newline-delimited `data:` lines
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(StreamChunk::Done).await;
                        return;
                    }
                    for fragment in decoder.decode(data) {
                        if tx.send(StreamChunk::Fragment(fragment)).await.is_err() {
                            // Receiver dropped: the turn was cancelled
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]; treat as normal completion
            let _ = tx.send(StreamChunk::Done).await;
        });

        Ok(rx)
    }
}

/// Translates chat-completion deltas into plain fragments
///
/// Content deltas pass through; a function-call delta sequence is rewritten
/// into the inline sentinel form.
#[derive(Default)]
struct SseDeltaDecoder {
    call_announced: bool,
}

impl SseDeltaDecoder {
    fn decode(&mut self, data: &str) -> Vec<String> {
        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            tracing::warn!(data, "unparseable SSE event skipped");
            return Vec::new();
        };
        let Some(delta) = event
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
        else {
            return Vec::new();
        };

        let mut fragments = Vec::new();

        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                fragments.push(content.to_string());
            }
        }

        if let Some(call) = delta.get("function_call") {
            if !self.call_announced {
                self.call_announced = true;
                let id = event.get("id").and_then(|i| i.as_str()).unwrap_or("");
                let name = call.get("name").and_then(|n| n.as_str()).unwrap_or("");
                fragments.push(format!(
                    "function_call: {{\"id\": {}, \"name\": {}, \"arguments\": ",
                    serde_json::Value::String(id.to_string()),
                    serde_json::Value::String(name.to_string()),
                ));
            }
            if let Some(args) = call.get("arguments").and_then(|a| a.as_str()) {
                if !args.is_empty() {
                    fragments.push(args.to_string());
                }
            }
        }

        fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Conversation, Message};
    use crate::messages::MessageRole;
    use pretty_assertions::assert_eq;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new("sk-test").unwrap()
    }

    #[test]
    fn test_completions_url() {
        let b = OpenAiBackend::with_base_url("k", "http://localhost:8080/v1/").unwrap();
        assert_eq!(b.completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_build_body_shape() {
        let mut conversation = Conversation::new();
        conversation.push(Message::new(MessageRole::User, "Hi"));

        let request = ChatRequest::from_conversation("gpt-4", &conversation)
            .with_system("Be terse")
            .with_tools(vec![crate::tools::ToolSpec::new(
                "fs.read",
                "Read a file",
                serde_json::json!({"type": "object"}),
            )]);

        let body = backend().build_body(&request);
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["functions"][0]["name"], "fs.read");
    }

    #[test]
    fn test_decoder_content_passthrough() {
        let mut decoder = SseDeltaDecoder::default();
        let fragments = decoder.decode(
            r#"{"id":"c1","choices":[{"delta":{"content":"Hello"}}]}"#,
        );
        assert_eq!(fragments, vec!["Hello".to_string()]);
    }

    #[test]
    fn test_decoder_rewrites_call_deltas_to_sentinel_form() {
        let mut decoder = SseDeltaDecoder::default();
        let mut out = String::new();
        for data in [
            r#"{"id":"c1","choices":[{"delta":{"function_call":{"name":"fs.read","arguments":""}}}]}"#,
            r#"{"id":"c1","choices":[{"delta":{"function_call":{"arguments":"{\"path\":"}}}]}"#,
            r#"{"id":"c1","choices":[{"delta":{"function_call":{"arguments":"\"a.txt\"}"}}}]}"#,
        ] {
            for fragment in decoder.decode(data) {
                out.push_str(&fragment);
            }
        }

        assert!(out.starts_with("function_call: {"));
        // The decoder leaves the object unclosed; the detector closes it
        let payload = format!("{out}}}");
        let call: crate::chat::FunctionCall =
            serde_json::from_str(payload.strip_prefix("function_call: ").unwrap()).unwrap();
        assert_eq!(call.id, "c1");
        assert_eq!(call.name, "fs.read");
        assert_eq!(
            call.arguments.get("path"),
            Some(&serde_json::Value::String("a.txt".into()))
        );
    }

    #[test]
    fn test_decoder_skips_garbage() {
        let mut decoder = SseDeltaDecoder::default();
        assert!(decoder.decode("not json").is_empty());
        assert!(decoder.decode(r#"{"choices":[]}"#).is_empty());
    }
}
