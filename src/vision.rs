//! Vision-model action planning.
//!
//! Builds a request from a frame plus a natural-language goal, sends it to a
//! local model service, and parses the response into a validated sequence of
//! input events. Model output is unreliable free text, so parsing is a
//! fallback chain ending in regex salvage; the raw response text is always
//! kept on the returned plan for diagnostics.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::error::{Error, Result};
use crate::input::{InputEvent, KeyAction, MouseButton};
use crate::types::Frame;

/// Primary and fallback external resize commands (ImageMagick flavors).
const RESIZE_COMMAND: &str = "convert";
const RESIZE_COMMAND_ALT: &str = "magick";

const SYSTEM_PROMPT: &str = r#"You are a GUI automation planner looking at a screenshot of a remote machine. Given the user's goal, respond ONLY with valid JSON:
{
  "summary": "one sentence describing the plan",
  "actions": [
    {"type": "mouse_move", "x": 0, "y": 0},
    {"type": "mouse_button", "button": "left", "action": "down", "x": 0, "y": 0},
    {"type": "mouse_button", "button": "left", "action": "up", "x": 0, "y": 0},
    {"type": "text", "text": "literal text to type"},
    {"type": "key", "key": "enter", "action": "down"}
  ]
}
Coordinates are pixels in the screenshot. Emit the actions in execution order. No prose outside the JSON."#;

/// A validated action sequence derived from one frame and one goal.
#[derive(Debug, Clone)]
pub struct VisionPlan {
    pub summary: Option<String>,
    pub actions: Vec<InputEvent>,
    /// Raw model response, kept even when parsing partially failed.
    pub raw: String,
}

pub struct VisionPlanner {
    endpoint: String,
    model: String,
    max_image_width: u32,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl VisionPlanner {
    pub fn new(config: &VisionConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_image_width: config.max_image_width,
            timeout,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        }
    }

    /// Plan input events that work toward `goal` on the given frame.
    pub async fn plan(&self, frame: &Frame, goal: &str) -> Result<VisionPlan> {
        let image = self.encode_frame(frame).await;
        let raw = self.request_text(goal, &image).await?;
        let (summary, actions) = parse_plan(&raw)?;
        Ok(VisionPlan { summary, actions, raw })
    }

    /// Base64-encode the frame, downscaling oversized ones first through an
    /// external resize process (primary command, then the alternate name).
    async fn encode_frame(&self, frame: &Frame) -> String {
        if frame.width <= self.max_image_width {
            return BASE64.encode(&frame.data);
        }
        match self.resize(frame).await {
            Some(bytes) => BASE64.encode(bytes),
            None => {
                warn!(
                    "image resize unavailable, sending full {}px frame",
                    frame.width
                );
                BASE64.encode(&frame.data)
            }
        }
    }

    async fn resize(&self, frame: &Frame) -> Option<Vec<u8>> {
        let staging = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("resize staging failed: {}", e);
                return None;
            }
        };
        let input = staging.path().join("in.png");
        let output = staging.path().join("out.png");
        if let Err(e) = tokio::fs::write(&input, &frame.data).await {
            warn!("resize staging failed: {}", e);
            return None;
        }

        for command in [RESIZE_COMMAND, RESIZE_COMMAND_ALT] {
            let status = Command::new(command)
                .arg(&input)
                .arg("-resize")
                .arg(self.max_image_width.to_string())
                .arg(&output)
                .output()
                .await;
            match status {
                Ok(out) if out.status.success() => {
                    match tokio::fs::read(&output).await {
                        Ok(bytes) => {
                            debug!("downscaled frame via {}", command);
                            return Some(bytes);
                        }
                        Err(e) => warn!("{} produced no output: {}", command, e),
                    }
                }
                Ok(out) => warn!(
                    "{} failed: {}",
                    command,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
                Err(e) => warn!("{} unavailable: {}", command, e),
            }
        }
        // staging dir removed on drop, on every exit path
        None
    }

    /// Send the request and extract response text: chat content field, then
    /// completion response field, then raw body. An empty result triggers
    /// one retry against the alternate completion endpoint.
    async fn request_text(&self, goal: &str, image_b64: &str) -> Result<String> {
        let chat_body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": goal, "images": [image_b64]}
            ],
            "stream": false,
            "options": {"temperature": self.temperature, "num_predict": self.max_tokens}
        });
        let url = format!("{}/api/chat", self.endpoint);
        let text = self.post_and_extract(&url, &chat_body).await?;
        if !text.trim().is_empty() {
            return Ok(text);
        }

        warn!("empty model response, retrying alternate completion endpoint");
        let generate_body = json!({
            "model": self.model,
            "prompt": format!("{}\n\nGOAL: {}", SYSTEM_PROMPT, goal),
            "images": [image_b64],
            "stream": false,
            "options": {"temperature": self.temperature, "num_predict": self.max_tokens}
        });
        let url = format!("{}/api/generate", self.endpoint);
        let text = self.post_and_extract(&url, &generate_body).await?;
        if text.trim().is_empty() {
            return Err(Error::Parse {
                message: "model returned no text".into(),
                raw: String::new(),
            });
        }
        Ok(text)
    }

    async fn post_and_extract(&self, url: &str, body: &Value) -> Result<String> {
        let send = async {
            let response = self.client.post(url).json(body).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Connection(format!(
                    "vision service error {}: {}",
                    status, body
                )));
            }
            Ok::<String, Error>(response.text().await?)
        };
        let body_text = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| Error::Connection("vision request timed out".into()))??;
        Ok(extract_response_text(&body_text))
    }
}

/// Locate the model's text inside a response body: chat-style
/// `message.content`, else completion-style `response`, else the raw body.
fn extract_response_text(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(content) = value["message"]["content"].as_str() {
            if !content.trim().is_empty() {
                return content.to_string();
            }
        }
        if let Some(response) = value["response"].as_str() {
            if !response.trim().is_empty() {
                return response.to_string();
            }
        }
    }
    body.to_string()
}

/// Parse raw model output into (summary, validated actions).
///
/// Preference order for the JSON candidate: fenced block, then the substring
/// between the first `{` and last `}`, then the whole trimmed text. Failing
/// all of that, a regex salvage pass recovers what it can; only when salvage
/// also yields nothing does the call fail.
pub fn parse_plan(raw: &str) -> Result<(Option<String>, Vec<InputEvent>)> {
    let candidate = json_candidate(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        if let Some(items) = value["actions"].as_array() {
            let summary = value["summary"].as_str().map(|s| s.to_string());
            let mut actions = Vec::new();
            for item in items {
                match serde_json::from_value::<InputEvent>(item.clone()) {
                    Ok(event) => actions.push(event),
                    Err(e) => warn!("dropping malformed action {}: {}", item, e),
                }
            }
            return Ok((summary, actions));
        }
    }

    let actions = salvage_actions(raw);
    if actions.is_empty() {
        return Err(Error::Parse {
            message: "no structured plan or salvageable actions".into(),
            raw: raw.to_string(),
        });
    }
    debug!("salvaged {} actions from unstructured output", actions.len());
    Ok((None, actions))
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

fn json_candidate(raw: &str) -> String {
    if let Some(cap) = FENCED_JSON.captures(raw) {
        return cap[1].trim().to_string();
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            return raw[start..=end].to_string();
        }
    }
    raw.trim().to_string()
}

static CLICK_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"type"\s*:\s*"click"[^{}]*?"x"\s*:\s*(-?\d+)[^{}]*?"y"\s*:\s*(-?\d+)"#)
        .unwrap()
});
static TYPE_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"type"\s*:\s*"type"[^{}]*?"text"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
});
static KEY_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"type"\s*:\s*"key"[^{}]*?"key"\s*:\s*"([^"]*)""#).unwrap()
});

/// Best-effort regex recovery over free-text model output. Approximate by
/// nature; anything it misses is lost, which is why callers keep `raw`.
fn salvage_actions(raw: &str) -> Vec<InputEvent> {
    let mut found: Vec<(usize, Vec<InputEvent>)> = Vec::new();

    for cap in CLICK_FRAGMENT.captures_iter(raw) {
        let (Ok(x), Ok(y)) = (cap[1].parse::<i32>(), cap[2].parse::<i32>()) else {
            continue;
        };
        let position = cap.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((
            position,
            vec![
                InputEvent::MouseMove { x, y },
                InputEvent::MouseButton {
                    button: MouseButton::Left,
                    action: KeyAction::Down,
                    x: Some(x),
                    y: Some(y),
                },
                InputEvent::MouseButton {
                    button: MouseButton::Left,
                    action: KeyAction::Up,
                    x: Some(x),
                    y: Some(y),
                },
            ],
        ));
    }
    for cap in TYPE_FRAGMENT.captures_iter(raw) {
        let position = cap.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((position, vec![InputEvent::Text { text: unescape_fragment(&cap[1]) }]));
    }
    for cap in KEY_FRAGMENT.captures_iter(raw) {
        let position = cap.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((
            position,
            vec![InputEvent::Key {
                key: cap[1].to_string(),
                action: KeyAction::Down,
                modifiers: Vec::new(),
            }],
        ));
    }

    found.sort_by_key(|(position, _)| *position);
    found.into_iter().flat_map(|(_, events)| events).collect()
}

/// Undo JSON string escapes in a salvaged fragment. Unknown escapes are kept
/// with their backslash dropped, matching how the fragment was matched.
fn unescape_fragment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(escaped) => out.push(escaped),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_plan() {
        let raw = "```json\n{\"summary\":\"ok\",\"actions\":[{\"type\":\"text\",\"text\":\"hi\"}]}\n```";
        let (summary, actions) = parse_plan(raw).unwrap();
        assert_eq!(summary.as_deref(), Some("ok"));
        assert_eq!(actions, vec![InputEvent::Text { text: "hi".into() }]);
    }

    #[test]
    fn parses_bare_json_between_braces() {
        let raw = "Here is the plan: {\"actions\":[{\"type\":\"key\",\"key\":\"enter\",\"action\":\"down\"}]} good luck";
        let (summary, actions) = parse_plan(raw).unwrap();
        assert!(summary.is_none());
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn malformed_actions_are_dropped_not_fatal() {
        let raw = r#"{"summary":"s","actions":[{"type":"text","text":"a"},{"type":"warp"},{"type":"mouse_move","x":1,"y":2}]}"#;
        let (_, actions) = parse_plan(raw).unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn salvage_click_synthesizes_three_events() {
        let raw = "I think you should {\"type\":\"click\",\"x\":10,\"y\":20} first";
        let (summary, actions) = parse_plan(raw).unwrap();
        assert!(summary.is_none());
        assert_eq!(
            actions,
            vec![
                InputEvent::MouseMove { x: 10, y: 20 },
                InputEvent::MouseButton {
                    button: MouseButton::Left,
                    action: KeyAction::Down,
                    x: Some(10),
                    y: Some(20),
                },
                InputEvent::MouseButton {
                    button: MouseButton::Left,
                    action: KeyAction::Up,
                    x: Some(10),
                    y: Some(20),
                },
            ]
        );
    }

    #[test]
    fn salvaged_text_is_unescaped() {
        let raw = r#"try {"type":"type","text":"say \"hi\" and C:\\tmp"} there"#;
        let actions = salvage_actions(raw);
        assert_eq!(
            actions,
            vec![InputEvent::Text { text: "say \"hi\" and C:\\tmp".into() }]
        );
    }

    #[test]
    fn salvage_preserves_fragment_order() {
        let raw = r#"first "type":"type","text":"hello" then "type":"key","key":"enter""#;
        let actions = salvage_actions(raw);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], InputEvent::Text { text: "hello".into() });
        assert!(matches!(actions[1], InputEvent::Key { .. }));
    }

    #[test]
    fn unsalvageable_output_is_a_parse_error() {
        let raw = "I am sorry, I cannot help with that.";
        let err = parse_plan(raw).unwrap_err();
        match err {
            Error::Parse { raw: kept, .. } => assert_eq!(kept, raw),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn extracts_chat_then_completion_then_raw() {
        assert_eq!(
            extract_response_text(r#"{"message":{"content":"chat"}}"#),
            "chat"
        );
        assert_eq!(extract_response_text(r#"{"response":"completion"}"#), "completion");
        assert_eq!(extract_response_text("plain body"), "plain body");
    }
}
