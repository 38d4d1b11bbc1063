//! Scripted collaborators and fixtures shared by the core unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use vignette_shared::{
    InteractionRecord, ModelClient, ModelRequest, ModelTask, PipelineConfig, Result, RetryPolicy,
    SearchClient, SearchResponse, VignetteError,
};

/// What a scripted model call does.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Transport,
    Hang,
}

type WidgetResponder = Box<dyn Fn(&str) -> Reply + Send + Sync>;

/// Model fake. Widget replies are chosen by the pattern title in the request.
pub struct ScriptedModel {
    patterns: Reply,
    theme: Reply,
    widgets: WidgetResponder,
    calls: Mutex<HashMap<ModelTask, usize>>,
    widget_calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            patterns: Reply::Transport,
            theme: Reply::Transport,
            widgets: Box::new(|title| Reply::Json(widget_json(title))),
            calls: Mutex::new(HashMap::new()),
            widget_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_patterns(mut self, reply: Reply) -> Self {
        self.patterns = reply;
        self
    }

    pub fn with_theme(mut self, reply: Reply) -> Self {
        self.theme = reply;
        self
    }

    pub fn with_widgets(mut self, responder: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        self.widgets = Box::new(responder);
        self
    }

    pub fn calls(&self, task: ModelTask) -> usize {
        self.calls.lock().unwrap().get(&task).copied().unwrap_or(0)
    }

    pub fn widget_calls(&self, title: &str) -> usize {
        self.widget_calls.lock().unwrap().get(title).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: ModelRequest) -> Result<Value> {
        *self.calls.lock().unwrap().entry(request.task).or_default() += 1;

        let reply = match request.task {
            ModelTask::ExtractPatterns => self.patterns.clone(),
            ModelTask::SynthesizeTheme => self.theme.clone(),
            ModelTask::GenerateWidget => {
                let title = request.context["pattern"]["title"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                *self.widget_calls.lock().unwrap().entry(title.clone()).or_default() += 1;
                (self.widgets)(&title)
            }
        };

        match reply {
            Reply::Json(value) => Ok(value),
            Reply::Transport => Err(VignetteError::transport("scripted outage")),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(VignetteError::transport("unreachable"))
            }
        }
    }
}

/// Search fake answering every query unless told to fail it.
#[derive(Default)]
pub struct ScriptedSearch {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn delayed(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn calls(&self, query: &str) -> usize {
        self.calls.lock().unwrap().get(query).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SearchClient for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        *self.calls.lock().unwrap().entry(query.to_string()).or_default() += 1;
        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(query) {
            return Err(VignetteError::transport(format!("search unavailable for {query}")));
        }
        Ok(SearchResponse {
            answer: format!("answer for {query}"),
            citations: vec![format!("https://example.com/{}", query.replace(' ', "-"))],
        })
    }
}

/// Noon UTC on the given day of March 2026.
pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

pub fn record(id: &str, source: &str, kind: &str, timestamp: DateTime<Utc>) -> InteractionRecord {
    InteractionRecord {
        id: id.into(),
        source: source.into(),
        kind: kind.into(),
        timestamp,
        payload: json!({ "note": id }),
    }
}

/// A pattern-extraction response: (title, confidence, widget, queries).
pub fn patterns_json(patterns: &[(&str, f64, &str, &[&str])]) -> Value {
    let patterns: Vec<Value> = patterns
        .iter()
        .map(|(title, confidence, widget, queries)| {
            json!({
                "title": title,
                "description": format!("About {title}"),
                "confidence": confidence,
                "keywords": [title.to_lowercase()],
                "widget": widget,
                "queries": queries,
            })
        })
        .collect();
    json!({ "patterns": patterns })
}

pub fn theme_json(mood: &str) -> Value {
    json!({
        "primary": "#112233",
        "secondary": "#445566",
        "accent": "#ff8800",
        "background": "#FFFFFF",
        "surface": "#F0F0F0",
        "text": "#101010",
        "mood": mood,
        "rationale": "scripted",
    })
}

pub fn widget_json(title: &str) -> Value {
    json!({
        "title": title,
        "body": format!("Generated body for {title}"),
        "highlights": [format!("{title} highlight")],
    })
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        call_timeout: Duration::from_secs(5),
    }
}

/// Pipeline settings with short backoff so paused-time tests stay small.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        patterns_retry: fast_retry(3),
        theme_retry: fast_retry(3),
        enrichment_retry: fast_retry(2),
        fabrication_retry: fast_retry(3),
        ..PipelineConfig::default()
    }
}
