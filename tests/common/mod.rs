#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use lucido::infra::browser::{BrowserError, RenderSurface, Viewport};
use lucido::infra::llm::{Completion, CompletionRequest, LlmError, TextGenerator};
use lucido::infra::vision::{ChatMessage, VisionModel};

/// One scripted turn of a text collaborator.
pub enum Reply {
    Text(String),
    Fail,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Reply::Text(content.into())
    }
}

/// Text collaborator replaying a fixed script front to back. An exhausted
/// script fails loudly so tests notice unplanned calls.
pub struct ScriptedText {
    script: Mutex<VecDeque<Reply>>,
    pub calls: AtomicUsize,
}

impl ScriptedText {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn of(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Reply::text(*t)).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().expect("script lock").pop_front() {
            Some(Reply::Text(content)) => Ok(content),
            Some(Reply::Fail) => Err(LlmError::Transport("scripted failure".to_string())),
            None => Err(LlmError::Transport("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        self.next().map(|content| Completion {
            content,
            finish_reason: None,
        })
    }

    fn complete_stream(
        &self,
        _request: CompletionRequest,
    ) -> BoxStream<'static, Result<String, LlmError>> {
        let next = self.next();
        Box::pin(futures::stream::once(async move { next }))
    }
}

/// Vision collaborator returning the same defect report for every call.
pub struct ScriptedVision {
    report: String,
    pub calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            content: self.report.clone(),
            finish_reason: None,
        })
    }
}

/// Render surface producing a canned screenshot without a browser.
pub struct StubSurface {
    image: Vec<u8>,
    pub calls: AtomicUsize,
}

impl StubSurface {
    pub fn new() -> Self {
        Self {
            image: vec![0x89, 0x50, 0x4e, 0x47],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSurface for StubSurface {
    async fn render_to_image(
        &self,
        _markup: &str,
        _viewport: Viewport,
        _budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.image.clone())
    }

    async fn render_to_pdf(
        &self,
        _markup: &str,
        _viewport: Viewport,
        _budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.image.clone())
    }
}

/// Render surface simulating a missing browser executable.
pub struct BrokenSurface;

#[async_trait]
impl RenderSurface for BrokenSurface {
    async fn render_to_image(
        &self,
        _markup: &str,
        _viewport: Viewport,
        _budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unavailable("no such executable".to_string()))
    }

    async fn render_to_pdf(
        &self,
        _markup: &str,
        _viewport: Viewport,
        _budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unavailable("no such executable".to_string()))
    }
}

/// Minimal document that passes the structural check without warnings.
pub fn well_formed_slide(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n</body>\n</html>"
    )
}

/// The same document wrapped the way models usually answer.
pub fn fenced_slide(title: &str) -> String {
    format!("Here is the slide:\n```html\n{}\n```", well_formed_slide(title))
}
