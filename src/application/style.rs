//! Per-project style guide: derived once from the reference style, cached
//! in memory, persisted, and reused across all units.
//!
//! Derivation is the canonical one-time side effect of the pipeline, so it
//! runs under a per-project mutex with a double-checked cache: a task
//! blocks on the lock, re-checks memoized and persisted copies after
//! acquiring it, and computes only when still absent.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::extract;
use crate::infra::llm::{CompletionRequest, TextGenerator};
use crate::infra::store::DeckStore;

use super::DeckContext;

const SOURCE: &str = "application::style::StyleGuideService";

/// Last-resort styling conventions when derivation is impossible. Kept
/// deliberately plain so fallback decks stay readable.
pub const DEFAULT_STYLE_GUIDE: &str = "Clean white background, dark slate text, a single \
accent color (#2563eb), generous margins, one dominant heading per slide, sans-serif \
typography at presentation sizes.";

pub struct StyleGuideService {
    text: Arc<dyn TextGenerator>,
    store: Arc<dyn DeckStore>,
    cache: DashMap<Uuid, String>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl StyleGuideService {
    pub fn new(text: Arc<dyn TextGenerator>, store: Arc<dyn DeckStore>) -> Self {
        Self {
            text,
            store,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, project: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(project)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve the style guide for a project, deriving it at most once per
    /// process regardless of concurrency. Never fails: derivation errors
    /// fall back to [`DEFAULT_STYLE_GUIDE`] without caching, so a later
    /// unit may retry.
    pub async fn style_guide(&self, ctx: &DeckContext) -> String {
        if let Some(cached) = self.cache.get(&ctx.project) {
            return cached.value().clone();
        }

        let lock = self.lock_for(ctx.project);
        let _guard = lock.lock().await;

        // Another task may have finished while this one waited on the lock.
        if let Some(cached) = self.cache.get(&ctx.project) {
            return cached.value().clone();
        }

        match self.store.get_style_guide(ctx.project).await {
            Ok(Some(persisted)) => {
                self.cache.insert(ctx.project, persisted.clone());
                return persisted;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "lucido::style",
                    source = SOURCE,
                    project = %ctx.project,
                    error = %err,
                    "could not read persisted style guide"
                );
            }
        }

        let derived = match self.derive(ctx).await {
            Some(guide) => guide,
            None => return DEFAULT_STYLE_GUIDE.to_string(),
        };

        if let Err(err) = self.store.put_style_guide(ctx.project, &derived).await {
            warn!(
                target = "lucido::style",
                source = SOURCE,
                project = %ctx.project,
                error = %err,
                "could not persist derived style guide"
            );
        }
        self.cache.insert(ctx.project, derived.clone());
        derived
    }

    async fn derive(&self, ctx: &DeckContext) -> Option<String> {
        let reference = ctx.style.as_deref().unwrap_or("a clean, modern conference deck");
        let prompt = format!(
            "Derive a concise visual style guide for a slide deck about \"{topic}\".\n\
             Reference style: {reference}.\n\
             Describe color palette, typography, spacing, and layout conventions in at most \
             six sentences. Respond with the guide only, no preamble.",
            topic = ctx.topic,
        );

        let request = CompletionRequest {
            prompt,
            system: Some("You are a presentation art director.".to_string()),
            temperature: Some(0.2),
            ..CompletionRequest::default()
        };

        match self.text.complete(request).await {
            Ok(completion) => {
                let guide = extract::strip_reasoning(&completion.content).trim().to_string();
                if guide.is_empty() { None } else { Some(guide) }
            }
            Err(err) => {
                warn!(
                    target = "lucido::style",
                    source = SOURCE,
                    project = %ctx.project,
                    error = %err,
                    "style guide derivation failed, using default"
                );
                None
            }
        }
    }
}
