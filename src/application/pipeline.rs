//! Pipeline Coordinator: drives every outline unit through the renderer and
//! optional inspector, with a selectable execution strategy, incremental
//! persistence, and an append-only progress stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::outline::{Outline, OutlineUnit};
use crate::domain::units::{RenderedUnit, UnitSource};
use crate::infra::store::DeckStore;

use super::DeckContext;
use super::inspector::VisualInspector;
use super::progress::{PipelineEvent, Stage};
use super::renderer::UnitRenderer;
use super::style::StyleGuideService;

const SOURCE: &str = "application::pipeline::PipelineCoordinator";
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Clone)]
pub struct PipelineCoordinator {
    renderer: Arc<UnitRenderer>,
    inspector: Arc<VisualInspector>,
    style: Arc<StyleGuideService>,
    store: Arc<dyn DeckStore>,
    concurrency: usize,
}

impl PipelineCoordinator {
    pub fn new(
        renderer: Arc<UnitRenderer>,
        inspector: Arc<VisualInspector>,
        style: Arc<StyleGuideService>,
        store: Arc<dyn DeckStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            renderer,
            inspector,
            style,
            store,
            concurrency: concurrency.clamp(1, 32),
        }
    }

    /// Run the deck through the pipeline, emitting events as units finish.
    /// Sequential mode emits in outline order; parallel mode emits as tasks
    /// complete and guarantees only persistence-before-emission per unit.
    pub fn run(
        &self,
        outline: Outline,
        ctx: DeckContext,
        mode: ExecutionMode,
    ) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = self.clone();

        tokio::spawn(async move {
            coordinator.drive(outline, ctx, mode, tx).await;
        });

        rx
    }

    async fn drive(
        &self,
        outline: Outline,
        ctx: DeckContext,
        mode: ExecutionMode,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        let edited = match self.store.manually_edited_positions(ctx.project).await {
            Ok(positions) => positions,
            Err(err) => {
                warn!(
                    target = "lucido::pipeline",
                    source = SOURCE,
                    project = %ctx.project,
                    error = %err,
                    "could not read manual-edit flags, regenerating all units"
                );
                Vec::new()
            }
        };

        let rendered = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut pending = Vec::new();
        for unit in outline.units {
            if edited.contains(&unit.position) {
                skipped.fetch_add(1, Ordering::Relaxed);
                self.reemit_edited(&unit, &ctx, &tx).await;
            } else {
                pending.push(unit);
            }
        }

        match mode {
            ExecutionMode::Sequential => {
                for unit in pending {
                    self.process_unit(&unit, &ctx, &tx, &rendered, &failed).await;
                }
            }
            ExecutionMode::Parallel => {
                futures::stream::iter(pending)
                    .for_each_concurrent(Some(self.concurrency), |unit| {
                        let tx = tx.clone();
                        let ctx = ctx.clone();
                        let rendered = rendered.clone();
                        let failed = failed.clone();
                        async move {
                            self.process_unit(&unit, &ctx, &tx, &rendered, &failed).await;
                        }
                    })
                    .await;
            }
        }

        let summary = PipelineEvent::Done {
            rendered: rendered.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        info!(
            target = "lucido::pipeline",
            source = SOURCE,
            project = %ctx.project,
            ?summary,
            "pipeline run complete"
        );
        let _ = tx.send(summary).await;
    }

    /// Manually edited units are never regenerated; the stored artifact is
    /// re-emitted unchanged.
    async fn reemit_edited(
        &self,
        unit: &OutlineUnit,
        ctx: &DeckContext,
        tx: &mpsc::Sender<PipelineEvent>,
    ) {
        let _ = tx
            .send(PipelineEvent::Progress {
                position: unit.position,
                stage: Stage::Skipped,
            })
            .await;

        match self.store.fetch_unit(ctx.project, unit.position).await {
            Ok(Some(stored)) => {
                let _ = tx
                    .send(PipelineEvent::Unit {
                        unit: stored,
                        skipped: true,
                    })
                    .await;
            }
            Ok(None) => {
                warn!(
                    target = "lucido::pipeline",
                    source = SOURCE,
                    position = unit.position,
                    "unit flagged as manually edited but has no stored artifact"
                );
            }
            Err(err) => {
                let _ = tx
                    .send(PipelineEvent::Error {
                        position: Some(unit.position),
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn process_unit(
        &self,
        unit: &OutlineUnit,
        ctx: &DeckContext,
        tx: &mpsc::Sender<PipelineEvent>,
        rendered: &AtomicUsize,
        failed: &AtomicUsize,
    ) {
        match self.render_unit(unit, ctx, Some(tx)).await {
            Ok(result) => {
                rendered.fetch_add(1, Ordering::Relaxed);
                let _ = tx
                    .send(PipelineEvent::Progress {
                        position: unit.position,
                        stage: Stage::Persisted,
                    })
                    .await;
                let _ = tx
                    .send(PipelineEvent::Unit {
                        unit: result,
                        skipped: false,
                    })
                    .await;
            }
            Err(message) => {
                failed.fetch_add(1, Ordering::Relaxed);
                counter!("lucido_pipeline_unit_failures_total").increment(1);
                let _ = tx
                    .send(PipelineEvent::Error {
                        position: Some(unit.position),
                        message,
                    })
                    .await;
            }
        }
    }

    /// Render, inspect, and persist one unit. Rendering itself never fails;
    /// the only error path is the persistence upsert. Also the entry point
    /// for single-unit re-triggers.
    pub async fn render_unit(
        &self,
        unit: &OutlineUnit,
        ctx: &DeckContext,
        tx: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<RenderedUnit, String> {
        if let Some(tx) = tx {
            let _ = tx
                .send(PipelineEvent::Progress {
                    position: unit.position,
                    stage: Stage::Rendering,
                })
                .await;
        }

        // One-time per-project side effect, guarded inside the service.
        let style_guide = self.style.style_guide(ctx).await;
        let mut result = self.renderer.render(unit, ctx, &style_guide).await;

        if let Some(tx) = tx {
            let _ = tx
                .send(PipelineEvent::Progress {
                    position: unit.position,
                    stage: Stage::Inspecting,
                })
                .await;
        }

        let inspected = self.inspector.inspect_and_repair(&result.markup, ctx).await;
        if inspected != result.markup {
            result.markup = inspected;
            result.source = UnitSource::RepairedByVision;
        }

        self.store
            .upsert_unit(ctx.project, &result)
            .await
            .map_err(|err| format!("unit {} could not be persisted: {err}", unit.position))?;

        Ok(result)
    }
}
