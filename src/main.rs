use std::{process, sync::Arc};

use lucido::{
    application::{
        DeckContext,
        error::AppError,
        inspector::{InspectorOptions, VisualInspector},
        pipeline::PipelineCoordinator,
        planner::{OutlinePlanner, PlanRequest, PlannerOptions},
        progress::PipelineEvent,
        renderer::{RendererOptions, UnitRenderer},
        style::StyleGuideService,
    },
    config,
    domain::outline::Outline,
    infra::{
        browser::{HeadlessChromium, RenderSurface, Viewport},
        error::InfraError,
        llm::{ChatClient, ChatClientConfig, TextGenerator},
        store::{DeckStore, FileStore, MemoryStore},
        telemetry,
        vision::{VisionClient, VisionClientConfig, VisionModel},
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, advice = error.advice(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, advice = error.advice(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Generate(args) => run_generate(settings, *args).await,
        config::Command::Plan(args) => run_plan(settings, args).await,
        config::Command::ExportPdf(args) => run_export_pdf(settings, args).await,
    }
}

struct ApplicationContext {
    planner: OutlinePlanner,
    coordinator: PipelineCoordinator,
    store: Arc<dyn DeckStore>,
    browser: Arc<HeadlessChromium>,
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let text: Arc<dyn TextGenerator> = Arc::new(
        ChatClient::new(ChatClientConfig {
            base_url: settings.models.base_url.clone(),
            api_key: settings.models.api_key.clone(),
            model: settings.models.text_model.clone(),
            max_tokens: settings.models.max_tokens,
            temperature: settings.models.temperature,
            retries: settings.models.retries,
            backoff: settings.models.backoff,
            timeout: settings.models.timeout,
        })
        .map_err(|err| AppError::unexpected(format!("text client init failed: {err}")))?,
    );

    let store: Arc<dyn DeckStore> = match settings.storage.data_dir.as_ref() {
        Some(dir) => Arc::new(FileStore::new(dir.clone())),
        None => Arc::new(MemoryStore::new()),
    };

    let browser = Arc::new(HeadlessChromium::new(settings.browser.executable.clone()));

    let inspector = if settings.inspection.enabled {
        let vision: Arc<dyn VisionModel> = Arc::new(
            VisionClient::new(VisionClientConfig {
                base_url: settings.models.base_url.clone(),
                api_key: settings.models.api_key.clone(),
                model: settings.models.vision_model.clone(),
                max_tokens: settings.models.max_tokens,
                timeout: settings.models.timeout,
            })
            .map_err(|err| AppError::unexpected(format!("vision client init failed: {err}")))?,
        );
        VisualInspector::new(
            Some(browser.clone() as Arc<dyn RenderSurface>),
            Some(vision),
            text.clone(),
            InspectorOptions {
                enabled: true,
                viewport: Viewport {
                    width: settings.browser.width,
                    height: settings.browser.height,
                },
                wait_budget: settings.browser.wait_budget,
                unparsable_policy: settings.inspection.unparsable_policy,
                ..InspectorOptions::default()
            },
        )
    } else {
        VisualInspector::disabled(text.clone())
    };

    let renderer = UnitRenderer::new(
        text.clone(),
        RendererOptions {
            max_attempts: settings.pipeline.max_render_attempts,
            base_temperature: settings.models.temperature,
            model: None,
        },
    );
    let style = StyleGuideService::new(text.clone(), store.clone());
    let planner = OutlinePlanner::new(
        text,
        PlannerOptions {
            max_repair_rounds: settings.pipeline.max_repair_rounds,
            model: None,
        },
    );

    let coordinator = PipelineCoordinator::new(
        Arc::new(renderer),
        Arc::new(inspector),
        Arc::new(style),
        store.clone(),
        settings.pipeline.concurrency,
    );

    Ok(ApplicationContext {
        planner,
        coordinator,
        store,
        browser,
    })
}

fn plan_request(deck: &config::DeckArgs) -> PlanRequest {
    PlanRequest {
        topic: deck.topic.clone(),
        audience: deck.audience.clone(),
        style: deck.style.clone(),
        focus_topics: deck.focus_topics.clone(),
    }
}

async fn run_generate(
    settings: config::Settings,
    args: config::GenerateArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;
    let project = args.project.unwrap_or_else(Uuid::new_v4);

    if let Some(position) = args.only {
        return rerender_single(&app, project, position).await;
    }

    let contract = args.deck.page_contract();
    let outline = app.planner.plan(&plan_request(&args.deck), &contract).await?;
    app.store.save_outline(project, &outline).await?;

    let mut ctx = DeckContext::new(project, args.deck.topic.clone());
    ctx.audience = args.deck.audience.clone();
    ctx.style = args.deck.style.clone();
    ctx.total_units = outline.units.len();

    info!(
        target = "lucido::generate",
        %project,
        units = outline.units.len(),
        mode = ?settings.pipeline.mode,
        "starting deck generation"
    );

    let mut events = app.coordinator.run(outline, ctx, settings.pipeline.mode);
    let mut failed = 0usize;
    while let Some(event) = events.recv().await {
        if let PipelineEvent::Done { failed: count, .. } = &event {
            failed = *count;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(target = "lucido::generate", error = %err, "unserializable event"),
        }
    }

    if failed > 0 {
        return Err(AppError::unexpected(format!(
            "{failed} unit(s) could not be persisted; re-run with --only to retry them"
        )));
    }
    Ok(())
}

/// Regenerate one unit of an already planned deck in place.
async fn rerender_single(
    app: &ApplicationContext,
    project: Uuid,
    position: u32,
) -> Result<(), AppError> {
    let outline = require_outline(app, project).await?;
    let unit = outline
        .units
        .iter()
        .find(|u| u.position == position)
        .ok_or_else(|| {
            AppError::validation(format!("stored outline has no unit at position {position}"))
        })?;

    let mut ctx = DeckContext::new(project, outline.title.clone());
    ctx.audience = outline.metadata.audience.clone();
    ctx.style = outline.metadata.style.clone();
    ctx.total_units = outline.units.len();

    let rendered = app
        .coordinator
        .render_unit(unit, &ctx, None)
        .await
        .map_err(AppError::unexpected)?;

    info!(
        target = "lucido::generate",
        %project,
        position,
        source = rendered.source.as_str(),
        "unit re-rendered"
    );
    Ok(())
}

async fn run_plan(settings: config::Settings, args: config::PlanArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;
    let contract = args.deck.page_contract();
    let outline = app.planner.plan(&plan_request(&args.deck), &contract).await?;

    let rendered = serde_json::to_string_pretty(&outline)
        .map_err(|err| AppError::unexpected(format!("outline serialization failed: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_export_pdf(
    settings: config::Settings,
    args: config::ExportPdfArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;
    let outline = require_outline(&app, args.project).await?;

    tokio::fs::create_dir_all(&args.output)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    let viewport = Viewport {
        width: settings.browser.width,
        height: settings.browser.height,
    };

    let mut exported = 0usize;
    for unit in &outline.units {
        let Some(stored) = app.store.fetch_unit(args.project, unit.position).await? else {
            warn!(
                target = "lucido::export",
                position = unit.position,
                "no stored markup for unit, skipping"
            );
            continue;
        };

        let pdf = app
            .browser
            .render_to_pdf(&stored.markup, viewport, settings.browser.wait_budget)
            .await
            .map_err(|err| {
                AppError::unexpected(format!("pdf render of unit {} failed: {err}", unit.position))
            })?;

        let path = args.output.join(format!("{:03}.pdf", unit.position));
        tokio::fs::write(&path, pdf)
            .await
            .map_err(|err| AppError::from(InfraError::Io(err)))?;
        exported += 1;
    }

    info!(
        target = "lucido::export",
        project = %args.project,
        exported,
        output = %args.output.display(),
        "export completed"
    );
    Ok(())
}

async fn require_outline(app: &ApplicationContext, project: Uuid) -> Result<Outline, AppError> {
    app.store
        .get_outline(project)
        .await?
        .ok_or_else(|| {
            AppError::validation(format!(
                "no stored outline for project {project}; run `generate` first"
            ))
        })
}
