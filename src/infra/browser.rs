//! Headless rendering surface: trait plus a Chromium shell-out adapter.
//!
//! Each call renders into a fresh temporary profile so concurrent
//! inspections never share DOM state. Readiness is detected in-page: a
//! probe script polls canvas/SVG regions for non-transparent pixel data
//! with exponential backoff, and Chromium's virtual-time budget fast-
//! forwards the poll so capture happens only after drawing settled.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const SOURCE: &str = "infra::browser::HeadlessChromium";

/// Fixed canvas size used for off-screen rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser executable unavailable: {0}")]
    Unavailable(String),
    #[error("browser process failed with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("browser render timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error during render: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn render_to_image(
        &self,
        markup: &str,
        viewport: Viewport,
        budget: Duration,
    ) -> Result<Vec<u8>, BrowserError>;

    async fn render_to_pdf(
        &self,
        markup: &str,
        viewport: Viewport,
        budget: Duration,
    ) -> Result<Vec<u8>, BrowserError>;
}

/// In-page readiness probe. Samples a coarse pixel grid of every canvas and
/// checks SVG bounding boxes, polling with doubling backoff until content is
/// visible or the deadline passes; fonts are awaited first. Completion is
/// signalled through the document title so the capture side has a marker.
const READINESS_PROBE: &str = r#"
(function () {
  var started = Date.now();
  var budget = window.__renderBudgetMs || 8000;

  function canvasPainted(canvas) {
    try {
      var ctx = canvas.getContext('2d');
      if (!ctx || canvas.width === 0 || canvas.height === 0) { return true; }
      var stepX = Math.max(1, Math.floor(canvas.width / 16));
      var stepY = Math.max(1, Math.floor(canvas.height / 16));
      for (var y = 0; y < canvas.height; y += stepY) {
        for (var x = 0; x < canvas.width; x += stepX) {
          if (ctx.getImageData(x, y, 1, 1).data[3] > 0) { return true; }
        }
      }
      return false;
    } catch (e) {
      return true;
    }
  }

  function svgDrawn(svg) {
    try {
      var box = svg.getBBox();
      return box.width > 0 && box.height > 0;
    } catch (e) {
      return true;
    }
  }

  function allDrawn() {
    var canvases = Array.prototype.slice.call(document.querySelectorAll('canvas'));
    var svgs = Array.prototype.slice.call(document.querySelectorAll('svg'));
    return canvases.every(canvasPainted) && svgs.every(svgDrawn);
  }

  function finish() {
    window.__lucidoReady = true;
    document.title = 'lucido:ready';
  }

  function poll(delay) {
    if (Date.now() - started > budget) { finish(); return; }
    if (allDrawn()) { finish(); return; }
    setTimeout(function () { poll(Math.min(delay * 2, 1000)); }, delay);
  }

  var ready = document.fonts && document.fonts.ready
    ? document.fonts.ready
    : Promise.resolve();
  ready.then(function () { poll(50); });
})();
"#;

/// Headless Chromium adapter driven through `tokio::process`.
pub struct HeadlessChromium {
    executable: PathBuf,
}

impl HeadlessChromium {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Inject the readiness probe (and its wait budget) before `</body>`,
    /// or append when the document has no explicit body end tag.
    fn instrument(markup: &str, budget: Duration) -> String {
        let script = format!(
            "<script>window.__renderBudgetMs = {};</script><script>{}</script>",
            budget.as_millis(),
            READINESS_PROBE
        );
        match markup.rfind("</body>") {
            Some(index) => {
                let mut out = String::with_capacity(markup.len() + script.len());
                out.push_str(&markup[..index]);
                out.push_str(&script);
                out.push_str(&markup[index..]);
                out
            }
            None => format!("{markup}{script}"),
        }
    }

    async fn run(
        &self,
        markup: &str,
        viewport: Viewport,
        budget: Duration,
        output_flag: &str,
        output_name: &str,
    ) -> Result<Vec<u8>, BrowserError> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("unit.html");
        let output = workdir.path().join(output_name);
        let profile = workdir.path().join("profile");

        tokio::fs::write(&input, Self::instrument(markup, budget)).await?;

        let mut command = Command::new(&self.executable);
        command
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--allow-file-access-from-files")
            .arg(format!("--user-data-dir={}", profile.display()))
            .arg(format!("--window-size={},{}", viewport.width, viewport.height))
            .arg(format!("--virtual-time-budget={}", budget.as_millis()))
            .arg(format!("--timeout={}", budget.as_millis()))
            .arg(format!("{output_flag}={}", output.display()))
            .arg(format!("file://{}", input.display()))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            target = "lucido::browser",
            source = SOURCE,
            executable = %self.executable.display(),
            budget_ms = budget.as_millis() as u64,
            "launching headless render"
        );

        // Grace on top of the in-page budget: process startup and encode
        // time are outside virtual time.
        let deadline = budget + Duration::from_secs(20);
        let child = command
            .spawn()
            .map_err(|err| BrowserError::Unavailable(err.to_string()))?;
        let result = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| BrowserError::Timeout(deadline))??;

        if !result.status.success() {
            return Err(BrowserError::Failed {
                status: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        let bytes = tokio::fs::read(&output).await.map_err(|_| BrowserError::Failed {
            status: 0,
            stderr: format!("render produced no output at {}", output.display()),
        })?;
        Ok(bytes)
    }
}

#[async_trait]
impl RenderSurface for HeadlessChromium {
    async fn render_to_image(
        &self,
        markup: &str,
        viewport: Viewport,
        budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        self.run(markup, viewport, budget, "--screenshot", "unit.png")
            .await
    }

    async fn render_to_pdf(
        &self,
        markup: &str,
        viewport: Viewport,
        budget: Duration,
    ) -> Result<Vec<u8>, BrowserError> {
        self.run(markup, viewport, budget, "--print-to-pdf", "unit.pdf")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_injected_before_body_end() {
        let markup = "<html><body><h1>Hi</h1></body></html>";
        let out = HeadlessChromium::instrument(markup, Duration::from_secs(5));
        let probe_at = out.find("__renderBudgetMs").unwrap();
        let body_end = out.rfind("</body>").unwrap();
        assert!(probe_at < body_end);
        assert!(out.contains("window.__renderBudgetMs = 5000;"));
    }

    #[test]
    fn probe_is_appended_without_body() {
        let out = HeadlessChromium::instrument("<p>fragment</p>", Duration::from_secs(1));
        assert!(out.starts_with("<p>fragment</p>"));
        assert!(out.contains("lucido:ready"));
    }
}
