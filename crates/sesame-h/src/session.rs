//! `ChallengeSession` / `ChallengeSurface` over a chromiumoxide page.
//!
//! Two surface variants share the same capability interface: the
//! top-level page, and a nested iframe reached through its
//! `contentDocument` with geometry translated back into viewport
//! coordinates (pointer events are dispatched viewport-rooted regardless
//! of which frame owns the widget).

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, Viewport,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use sesame_common::SurfaceError;
use sesame_engine::{ChallengeSession, ChallengeSurface, ElementInfo, ViewportBox};

/// Sentinel the frame JS returns when its iframe is gone or unreadable.
const DETACHED: &str = "detached";

/// Errors CDP raises while a page is navigating or a frame is torn down.
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

fn map_cdp_err(e: chromiumoxide::error::CdpError) -> SurfaceError {
    let msg = e.to_string();
    if is_context_error(&msg) {
        SurfaceError::Detached
    } else {
        SurfaceError::Evaluation(msg)
    }
}

async fn eval_json(page: &Page, expr: &str) -> Result<Value, SurfaceError> {
    let result = page.evaluate(expr).await.map_err(map_cdp_err)?;
    result
        .into_value::<Value>()
        .map_err(|e| SurfaceError::Evaluation(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ElementJs {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    visible: bool,
}

impl From<ElementJs> for ElementInfo {
    fn from(el: ElementJs) -> Self {
        ElementInfo {
            visible: el.visible,
            bbox: ViewportBox {
                x: el.x,
                y: el.y,
                width: el.width,
                height: el.height,
            },
        }
    }
}

fn parse_element(value: Value) -> Result<Option<ElementInfo>, SurfaceError> {
    if value.is_null() {
        return Ok(None);
    }
    if value.as_str() == Some(DETACHED) {
        return Err(SurfaceError::Detached);
    }
    let el: ElementJs = serde_json::from_value(value)
        .map_err(|e| SurfaceError::Evaluation(format!("bad element payload: {e}")))?;
    Ok(Some(el.into()))
}

async fn clipped_screenshot(page: &Page, info: &ElementInfo) -> Result<Vec<u8>, SurfaceError> {
    let params = CaptureScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .clip(Viewport {
            x: info.bbox.x,
            y: info.bbox.y,
            width: info.bbox.width,
            height: info.bbox.height,
            scale: 1.0,
        })
        .build();
    let response = page
        .execute(params)
        .await
        .map_err(|e| SurfaceError::Screenshot(e.to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(&response.data)
        .map_err(|e| SurfaceError::Screenshot(format!("base64 decode failed: {e}")))
}

/// The top-level page as a challenge surface.
pub struct PageSurface {
    page: Page,
}

impl PageSurface {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl ChallengeSurface for PageSurface {
    async fn query(&self, selector: &str) -> Result<Option<ElementInfo>, SurfaceError> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let expr = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                const s = window.getComputedStyle(el);
                const visible = r.width > 0 && r.height > 0
                    && s.visibility !== 'hidden' && s.display !== 'none';
                return {{ x: r.left, y: r.top, width: r.width, height: r.height, visible }};
            }})()"#
        );
        parse_element(eval_json(&self.page, &expr).await?)
    }

    async fn text_contains(&self, phrase: &str) -> Result<bool, SurfaceError> {
        let phrase = serde_json::to_string(&phrase.to_lowercase())
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let expr = format!(
            r#"(() => {{
                const body = document.body;
                return body ? body.innerText.toLowerCase().includes({phrase}) : false;
            }})()"#
        );
        Ok(eval_json(&self.page, &expr).await?.as_bool().unwrap_or(false))
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Option<Vec<u8>>, SurfaceError> {
        match self.query(selector).await? {
            Some(info) if info.bbox.width > 0.0 && info.bbox.height > 0.0 => {
                Ok(Some(clipped_screenshot(&self.page, &info).await?))
            }
            _ => Ok(None),
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, SurfaceError> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let expr = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.click();
                return true;
            }})()"#
        );
        Ok(eval_json(&self.page, &expr).await?.as_bool().unwrap_or(false))
    }

    fn describe(&self) -> String {
        "page".into()
    }
}

/// A nested iframe as a challenge surface, addressed by its index in the
/// page's iframe list. Cross-origin frames read as detached and get
/// skipped by the locator.
pub struct FrameSurface {
    page: Page,
    index: usize,
}

impl FrameSurface {
    pub fn new(page: Page, index: usize) -> Self {
        Self { page, index }
    }

    fn frame_prelude(&self) -> String {
        format!(
            r#"const f = document.querySelectorAll('iframe')[{index}];
               if (!f) return '{DETACHED}';
               let doc = null;
               try {{ doc = f.contentDocument; }} catch (e) {{ return '{DETACHED}'; }}
               if (!doc || !doc.body) return '{DETACHED}';"#,
            index = self.index
        )
    }
}

#[async_trait]
impl ChallengeSurface for FrameSurface {
    async fn query(&self, selector: &str) -> Result<Option<ElementInfo>, SurfaceError> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let prelude = self.frame_prelude();
        let expr = format!(
            r#"(() => {{
                {prelude}
                const el = doc.querySelector({sel});
                if (!el) return null;
                const fr = f.getBoundingClientRect();
                const r = el.getBoundingClientRect();
                const s = f.contentWindow.getComputedStyle(el);
                const visible = r.width > 0 && r.height > 0
                    && s.visibility !== 'hidden' && s.display !== 'none';
                return {{
                    x: fr.left + r.left, y: fr.top + r.top,
                    width: r.width, height: r.height, visible
                }};
            }})()"#
        );
        parse_element(eval_json(&self.page, &expr).await?)
    }

    async fn text_contains(&self, phrase: &str) -> Result<bool, SurfaceError> {
        let phrase = serde_json::to_string(&phrase.to_lowercase())
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let prelude = self.frame_prelude();
        let expr = format!(
            r#"(() => {{
                {prelude}
                return doc.body.innerText.toLowerCase().includes({phrase});
            }})()"#
        );
        let value = eval_json(&self.page, &expr).await?;
        if value.as_str() == Some(DETACHED) {
            return Err(SurfaceError::Detached);
        }
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Option<Vec<u8>>, SurfaceError> {
        match self.query(selector).await? {
            Some(info) if info.bbox.width > 0.0 && info.bbox.height > 0.0 => {
                Ok(Some(clipped_screenshot(&self.page, &info).await?))
            }
            _ => Ok(None),
        }
    }

    async fn click(&self, selector: &str) -> Result<bool, SurfaceError> {
        let sel = serde_json::to_string(selector)
            .map_err(|e| SurfaceError::Evaluation(e.to_string()))?;
        let prelude = self.frame_prelude();
        let expr = format!(
            r#"(() => {{
                {prelude}
                const el = doc.querySelector({sel});
                if (!el) return false;
                el.click();
                return true;
            }})()"#
        );
        let value = eval_json(&self.page, &expr).await?;
        if value.as_str() == Some(DETACHED) {
            return Err(SurfaceError::Detached);
        }
        Ok(value.as_bool().unwrap_or(false))
    }

    fn describe(&self) -> String {
        format!("iframe[{}]", self.index)
    }
}

/// A live browser page as the solver's challenge session.
pub struct CdpSession {
    page: Page,
}

impl CdpSession {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn dispatch_mouse(&self, params: DispatchMouseEventParams) -> Result<(), SurfaceError> {
        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(|e| SurfaceError::Input(e.to_string()))
    }
}

#[async_trait]
impl ChallengeSession for CdpSession {
    async fn surfaces(&self) -> Result<Vec<Arc<dyn ChallengeSurface>>, SurfaceError> {
        let count = eval_json(&self.page, "document.querySelectorAll('iframe').length")
            .await?
            .as_u64()
            .unwrap_or(0) as usize;

        let mut surfaces: Vec<Arc<dyn ChallengeSurface>> =
            Vec::with_capacity(count + 1);
        surfaces.push(Arc::new(PageSurface::new(self.page.clone())));
        for index in 0..count {
            surfaces.push(Arc::new(FrameSurface::new(self.page.clone(), index)));
        }
        Ok(surfaces)
    }

    async fn has_cookie(&self, name: &str) -> Result<bool, SurfaceError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| SurfaceError::Session(format!("Get cookies failed: {}", e)))?;
        Ok(cookies.iter().any(|c| c.name == name))
    }

    async fn pointer_down(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| SurfaceError::Input(format!("Failed to build mouse event: {:?}", e)))?;
        self.dispatch_mouse(params).await
    }

    async fn pointer_move(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .buttons(1)
            .build()
            .map_err(|e| SurfaceError::Input(format!("Failed to build mouse event: {:?}", e)))?;
        self.dispatch_mouse(params).await
    }

    async fn pointer_up(&self, x: f64, y: f64) -> Result<(), SurfaceError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| SurfaceError::Input(format!("Failed to build mouse event: {:?}", e)))?;
        self.dispatch_mouse(params).await
    }
}
