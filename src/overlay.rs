//! Selection-overlay geometry and styling
//!
//! Selections arrive as rectangles plus one shared style. Before capture the
//! compositor shifts each rectangle by the effective scroll offset, drops the
//! ones that end up entirely outside the viewport, and emits one JavaScript
//! draw instruction per surviving rectangle.

use crate::{Config, RenderError, Viewport};
use serde::{Deserialize, Serialize};

/// A rectangle to highlight on the rendered page.
///
/// `scroll_x`/`scroll_y` override the page scroll offset for this selection
/// only. Absent means "use the page's live scroll offset"; `Some(0)` is a
/// real override of zero.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionArea {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    #[serde(default)]
    pub scroll_x: Option<i64>,
    #[serde(default)]
    pub scroll_y: Option<i64>,
}

/// Border and opacity applied to every selection rectangle in a request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionStyle {
    pub border_color: String,
    pub border_width: u32,
    pub border_style: BorderStyle,
    pub opacity: f64,
}

impl SelectionStyle {
    pub fn validate(&self) -> Result<(), RenderError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(RenderError::Validation(
                "selection opacity must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderStyle {
    Solid,
    Dashed,
    Dotted,
}

impl BorderStyle {
    pub fn as_css(&self) -> &'static str {
        match self {
            BorderStyle::Solid => "solid",
            BorderStyle::Dashed => "dashed",
            BorderStyle::Dotted => "dotted",
        }
    }
}

impl std::str::FromStr for BorderStyle {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solid" => Ok(BorderStyle::Solid),
            "dashed" => Ok(BorderStyle::Dashed),
            "dotted" => Ok(BorderStyle::Dotted),
            other => Err(RenderError::Configuration(format!(
                "unknown border style: {other}"
            ))),
        }
    }
}

/// Default style when a request supplies none, sourced from config.
pub fn default_style(config: &Config) -> SelectionStyle {
    SelectionStyle {
        border_color: config.selection_color.clone(),
        border_width: config.selection_width,
        border_style: config.selection_style,
        opacity: config.selection_opacity,
    }
}

/// One rectangle to draw, already shifted into effective coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawInstruction {
    pub index: usize,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl DrawInstruction {
    /// Stable element id, usable to remove or inspect the rectangle later.
    pub fn element_id(&self) -> String {
        format!("selection-rect-{}", self.index)
    }

    /// JavaScript that appends the rectangle to the live page.
    ///
    /// The overlay must sit above all page content (maximum z-index) and must
    /// not intercept input or affect layout (pointer-events disabled,
    /// absolute positioning).
    pub fn script(&self, style: &SelectionStyle) -> String {
        format!(
            r#"(() => {{
    const div = document.createElement('div');
    div.id = '{id}';
    div.style.position = 'absolute';
    div.style.left = '{x}px';
    div.style.top = '{y}px';
    div.style.width = '{w}px';
    div.style.height = '{h}px';
    div.style.border = '{bw}px {bs} {bc}';
    div.style.opacity = '{op}';
    div.style.boxSizing = 'border-box';
    div.style.zIndex = '2147483647';
    div.style.pointerEvents = 'none';
    (document.body || document.documentElement).appendChild(div);
}})()"#,
            id = self.element_id(),
            x = self.x,
            y = self.y,
            w = self.width,
            h = self.height,
            bw = style.border_width,
            bs = style.border_style.as_css(),
            bc = style.border_color,
            op = style.opacity,
        )
    }
}

/// Validate selection dimensions before any browser resource is touched.
pub fn validate_selections(selections: &[SelectionArea]) -> Result<(), RenderError> {
    for selection in selections {
        if selection.width <= 0 || selection.height <= 0 {
            return Err(RenderError::Validation(
                "invalid selection dimensions: width and height must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

/// Compute draw instructions for a set of selections.
///
/// Effective coordinates are the selection coordinates plus the scroll
/// offset; a per-selection override takes precedence over the page offset,
/// per axis. Selections whose effective box does not intersect the viewport
/// rectangle are skipped silently, in keeping with the cull-invisible policy
/// (see DESIGN.md).
pub fn plan_overlays(
    selections: &[SelectionArea],
    page_scroll: (i64, i64),
    viewport: Viewport,
) -> Vec<DrawInstruction> {
    let mut instructions = Vec::with_capacity(selections.len());

    for (index, selection) in selections.iter().enumerate() {
        let scroll_x = selection.scroll_x.unwrap_or(page_scroll.0);
        let scroll_y = selection.scroll_y.unwrap_or(page_scroll.1);

        let x = selection.x + scroll_x;
        let y = selection.y + scroll_y;

        let visible = x < viewport.width as i64
            && x + selection.width > 0
            && y < viewport.height as i64
            && y + selection.height > 0;
        if !visible {
            tracing::debug!(index, "selection not visible in viewport, skipping");
            continue;
        }

        instructions.push(DrawInstruction {
            index,
            x,
            y,
            width: selection.width,
            height: selection.height,
        });
    }

    instructions
}
