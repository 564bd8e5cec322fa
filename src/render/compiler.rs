//! Cell compiler: turns a template + viewer + context into a rendered cell.
//!
//! `compile` never fails: internal errors produce a clearly marked
//! placeholder cell and a warning logged once per template. The compiler is
//! deliberately not `Sync`: the optional external substitution service is
//! only safe on the control loop, and holding it here keeps the whole
//! compiler pinned there.

use crate::context::{contains_token, referenced_keys, RenderContext};
use crate::panel::{CellTemplate, PanelId, RenderedCell, TemplateId, ViewerId};
use crate::render::cache::{CacheKey, CellCache};
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

/// Maximum display width of a rendered title, in columns.
const MAX_TITLE_WIDTH: usize = 64;

/// Optional external text-substitution service.
///
/// Implementations are not required to be `Send` or `Sync`; the engine
/// only ever calls this on the control loop.
pub trait TextSubstituter {
    /// Resolve remaining tokens in `text` for `viewer`.
    fn resolve(&self, viewer: ViewerId, text: &str) -> String;
}

/// Compiles cell templates, consulting the shared cache first.
pub struct CellCompiler {
    cache: Arc<CellCache>,
    substituter: Option<Box<dyn TextSubstituter>>,
    /// Templates that already logged a compile failure.
    logged: RefCell<HashSet<TemplateId>>,
}

impl CellCompiler {
    /// Create a compiler over a shared cache, without an external
    /// substitution service (tokens unresolved by the context stay
    /// literal).
    pub fn new(cache: Arc<CellCache>) -> Self {
        Self {
            cache,
            substituter: None,
            logged: RefCell::new(HashSet::new()),
        }
    }

    /// Attach the external substitution service.
    #[must_use]
    pub fn with_substituter(mut self, substituter: Box<dyn TextSubstituter>) -> Self {
        self.substituter = Some(substituter);
        self
    }

    /// The shared cache handle.
    pub fn cache(&self) -> &Arc<CellCache> {
        &self.cache
    }

    /// Compile a template for a viewer under a context.
    ///
    /// Cacheable templates route through the cache; identical inputs
    /// compile to value-equal output on either path. Templates marked
    /// non-cacheable, and calls whose text still needs the per-request
    /// external service after context substitution, never produce a key.
    pub fn compile(
        &self,
        panel: &PanelId,
        template: &CellTemplate,
        viewer: ViewerId,
        context: &RenderContext,
    ) -> RenderedCell {
        if template.cacheable && !self.needs_external(template, context) {
            let key = cache_key(panel, template, context);
            return self
                .cache
                .get_or_insert_with(&key, viewer, || self.build(template, viewer, context));
        }
        self.build(template, viewer, context)
    }

    /// Compile without consulting or populating the cache.
    ///
    /// Animation frames are transient; caching them would only churn the
    /// cache.
    pub fn compile_uncached(
        &self,
        template: &CellTemplate,
        viewer: ViewerId,
        context: &RenderContext,
    ) -> RenderedCell {
        self.build(template, viewer, context)
    }

    /// Whether the template's text still carries tokens the external
    /// service would resolve per-request.
    fn needs_external(&self, template: &CellTemplate, context: &RenderContext) -> bool {
        if self.substituter.is_none() {
            return false;
        }
        let mut keys = Vec::new();
        template_keys(template, &mut keys);
        keys.iter().any(|key| context.value(key).is_none())
    }

    fn build(
        &self,
        template: &CellTemplate,
        viewer: ViewerId,
        context: &RenderContext,
    ) -> RenderedCell {
        match self.try_build(template, viewer, context) {
            Ok(cell) => cell,
            Err(reason) => {
                if self.logged.borrow_mut().insert(template.id.clone()) {
                    warn!(template = %template.id, %reason, "cell compile failed, serving placeholder");
                }
                RenderedCell::placeholder()
            }
        }
    }

    fn try_build(
        &self,
        template: &CellTemplate,
        viewer: ViewerId,
        context: &RenderContext,
    ) -> Result<RenderedCell, String> {
        let title = self.resolve_text(&template.title, viewer, context)?;
        let body = template
            .body
            .iter()
            .map(|line| self.resolve_text(line, viewer, context))
            .collect::<Result<Vec<_>, _>>()?;

        let mut visual = self.resolve_text(&template.visual, viewer, context)?;
        if let Some(variant_key) = &template.variant_key {
            if let Some(value) = context.value(variant_key) {
                if let Some(variant) = template.variants.get(value) {
                    debug!(template = %template.id, variant = %value, "variant selected");
                    visual.clone_from(variant);
                }
            }
        }
        if visual.is_empty() {
            return Err("resolved visual id is empty".to_string());
        }

        Ok(RenderedCell::new(visual)
            .with_title(truncate_display(&title, MAX_TITLE_WIDTH))
            .with_body(body)
            .with_tags(template.tags.clone())
            .with_accents(template.accents))
    }

    /// Context substitution, then the external service for whatever is
    /// left. The external collaborator is untrusted: a panic inside it is
    /// contained to this one cell.
    ///
    /// The token scanner decides whether the service runs at all, the same
    /// predicate `needs_external` uses. Stray braces stay literal and never
    /// pull a per-request result onto the cacheable path.
    fn resolve_text(
        &self,
        text: &str,
        viewer: ViewerId,
        context: &RenderContext,
    ) -> Result<String, String> {
        let resolved = context.substitute(text);
        match &self.substituter {
            Some(substituter) if contains_token(&resolved) => {
                catch_unwind(AssertUnwindSafe(|| substituter.resolve(viewer, &resolved)))
                    .map_err(|_| "substitution service panicked".to_string())
            }
            _ => Ok(resolved),
        }
    }
}

/// Compute the cache key for a cacheable template under a context.
///
/// The hash covers exactly the substitution values the template's text
/// references (plus the variant selector), sorted by key so map iteration
/// order cannot leak into the fingerprint.
pub fn cache_key(panel: &PanelId, template: &CellTemplate, context: &RenderContext) -> CacheKey {
    let mut keys = Vec::new();
    template_keys(template, &mut keys);
    keys.sort_unstable();

    let mut hasher = DefaultHasher::new();
    for key in keys {
        key.hash(&mut hasher);
        context.value(key).hash(&mut hasher);
    }
    CacheKey {
        panel: panel.clone(),
        template: template.id.clone(),
        context_hash: hasher.finish(),
    }
}

/// Collect every substitution key that can affect the template's output.
fn template_keys<'a>(template: &'a CellTemplate, out: &mut Vec<&'a str>) {
    referenced_keys(&template.visual, out);
    referenced_keys(&template.title, out);
    for line in &template.body {
        referenced_keys(line, out);
    }
    if let Some(variant_key) = &template.variant_key {
        if !out.contains(&variant_key.as_str()) {
            out.push(variant_key);
        }
    }
}

/// Truncate to a display width, never splitting a grapheme cluster.
fn truncate_display(text: &str, max_cols: usize) -> String {
    if text.width() <= max_cols {
        return text.to_string();
    }
    let mut out = String::new();
    let mut cols = 0;
    for grapheme in text.graphemes(true) {
        let w = grapheme.width();
        if cols + w > max_cols {
            break;
        }
        cols += w;
        out.push_str(grapheme);
    }
    out
}
