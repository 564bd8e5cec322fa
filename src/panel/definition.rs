//! Panel definitions: the immutable template a panel is opened from.
//!
//! Definitions are loaded once by an external loader and shared read-only
//! as `Arc<PanelDefinition>` across every instance opened from them.

use crate::anim::AnimationConfig;
use crate::error::EngineError;
use crate::layout::{GridSize, PaginationConfig};
use crate::panel::{CellAccents, PanelId, Slot, TemplateId};
use std::collections::HashMap;

/// Static description of one cell within a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellTemplate {
    /// Template identity, unique within the definition.
    pub id: TemplateId,
    /// Base visual asset id. May contain `{key}` tokens.
    pub visual: String,
    /// Title text. May contain `{key}` tokens.
    pub title: String,
    /// Body lines. May contain `{key}` tokens.
    pub body: Vec<String>,
    /// Metadata tags passed through to the rendered cell.
    pub tags: Vec<String>,
    /// Action specs handed to the interaction dispatcher. The engine never
    /// interprets these.
    pub actions: Vec<String>,
    /// Context key selecting a visual variant, if any.
    pub variant_key: Option<String>,
    /// Visual variants keyed by the variant key's context value.
    pub variants: HashMap<String, String>,
    /// Accent flags applied to the rendered cell.
    pub accents: CellAccents,
    /// Whether compiled output may be cached. Templates whose content
    /// depends on per-request dynamics the cache key cannot capture must
    /// set this to `false`.
    pub cacheable: bool,
}

impl CellTemplate {
    /// Create a template with the given id and visual.
    pub fn new(id: impl Into<TemplateId>, visual: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            visual: visual.into(),
            title: String::new(),
            body: Vec::new(),
            tags: Vec::new(),
            actions: Vec::new(),
            variant_key: None,
            variants: HashMap::new(),
            accents: CellAccents::empty(),
            cacheable: true,
        }
    }

    /// Set the title text.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the body lines.
    #[must_use]
    pub fn with_body(mut self, body: Vec<String>) -> Self {
        self.body = body;
        self
    }

    /// Set the metadata tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the action list.
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.actions = actions;
        self
    }

    /// Select visuals by the context value of `key`.
    #[must_use]
    pub fn with_variants(
        mut self,
        key: impl Into<String>,
        variants: HashMap<String, String>,
    ) -> Self {
        self.variant_key = Some(key.into());
        self.variants = variants;
        self
    }

    /// Set the accent flags.
    #[must_use]
    pub const fn with_accents(mut self, accents: CellAccents) -> Self {
        self.accents = accents;
        self
    }

    /// Mark the template non-cacheable.
    #[must_use]
    pub const fn dynamic(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

/// Durable-state settings for a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Whether state for this panel is saved at all.
    pub enabled: bool,
    /// Schema version written into every row.
    pub schema_version: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schema_version: 1,
        }
    }
}

/// Immutable template for a panel's static layout and behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelDefinition {
    /// Panel identity.
    pub id: PanelId,
    /// Grid dimensions.
    pub size: GridSize,
    /// Fixed cell templates keyed by position.
    pub cells: HashMap<Slot, CellTemplate>,
    /// Named templates addressable by id: layout decorations and
    /// navigation cells resolve here.
    pub templates: HashMap<TemplateId, CellTemplate>,
    /// Pagination settings, when the panel pages dynamic content.
    pub pagination: Option<PaginationConfig>,
    /// Animations started when an instance opens.
    pub animations: Vec<AnimationConfig>,
    /// Durable-state settings.
    pub persistence: PersistenceConfig,
    /// Whether instances of this panel share one logical state.
    pub shared: bool,
}

impl PanelDefinition {
    /// Create a definition with the given id and grid size.
    pub fn new(id: impl Into<PanelId>, size: GridSize) -> Self {
        Self {
            id: id.into(),
            size,
            cells: HashMap::new(),
            templates: HashMap::new(),
            pagination: None,
            animations: Vec::new(),
            persistence: PersistenceConfig::default(),
            shared: false,
        }
    }

    /// Place a fixed cell template.
    #[must_use]
    pub fn with_cell(mut self, slot: Slot, template: CellTemplate) -> Self {
        self.cells.insert(slot, template);
        self
    }

    /// Register a named template, keyed by its own id.
    #[must_use]
    pub fn with_template(mut self, template: CellTemplate) -> Self {
        self.templates.insert(template.id.clone(), template);
        self
    }

    /// Set the pagination configuration.
    #[must_use]
    pub fn with_pagination(mut self, config: PaginationConfig) -> Self {
        self.pagination = Some(config);
        self
    }

    /// Add an animation.
    #[must_use]
    pub fn with_animation(mut self, config: AnimationConfig) -> Self {
        self.animations.push(config);
        self
    }

    /// Set the persistence configuration.
    #[must_use]
    pub const fn with_persistence(mut self, config: PersistenceConfig) -> Self {
        self.persistence = config;
        self
    }

    /// Mark the panel as shared between viewers.
    #[must_use]
    pub const fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// The template at a fixed slot, if any.
    pub fn template_at(&self, slot: Slot) -> Option<&CellTemplate> {
        self.cells.get(&slot)
    }

    /// A named template by id, if registered.
    pub fn template(&self, id: &TemplateId) -> Option<&CellTemplate> {
        self.templates.get(id)
    }

    /// Structural validation, run once by the loader's caller.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.size.rows == 0 || self.size.columns == 0 {
            return Err(EngineError::InvalidDefinition {
                panel: self.id.clone(),
                reason: format!("grid {}x{} is empty", self.size.rows, self.size.columns),
            });
        }
        // Slots are addressed by a u16 linear index.
        if self.size.slot_count() > u32::from(u16::MAX) {
            return Err(EngineError::InvalidDefinition {
                panel: self.id.clone(),
                reason: format!(
                    "grid {}x{} has more slots than are addressable",
                    self.size.rows, self.size.columns
                ),
            });
        }
        if let Some(slot) = self
            .cells
            .keys()
            .find(|slot| !self.size.contains(slot.index()))
        {
            return Err(EngineError::InvalidDefinition {
                panel: self.id.clone(),
                reason: format!("{slot} is outside the {}-slot grid", self.size.slot_count()),
            });
        }
        if let Some(config) = &self.pagination {
            if let Some(row) = config
                .rows
                .iter()
                .find(|row| row.chars().count() > usize::from(self.size.columns))
            {
                return Err(EngineError::InvalidDefinition {
                    panel: self.id.clone(),
                    reason: format!("layout row {row:?} is wider than the grid"),
                });
            }
            if let Some(missing) = config
                .decorations
                .values()
                .find(|id| !self.templates.contains_key(*id))
            {
                return Err(EngineError::InvalidDefinition {
                    panel: self.id.clone(),
                    reason: format!("decoration references unknown template {missing}"),
                });
            }
        }
        Ok(())
    }
}
