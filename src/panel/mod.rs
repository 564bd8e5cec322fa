//! Panel data model: definitions, instances, and rendered cells.

mod cell;
mod definition;
mod id;
mod instance;

pub use cell::{CellAccents, RenderedCell, RenderedFrame};
pub use definition::{CellTemplate, PanelDefinition, PersistenceConfig};
pub use id::{AnimationId, PanelId, SessionId, Slot, TemplateId, ViewerId};
pub use instance::PanelInstance;
