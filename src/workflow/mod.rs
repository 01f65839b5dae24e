pub mod extraction;
pub mod item_ctx;

pub use extraction::{is_at_entry, ExtractionFlow, Extractor, FlowSettings, ResultPresentation};
pub use item_ctx::ItemCtx;
