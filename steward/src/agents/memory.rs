//! Pulls structured facts out of a successful step.

use tracing::{debug, instrument, warn};

use crate::core::memory::{MemoryUpdate, SharedContext};
use crate::core::parse::parse_memory_update;
use crate::core::types::{ExecutionRecord, Step};
use crate::io::model::Model;
use crate::io::prompt::PromptBuilder;

#[derive(Debug, Clone)]
pub struct MemoryExtractor {
    prompts: PromptBuilder,
}

impl MemoryExtractor {
    pub fn new(prompts: PromptBuilder) -> Self {
        Self { prompts }
    }

    /// Ask the model for an update. Any failure yields an empty update; the
    /// caller still has to verify the claimed files before merging.
    #[instrument(skip_all, fields(step_id = step.id, model = %model.id()))]
    pub fn extract(
        &self,
        step: &Step,
        record: &ExecutionRecord,
        ctx: &SharedContext,
        model: &dyn Model,
    ) -> MemoryUpdate {
        let prompt = match self.prompts.memory(step, record, ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render memory prompt");
                return MemoryUpdate::default();
            }
        };
        match model.invoke(&prompt) {
            Ok(response) => {
                let update = parse_memory_update(&response);
                debug!(
                    files = update.new_files.len(),
                    metrics = update.metrics.len(),
                    "memory update parsed"
                );
                update
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory model failed");
                MemoryUpdate::default()
            }
        }
    }
}
