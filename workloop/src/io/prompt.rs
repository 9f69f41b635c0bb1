//! Instruction payload rendering for one agent iteration.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::sentinel::{CHECKPOINT_CLOSE, CHECKPOINT_OPEN, COMPLETION_SENTINEL};
use crate::core::types::WorkItem;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

/// Everything the template needs for one iteration.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub item: &'a WorkItem,
    pub progress_path: &'a Path,
    pub branch: Option<&'a str>,
    /// 1-based number of the iteration about to run.
    pub iteration: u32,
}

#[derive(Debug, Serialize)]
struct ItemContext<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
    source_ref: &'a str,
}

/// Render the iteration payload sent to the agent on stdin.
pub fn render_iteration_prompt(input: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("iteration", ITERATION_TEMPLATE)
        .context("load iteration template")?;
    let template = env.get_template("iteration")?;
    let item = ItemContext {
        id: &input.item.id,
        title: &input.item.title,
        content: input.item.content.trim(),
        source_ref: &input.item.source_ref,
    };
    let rendered = template
        .render(context! {
            item => item,
            progress_path => input.progress_path.display().to_string(),
            branch => input.branch,
            iteration => input.iteration,
            completion => COMPLETION_SENTINEL,
            checkpoint_open => CHECKPOINT_OPEN,
            checkpoint_close => CHECKPOINT_CLOSE,
        })
        .context("render iteration template")?;
    Ok(rendered)
}
