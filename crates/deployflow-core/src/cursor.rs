// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advancing index over a collection stored in the context.
//!
//! The code driving a loop names its index variable in `indexVariableName`
//! and reads the index to decide whether to loop again. [`IncrementIndexStep`]
//! advances whichever index is active without knowing what is iterated.

use async_trait::async_trait;

use crate::context::ProcessContext;
use crate::error::Result;
use crate::step::{Action, SyncStep};
use crate::variables::Variable;
use crate::vars;

/// Operations on the active iteration index.
pub struct IterationCursor;

impl IterationCursor {
    /// Make `index` the active index and reset it to 0.
    pub fn begin(ctx: &mut ProcessContext, index: &Variable<u32>) -> Result<()> {
        ctx.set(&vars::INDEX_VARIABLE_NAME, index.name().to_string())?;
        ctx.set(index, 0)?;
        Ok(())
    }

    /// Handle of the active index.
    pub fn active(ctx: &ProcessContext) -> Result<Variable<u32>> {
        Ok(Variable::dynamic(ctx.require(&vars::INDEX_VARIABLE_NAME)?))
    }

    /// Current value of the active index; 0 when never written.
    pub fn current(ctx: &ProcessContext) -> Result<u32> {
        let index = Self::active(ctx)?;
        Ok(ctx.get(&index)?.unwrap_or(0))
    }

    /// Increment the active index and return the new value.
    pub fn advance(ctx: &mut ProcessContext) -> Result<u32> {
        let index = Self::active(ctx)?;
        let next = ctx.get(&index)?.unwrap_or(0).saturating_add(1);
        ctx.set(&index, next)?;
        Ok(next)
    }

    /// Whether `index` still points into a collection of `len` elements.
    pub fn has_next(ctx: &ProcessContext, index: &Variable<u32>, len: usize) -> Result<bool> {
        Ok((ctx.get(index)?.unwrap_or(0) as usize) < len)
    }
}

/// Advances the active iteration index by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementIndexStep;

impl Action for IncrementIndexStep {
    fn name(&self) -> &str {
        "increment-index"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        match ctx.get(&vars::INDEX_VARIABLE_NAME).ok().flatten() {
            Some(index) => format!("Error incrementing index \"{index}\""),
            None => "Error incrementing index".to_string(),
        }
    }
}

#[async_trait]
impl SyncStep for IncrementIndexStep {
    async fn run(&self, ctx: &mut ProcessContext) -> Result<()> {
        let next = IterationCursor::advance(ctx)?;
        ctx.logger().debug(format!("Advanced iteration index to {next}"));
        Ok(())
    }
}
