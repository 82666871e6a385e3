// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route removal.

use async_trait::async_trait;
use deployflow_core::recovery::ErrorPolicy;
use deployflow_core::{Action, ProcessContext, Result, SyncStep};

use crate::vars;

/// Deletes the route named in `routeToDelete`. A route that is already gone
/// counts as deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteRouteStep;

impl Action for DeleteRouteStep {
    fn name(&self) -> &str {
        "delete-route"
    }

    fn error_message(&self, ctx: &ProcessContext) -> String {
        let route = ctx.get(&vars::ROUTE_TO_DELETE).ok().flatten().unwrap_or_default();
        format!("Error deleting route \"{route}\"")
    }

    fn error_policy(&self, _ctx: &ProcessContext) -> ErrorPolicy {
        ErrorPolicy::delete_style()
    }
}

#[async_trait]
impl SyncStep for DeleteRouteStep {
    async fn run(&self, ctx: &mut ProcessContext) -> Result<()> {
        let route = ctx.require(&vars::ROUTE_TO_DELETE)?;
        ctx.logger().info(format!("Deleting route \"{route}\"..."));
        ctx.client()?.delete_route(&route).await?;
        ctx.logger().debug(format!("Route \"{route}\" deleted"));
        Ok(())
    }
}
