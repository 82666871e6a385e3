// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only deployment descriptor model consumed by the hook mechanism.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// First descriptor schema version that supports hooks.
pub const HOOKS_MIN_SCHEMA_VERSION: u32 = 3;

/// Descriptor of a multi-module deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    /// Schema version, e.g. `"3.3"`.
    pub schema_version: String,
    /// Deployment identifier.
    pub id: String,
    /// Modules in declaration order.
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl DeploymentDescriptor {
    /// Major component of the schema version; unparsable versions count as 0.
    pub fn major_schema_version(&self) -> u32 {
        self.schema_version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Module with the given name.
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// Copy of `module` tagged with this descriptor's major schema version.
    pub fn resolve_module(&self, name: &str) -> Option<Module> {
        self.module(name).cloned().map(|mut module| {
            module.major_schema_version = self.major_schema_version();
            module
        })
    }
}

/// One deployable module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name, unique within the descriptor.
    pub name: String,
    /// Major schema version of the descriptor the module came from.
    #[serde(default = "default_major_schema_version")]
    pub major_schema_version: u32,
    /// Declared hooks.
    #[serde(default)]
    pub hooks: Vec<Hook>,
}

fn default_major_schema_version() -> u32 {
    HOOKS_MIN_SCHEMA_VERSION
}

impl Module {
    /// Hooks bound to `phase`. Empty for pre-hook schema versions.
    pub fn hooks_for(&self, phase: HookPhase) -> impl Iterator<Item = &Hook> {
        let enabled = self.major_schema_version >= HOOKS_MIN_SCHEMA_VERSION;
        self.hooks
            .iter()
            .filter(move |hook| enabled && hook.has_phase(phase))
    }
}

/// Extra unit of work bound to one or more phases of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Hook name, unique within the module.
    pub name: String,
    /// Hook type; only `task` hooks are executable.
    #[serde(rename = "type", default = "default_hook_kind")]
    pub kind: String,
    /// Phase tags as written in the descriptor.
    #[serde(default)]
    pub phases: Vec<String>,
    /// Hook parameters (task name, command, memory, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

fn default_hook_kind() -> String {
    "task".to_string()
}

impl Hook {
    /// Declared phases that are known tags.
    pub fn hook_phases(&self) -> impl Iterator<Item = HookPhase> + '_ {
        self.phases.iter().filter_map(|tag| tag.parse().ok())
    }

    /// Whether the hook is bound to `phase`.
    pub fn has_phase(&self, phase: HookPhase) -> bool {
        self.hook_phases().any(|declared| declared == phase)
    }

    /// String parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|value| value.as_str())
    }
}

crate::impl_variable_value!(
    DeploymentDescriptor => "deployment-descriptor",
    Module => "module",
    Hook => "hook",
    Vec<Hook> => "hook-list",
);

/// Named extension point of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPhase {
    /// Before an application is stopped during a regular deployment.
    DeployApplicationBeforeStop,
    /// After an application is stopped during a regular deployment.
    DeployApplicationAfterStop,
    /// Before an application is started during a regular deployment.
    DeployApplicationBeforeStart,
    /// Blue-green: before the idle application is stopped.
    BlueGreenApplicationBeforeStopIdle,
    /// Blue-green: before the live application is stopped.
    BlueGreenApplicationBeforeStopLive,
    /// Blue-green: after the idle application is stopped.
    BlueGreenApplicationAfterStopIdle,
    /// Blue-green: after the live application is stopped.
    BlueGreenApplicationAfterStopLive,
    /// Blue-green: before the idle application is started.
    BlueGreenApplicationBeforeStartIdle,
    /// Blue-green: before the live application is started.
    BlueGreenApplicationBeforeStartLive,
    /// Blue-green: before routes of the live application are unmapped.
    BlueGreenApplicationBeforeUnmapRoutesLive,
}

impl HookPhase {
    /// Canonical tag of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::DeployApplicationBeforeStop => "deploy.application.before-stop",
            HookPhase::DeployApplicationAfterStop => "deploy.application.after-stop",
            HookPhase::DeployApplicationBeforeStart => "deploy.application.before-start",
            HookPhase::BlueGreenApplicationBeforeStopIdle => {
                "blue-green.application.before-stop.idle"
            }
            HookPhase::BlueGreenApplicationBeforeStopLive => {
                "blue-green.application.before-stop.live"
            }
            HookPhase::BlueGreenApplicationAfterStopIdle => "blue-green.application.after-stop.idle",
            HookPhase::BlueGreenApplicationAfterStopLive => "blue-green.application.after-stop.live",
            HookPhase::BlueGreenApplicationBeforeStartIdle => {
                "blue-green.application.before-start.idle"
            }
            HookPhase::BlueGreenApplicationBeforeStartLive => {
                "blue-green.application.before-start.live"
            }
            HookPhase::BlueGreenApplicationBeforeUnmapRoutesLive => {
                "blue-green.application.before-unmap-routes.live"
            }
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag not recognised as a hook phase.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hook phase '{0}'")]
pub struct UnknownHookPhase(pub String);

impl FromStr for HookPhase {
    type Err = UnknownHookPhase;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let phase = match tag {
            "deploy.application.before-stop" | "application.before-stop" => {
                HookPhase::DeployApplicationBeforeStop
            }
            "deploy.application.after-stop" | "application.after-stop" => {
                HookPhase::DeployApplicationAfterStop
            }
            "deploy.application.before-start" | "application.before-start" => {
                HookPhase::DeployApplicationBeforeStart
            }
            "blue-green.application.before-stop.idle" | "application.before-stop.idle" => {
                HookPhase::BlueGreenApplicationBeforeStopIdle
            }
            "blue-green.application.before-stop.live" | "application.before-stop.live" => {
                HookPhase::BlueGreenApplicationBeforeStopLive
            }
            "blue-green.application.after-stop.idle" | "application.after-stop.idle" => {
                HookPhase::BlueGreenApplicationAfterStopIdle
            }
            "blue-green.application.after-stop.live" | "application.after-stop.live" => {
                HookPhase::BlueGreenApplicationAfterStopLive
            }
            "blue-green.application.before-start.idle" => {
                HookPhase::BlueGreenApplicationBeforeStartIdle
            }
            "blue-green.application.before-start.live" => {
                HookPhase::BlueGreenApplicationBeforeStartLive
            }
            "blue-green.application.before-unmap-routes.live" | "application.before-unmap-routes" => {
                HookPhase::BlueGreenApplicationBeforeUnmapRoutesLive
            }
            other => return Err(UnknownHookPhase(other.to_string())),
        };
        Ok(phase)
    }
}
