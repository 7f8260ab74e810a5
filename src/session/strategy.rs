// SPDX-License-Identifier: GPL-3.0-only

//! Session configuration strategies
//!
//! Hardware services either accept explicit output configurations (which also
//! carry the session type) or only a raw target list. The controller picks one
//! strategy at construction and uses it for every configuration request.

use super::targets::SessionPlan;
use crate::backends::camera::{
    BackendResult, DeviceHandle, ExecutionContext, HardwareService, OutputConfiguration, SessionCallback,
    SessionConfiguration, SessionType,
};
use crate::config::SessionStrategyKind;
use tracing::{debug, info};

pub trait SessionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request a session for `plan`; the outcome arrives on `callback`
    fn configure(
        &self,
        device: &DeviceHandle,
        plan: &SessionPlan,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()>;
}

/// One output configuration per target, session type from the plan
pub struct OutputConfigurationStrategy;

impl SessionStrategy for OutputConfigurationStrategy {
    fn name(&self) -> &'static str {
        "output-configurations"
    }

    fn configure(
        &self,
        device: &DeviceHandle,
        plan: &SessionPlan,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        let configuration = SessionConfiguration {
            session_type: plan.session_type,
            outputs: plan.targets.iter().cloned().map(OutputConfiguration::new).collect(),
        };
        debug!(
            device = %device.id(),
            outputs = configuration.outputs.len(),
            session_type = ?configuration.session_type,
            "Configuring session from output configurations"
        );
        device.create_session(configuration, callback, context)
    }
}

/// Raw target list; always yields a regular session
pub struct TargetListStrategy;

impl SessionStrategy for TargetListStrategy {
    fn name(&self) -> &'static str {
        "target-list"
    }

    fn configure(
        &self,
        device: &DeviceHandle,
        plan: &SessionPlan,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        if plan.session_type != SessionType::Regular {
            debug!(device = %device.id(), "Target-list path cannot request a high-speed session, using regular");
        }
        debug!(device = %device.id(), targets = plan.targets.len(), "Configuring session from target list");
        device.create_session_with_targets(plan.targets.clone(), callback, context)
    }
}

/// Pick the strategy once from config and hardware capability
pub fn select_strategy(kind: SessionStrategyKind, hardware: &dyn HardwareService) -> Box<dyn SessionStrategy> {
    let strategy: Box<dyn SessionStrategy> = match kind {
        SessionStrategyKind::OutputConfigurations => Box::new(OutputConfigurationStrategy),
        SessionStrategyKind::TargetList => Box::new(TargetListStrategy),
        SessionStrategyKind::Auto if hardware.supports_session_configuration() => {
            Box::new(OutputConfigurationStrategy)
        }
        SessionStrategyKind::Auto => Box::new(TargetListStrategy),
    };
    info!(strategy = strategy.name(), "Selected session configuration strategy");
    strategy
}
