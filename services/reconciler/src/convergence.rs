//! Security group convergence.
//!
//! Drives subnet to security group bindings toward the groups declared on
//! the event. Subnets are processed one at a time, in declared order, and
//! every remote operation is awaited before the next one starts. The first
//! failure stops convergence; nothing already applied is rolled back.

use azvnet_events::Subnet;
use azvnet_reconcile::{plan_binding, BindingPlan, ConvergenceStatus, PollPolicy};
use tracing::{debug, info, instrument, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::provider::{await_operation, SecurityGroupBindings};

/// Outcome of one convergence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub subnets_examined: u32,
    pub subnets_unchanged: u32,
    pub detached: u32,
    pub attached: u32,
}

impl ConvergenceReport {
    pub fn status(&self) -> ConvergenceStatus {
        if self.detached == 0 && self.attached == 0 {
            ConvergenceStatus::Converged
        } else {
            ConvergenceStatus::Changed
        }
    }
}

/// Aligns actual subnet bindings with desired ones.
#[derive(Debug, Clone)]
pub struct ConvergenceEngine {
    poll: PollPolicy,
}

impl ConvergenceEngine {
    pub fn new(poll: PollPolicy) -> Self {
        Self { poll }
    }

    /// Converge every subnet of `network`.
    #[instrument(skip(self, bindings, subnets), fields(subnet_count = subnets.len()))]
    pub async fn converge<B>(
        &self,
        bindings: &B,
        network: &str,
        subnets: &[Subnet],
    ) -> HandlerResult<ConvergenceReport>
    where
        B: SecurityGroupBindings + ?Sized,
    {
        let mut report = ConvergenceReport::default();

        for subnet in subnets {
            report.subnets_examined += 1;

            let actual = bindings
                .subnet_security_group(network, &subnet.name)
                .await
                .map_err(|e| {
                    convergence_error(subnet, subnet.desired_security_group().unwrap_or(""), e)
                })?;

            let plan = plan_binding(actual.as_deref(), subnet.desired_security_group());
            if plan.is_noop() {
                debug!(subnet = %subnet.name, "Security group already converged");
                report.subnets_unchanged += 1;
                continue;
            }

            self.apply(bindings, network, subnet, &plan, &mut report)
                .await?;
        }

        info!(
            network,
            examined = report.subnets_examined,
            unchanged = report.subnets_unchanged,
            detached = report.detached,
            attached = report.attached,
            "Security group convergence complete"
        );

        Ok(report)
    }

    async fn apply<B>(
        &self,
        bindings: &B,
        network: &str,
        subnet: &Subnet,
        plan: &BindingPlan,
        report: &mut ConvergenceReport,
    ) -> HandlerResult<()>
    where
        B: SecurityGroupBindings + ?Sized,
    {
        if let Some(group) = &plan.detach {
            info!(subnet = %subnet.name, group = %group, "Disassociating security group");
            let handle = bindings
                .disassociate_security_group(group, network, &subnet.name)
                .await
                .map_err(|e| convergence_error(subnet, group, e))?;
            await_operation(bindings, &handle, &subnet.name, &self.poll)
                .await
                .map_err(|e| convergence_error(subnet, group, e))?;
            report.detached += 1;
        }

        if let Some(group) = &plan.attach {
            info!(subnet = %subnet.name, group = %group, "Associating security group");
            let handle = bindings
                .associate_security_group(group, network, &subnet.name)
                .await
                .map_err(|e| convergence_error(subnet, group, e))?;
            await_operation(bindings, &handle, &subnet.name, &self.poll)
                .await
                .map_err(|e| convergence_error(subnet, group, e))?;
            report.attached += 1;
        }

        Ok(())
    }
}

fn convergence_error(subnet: &Subnet, group: &str, reason: impl std::fmt::Display) -> HandlerError {
    warn!(subnet = %subnet.name, group, error = %reason, "Security group convergence failed");
    HandlerError::Convergence {
        subnet: subnet.name.clone(),
        security_group: group.to_string(),
        reason: reason.to_string(),
    }
}
