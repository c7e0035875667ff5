//! Cluster rollout driver — applies an image to a whole [`Layout`] and
//! reports when it has converged.
//!
//! The update phase stamps each unit's `id` with the revision returned by
//! the orchestrator. The first failure aborts the phase; units stamped
//! before it keep their ids, and re-running the phase is safe because
//! per-unit updates are idempotent.
//!
//! The check phase requires every service to have a running deployment on
//! its stamped revision, and every permanent plain task to be running.
//! Transient tasks never take part.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use fleet_core::{resolve_repo, DeployKind, ImageRef, Layout, RevisionId, UnitRef};

use crate::error::{RolloutError, RolloutResult};
use crate::orchestrator::Orchestrator;

/// Drives update and check phases across a layout.
#[derive(Clone)]
pub struct ClusterDriver {
    orchestrator: Arc<dyn Orchestrator>,
    /// Image registry prefix, e.g. `{account}.dkr.ecr.{region}.amazonaws.com/`.
    registry: String,
    /// Deadline for each orchestrator call.
    call_timeout: Duration,
}

impl ClusterDriver {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        registry: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            registry: registry.into(),
            call_timeout,
        }
    }

    /// Update every unit in the layout to `{registry}{repo}:{tag}`.
    pub async fn update_layout(&self, layout: &mut Layout, tag: &str) -> RolloutResult<()> {
        let Layout { repo: layout_repo, clusters } = layout;

        for (cluster_name, cluster) in clusters.iter_mut() {
            let cluster_repo = cluster.repo.clone();
            for (kind, set) in cluster.task_sets_mut() {
                let set_repo = set.repo.clone();
                for (unit, task) in set.tasks.iter_mut() {
                    let repo = resolve_repo(
                        layout_repo,
                        cluster_repo.as_deref(),
                        set_repo.as_deref(),
                        task.repo.as_deref(),
                    );
                    let image = ImageRef::new(&self.registry, repo, tag).to_string();
                    let id = self
                        .update_unit(cluster_name, kind, unit, &image, task.temp)
                        .await?;
                    debug!(cluster = %cluster_name, %kind, %unit, %id, "unit updated");
                    task.id = Some(id);
                }
            }
        }

        info!(%tag, units = layout.unit_count(), "layout updated");
        Ok(())
    }

    /// Whether every participating unit has converged on its stamped revision.
    pub async fn check_layout(&self, layout: &Layout) -> RolloutResult<bool> {
        for unit in layout.units() {
            if !self.check_unit(&unit).await? {
                debug!(
                    cluster = %unit.cluster,
                    kind = %unit.kind,
                    unit = %unit.name,
                    "unit not converged"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn update_unit(
        &self,
        cluster: &str,
        kind: DeployKind,
        unit: &str,
        image: &str,
        transient: bool,
    ) -> RolloutResult<RevisionId> {
        match kind {
            DeployKind::Service => {
                self.bounded(
                    "update_service",
                    self.orchestrator.update_service(cluster, unit, image, transient),
                )
                .await
            }
            DeployKind::Task => {
                self.bounded(
                    "update_task",
                    self.orchestrator.update_task(cluster, unit, image, transient),
                )
                .await
            }
        }
    }

    async fn check_unit(&self, unit: &UnitRef<'_>) -> RolloutResult<bool> {
        if unit.kind == DeployKind::Task && unit.task.temp {
            return Ok(true);
        }
        // Never updated, so nothing to converge on yet.
        let Some(id) = unit.task.id.as_deref() else {
            return Ok(false);
        };
        match unit.kind {
            DeployKind::Service => {
                self.bounded(
                    "check_service",
                    self.orchestrator.check_service(unit.cluster, unit.name, id),
                )
                .await
            }
            DeployKind::Task => {
                self.bounded(
                    "check_task",
                    self.orchestrator.check_task(unit.cluster, unit.name, id, true),
                )
                .await
            }
        }
    }

    /// Run an orchestrator call under the per-call deadline.
    async fn bounded<T>(
        &self,
        op: &str,
        call: impl Future<Output = RolloutResult<T>>,
    ) -> RolloutResult<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                RolloutError::Orchestrator(format!(
                    "{op}: no response within {}ms",
                    self.call_timeout.as_millis()
                ))
            })?
    }
}
