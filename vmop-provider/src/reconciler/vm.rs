//! VM reconciler - reconciles VirtualMachine objects with the backend.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::create::{CreateOutcome, Orchestrator};
use super::update::UpdateSession;
use super::{ReconcileOutcome, Reconciler};
use crate::clients::{Clients, PropertyMask};
use crate::config::ProviderConfig;
use crate::error::{Classifier, ProviderError, ReconcileError, Result, ResultExt};
use crate::gate::CreateGate;
use crate::model::{BackendPowerState, PowerState, VirtualMachine};

/// VM reconciler that interacts with the backend through [`Clients`].
pub struct VirtualMachineReconciler {
    clients: Clients,
    config: ProviderConfig,
    gate: CreateGate,
    classifier: Classifier,
}

impl VirtualMachineReconciler {
    pub fn new(clients: Clients, config: ProviderConfig) -> Self {
        let gate = CreateGate::new(config.max_concurrent_creates);
        Self::with_gate(clients, config, gate)
    }

    /// Build a reconciler sharing an existing create gate.
    pub fn with_gate(clients: Clients, config: ProviderConfig, gate: CreateGate) -> Self {
        let classifier = config.classifier();
        Self {
            clients,
            config,
            gate,
            classifier,
        }
    }

    pub fn gate(&self) -> &CreateGate {
        &self.gate
    }

    fn classify(&self, vm: &VirtualMachine, err: ProviderError) -> ReconcileError {
        let classified = self.classifier.classify(&err);
        if classified.is_terminal() {
            warn!("Reconcile of VM {} failed: {}", vm.key(), err);
        } else {
            debug!("Reconcile of VM {} will be retried ({}): {}", vm.key(), classified, err);
        }
        classified
    }

    async fn reconcile_vm(&self, vm: &mut VirtualMachine) -> Result<ReconcileOutcome> {
        let existing = self
            .clients
            .backend
            .find_instance(vm)
            .await
            .context(format!("find VM {}", vm.key()))?;

        let (instance_id, outcome) = match existing {
            Some(id) => (id, ReconcileOutcome::Updated),
            None => {
                let orchestrator = Orchestrator::new(&self.clients, &self.config, &self.gate);
                match orchestrator.create(vm).await? {
                    CreateOutcome::Created(id) => (id, ReconcileOutcome::Created),
                    CreateOutcome::Deferred => return Ok(ReconcileOutcome::Deferred),
                }
            }
        };

        let mut session = UpdateSession::new(&self.clients, &self.config, &instance_id);
        let updated = session.update(vm).await;
        // Status is projected even when the update failed.
        let projected = session.project_status(vm).await;
        match (updated, projected) {
            (Err(e), Err(projection)) => {
                debug!("Status projection of VM {} failed: {}", vm.key(), projection);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(outcome),
        }
    }

    async fn finalize_vm(&self, vm: &mut VirtualMachine) -> Result<()> {
        let backend = &*self.clients.backend;
        let Some(instance_id) = backend
            .find_instance(vm)
            .await
            .context(format!("find VM {}", vm.key()))?
        else {
            debug!("VM {} has no backend instance, nothing to delete", vm.key());
            return Ok(());
        };

        let props = backend
            .get_properties(&instance_id, PropertyMask::SUMMARY)
            .await
            .context(format!("get properties of VM {}", vm.key()))?;
        if matches!(
            props.power_state(),
            Some(BackendPowerState::PoweredOn) | Some(BackendPowerState::Suspended)
        ) {
            info!("Powering off VM {} before delete", vm.key());
            backend
                .change_power_state(&instance_id, PowerState::Off)
                .await
                .context(format!("power off VM {}", vm.key()))?;
        }

        info!("Deleting VM {} ({})", vm.key(), instance_id);
        backend
            .delete(&instance_id)
            .await
            .context(format!("delete VM {}", vm.key()))?;
        vm.status.unique_id = None;
        vm.status.power_state = None;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for VirtualMachineReconciler {
    type Object = VirtualMachine;
    type Outcome = ReconcileOutcome;

    async fn reconcile(
        &self,
        vm: &mut VirtualMachine,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        info!("Reconciling VM {}", vm.key());
        match self.reconcile_vm(vm).await {
            Ok(outcome) => {
                debug!("Reconciled VM {}: {:?}", vm.key(), outcome);
                Ok(outcome)
            }
            Err(e) => Err(self.classify(vm, e)),
        }
    }

    async fn finalize(&self, vm: &mut VirtualMachine) -> std::result::Result<(), ReconcileError> {
        info!("Finalizing VM {}", vm.key());
        self.finalize_vm(vm).await.map_err(|e| self.classify(vm, e))
    }
}
