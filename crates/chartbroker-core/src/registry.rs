use chartbroker_release::Values;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the broker remembers about a provisioned instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Values,
    pub release_name: String,
    pub namespace: String,
    /// Reserved by a provision whose install has not returned yet.
    #[serde(default)]
    pub provisioning: bool,
}

impl ServiceInstance {
    /// Two provision requests are the same request when service, plan and
    /// parameters agree. Release name, namespace and the pending flag are not
    /// compared.
    pub fn matches(&self, other: &ServiceInstance) -> bool {
        self.service_id == other.service_id
            && self.plan_id == other.plan_id
            && self.parameters == other.parameters
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Inserted,
    /// An instance with the same id was already recorded; nothing changed.
    Existing(ServiceInstance),
}

/// Process-local map of instance id to [`ServiceInstance`].
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, ServiceInstance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.lock().get(instance_id).cloned()
    }

    /// Insert `instance` unless its id is taken. Check and insert happen
    /// under one lock.
    pub fn put(&self, instance: ServiceInstance) -> PutOutcome {
        let mut instances = self.lock();
        if let Some(existing) = instances.get(&instance.instance_id) {
            return PutOutcome::Existing(existing.clone());
        }
        instances.insert(instance.instance_id.clone(), instance);
        PutOutcome::Inserted
    }

    pub fn delete(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.lock().remove(instance_id)
    }

    /// Overwrite an existing record. Returns false when the id is unknown.
    pub fn replace(&self, instance: ServiceInstance) -> bool {
        let mut instances = self.lock();
        match instances.get_mut(&instance.instance_id) {
            Some(slot) => {
                *slot = instance;
                true
            }
            None => false,
        }
    }

    /// Clear the pending flag of a reserved record. Returns false when the id
    /// is unknown.
    pub fn complete(&self, instance_id: &str) -> bool {
        match self.lock().get_mut(instance_id) {
            Some(slot) => {
                slot.provisioning = false;
                true
            }
            None => false,
        }
    }

    /// Remove the record only while it is still pending.
    pub fn release_reservation(&self, instance_id: &str) -> Option<ServiceInstance> {
        let mut instances = self.lock();
        if instances.get(instance_id).is_some_and(|i| i.provisioning) {
            return instances.remove(instance_id);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
