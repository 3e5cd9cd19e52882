//! Devices claimed during bootstrap, and the handles used to reach them.

use crate::device::{DeviceContext, DeviceId};
use std::collections::HashMap;

/// Registered devices in discovery order, plus the raw peripheral handle of each.
///
/// Membership only grows during bootstrap scans and is dropped as a whole
/// by [`Registry::clear`].
#[derive(Debug)]
pub struct Registry<P> {
    devices: Vec<DeviceContext>,
    peripherals: HashMap<DeviceId, P>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            peripherals: HashMap::new(),
        }
    }
}

impl<P> Registry<P> {
    /// Add a device; returns `false` (and changes nothing) if its id is already known.
    pub fn register(&mut self, context: DeviceContext, peripheral: P) -> bool {
        if self.contains(&context.id) {
            return false;
        }
        self.peripherals.insert(context.id.clone(), peripheral);
        self.devices.push(context);
        true
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|d| &d.id == id)
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceContext> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn peripheral(&self, id: &DeviceId) -> Option<&P> {
        self.peripherals.get(id)
    }

    /// Registered devices, in the order they were discovered.
    pub fn devices(&self) -> &[DeviceContext] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.peripherals.clear();
    }

    #[cfg(test)]
    pub(crate) fn forget_peripheral(&mut self, id: &DeviceId) {
        self.peripherals.remove(id);
    }
}
