//! The binding service (§4.7): owns the live set of bindings and performs
//! total-restart reloads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use crate::binding::Binding;
use crate::error::BridgeError;

/// Owns a name-keyed collection of running [`Binding`]s. `reload` always
/// stops the entire current set before starting the new one — restart is
/// total, not a per-binding diff, matching the configuration-reload
/// contract (§4.7): no message is dispatched against a half-constructed
/// binding, and during the swap either the old or the new binding handles
/// each inbound message, never both, because the old set is fully stopped
/// before the new set's sources are started.
pub struct BindingService {
    bindings: StdMutex<BTreeMap<String, Arc<Binding>>>,
}

impl Default for BindingService {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingService {
    /// Build an empty, unstarted service.
    #[must_use]
    pub fn new() -> Self {
        Self { bindings: StdMutex::new(BTreeMap::new()) }
    }

    /// Start every binding in `bindings`. A binding that fails to start is
    /// logged and excluded from the service rather than aborting the whole
    /// call — it does not block the rest of the fleet.
    ///
    /// # Errors
    /// Returns an error only if every binding failed to start.
    pub fn start(&self, bindings: Vec<Arc<Binding>>) -> Result<(), BridgeError> {
        let total = bindings.len();
        let mut started = BTreeMap::new();
        for binding in bindings {
            let name = binding.name().to_string();
            match binding.start() {
                Ok(()) => {
                    started.insert(name, binding);
                }
                Err(err) => {
                    tracing::error!(binding = %name, error = %err, "binding failed to start, excluding from service");
                }
            }
        }
        if total > 0 && started.is_empty() {
            return Err(BridgeError::ConfigInvalid("no binding started successfully".to_string()));
        }
        *self.bindings.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = started;
        Ok(())
    }

    /// Stop every binding. Idempotent: a second call finds nothing to stop.
    pub async fn stop(&self) {
        let current = std::mem::take(&mut *self.bindings.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        for binding in current.into_values() {
            binding.stop().await;
        }
    }

    /// Stop the entire current binding set, then start `new_bindings`. The
    /// new set only takes effect once the old one has fully drained.
    ///
    /// # Errors
    /// Propagates [`BindingService::start`]'s error when every new binding
    /// fails to start; the service is left with no live bindings in that
    /// case (matching total-restart semantics — there is no rollback to the
    /// previous set).
    pub async fn reload(&self, new_bindings: Vec<Arc<Binding>>) -> Result<(), BridgeError> {
        self.stop().await;
        self.start(new_bindings)
    }

    /// The names of every currently live binding, in sorted order.
    #[must_use]
    pub fn binding_names(&self) -> Vec<String> {
        self.bindings.lock().unwrap_or_else(std::sync::PoisonError::into_inner).keys().cloned().collect()
    }
}
