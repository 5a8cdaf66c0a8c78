//! # Fallback Registry
//!
//! Maps service types to alternate operations invoked when the primary path
//! is unavailable. One fallback per service type; re-registering replaces
//! the previous operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::types::{EngineError, ErrorRecord, Result};

/// The boxed future a registered fallback produces
pub type FallbackFuture = BoxFuture<'static, Result<serde_json::Value>>;

type FallbackFn = Arc<dyn Fn(ErrorRecord) -> FallbackFuture + Send + Sync>;

/// What happened when the registry was asked to handle an error
#[derive(Debug)]
pub enum FallbackDisposition {
    /// The registered fallback ran and produced a value
    Executed {
        service_type: String,
        result: serde_json::Value,
    },
    /// The error carried no service type, or none is registered for it
    NotRegistered,
    /// The fallback itself failed; the facade re-reports this as a new
    /// error so it is never silently swallowed
    Failed {
        service_type: String,
        error: EngineError,
    },
}

/// Service-type keyed store of alternate operations
pub struct FallbackRegistry {
    fallbacks: RwLock<HashMap<String, FallbackFn>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self {
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a fallback for a service type; last registration wins.
    ///
    /// The operation receives a clone of the error record that triggered it,
    /// so it can inspect the failure context.
    pub fn register<F, Fut>(&self, service_type: &str, operation: F)
    where
        F: Fn(ErrorRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let wrapped: FallbackFn = Arc::new(move |record| Box::pin(operation(record)));
        let replaced = self
            .fallbacks
            .write()
            .unwrap()
            .insert(service_type.to_string(), wrapped)
            .is_some();

        if replaced {
            debug!(service_type = %service_type, "fallback replaced");
        } else {
            info!(service_type = %service_type, "fallback registered");
        }
    }

    /// True if a fallback exists for the service type
    pub fn is_registered(&self, service_type: &str) -> bool {
        self.fallbacks.read().unwrap().contains_key(service_type)
    }

    /// Invokes the fallback for the record's service type, if any.
    ///
    /// The registry lock is released before the fallback runs, so a slow
    /// fallback never blocks registration or other lookups.
    pub async fn execute(&self, record: &ErrorRecord) -> FallbackDisposition {
        let service_type = match record.service_type() {
            Some(service_type) => service_type.to_string(),
            None => return FallbackDisposition::NotRegistered,
        };

        let operation = {
            let fallbacks = self.fallbacks.read().unwrap();
            fallbacks.get(&service_type).cloned()
        };

        let operation = match operation {
            Some(operation) => operation,
            None => return FallbackDisposition::NotRegistered,
        };

        match operation(record.clone()).await {
            Ok(result) => {
                counter!("resilience.fallback_activations", 1, "service_type" => service_type.clone());
                info!(
                    service_type = %service_type,
                    error_id = %record.id,
                    "fallback executed"
                );
                FallbackDisposition::Executed {
                    service_type,
                    result,
                }
            }
            Err(error) => {
                warn!(
                    service_type = %service_type,
                    error_id = %record.id,
                    error = %error,
                    "fallback failed"
                );
                let error = EngineError::FallbackFailed {
                    service_type: service_type.clone(),
                    reason: error.to_string(),
                };
                FallbackDisposition::Failed {
                    service_type,
                    error,
                }
            }
        }
    }
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
