//! Invocation of the external operations under a uniform retry policy.
//!
//! Every attempt runs under the policy's timeout; failed attempts are retried
//! after a fixed interval until the attempt cap. Capability failures inside
//! act are not retried: they come back as a successful act result carrying an
//! error payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::capability::{BoxedCapability, CapabilitySource, CapabilitySpec, to_spec};
use crate::config::RetryPolicy;
use crate::error::{CapabilityError, Error, OperationError, Result};
use crate::operations::{
    ActionRequest, Condensation, Observation, OperationKind, PersistedMessage, Reasoner, Step,
    TranscriptSink,
};

/// Result of the act operation.
///
/// `output` is what the observe step sees: the capability's result, or a
/// structured error payload when the capability failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActResult {
    pub output: String,
    pub error: Option<CapabilityError>,
}

impl ActResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Wraps the collaborators behind the retry policy
#[derive(Clone)]
pub struct OperationGateway {
    reasoner: Arc<dyn Reasoner>,
    capabilities: Arc<dyn CapabilitySource>,
    sink: Arc<dyn TranscriptSink>,
    policy: RetryPolicy,
    schemas: Arc<SchemaCache>,
}

impl OperationGateway {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        capabilities: Arc<dyn CapabilitySource>,
        sink: Arc<dyn TranscriptSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            reasoner,
            capabilities,
            sink,
            policy,
            schemas: Arc::new(SchemaCache::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the think step against a (truncated) context.
    ///
    /// The capability catalog is fetched fresh on every attempt. A result that
    /// carries neither or both of answer/action fails immediately with
    /// [`Error::ContractViolation`]; it is never retried.
    pub async fn think(&self, context: &[String]) -> Result<Step> {
        let reasoner = self.reasoner.as_ref();
        let source = self.capabilities.as_ref();

        let output = self
            .call(OperationKind::Think, move || async move {
                let capabilities = source.capabilities().await?;
                let catalog: Vec<CapabilitySpec> =
                    capabilities.iter().map(|c| to_spec(c.as_ref())).collect();
                reasoner.think(context, &catalog).await
            })
            .await?;

        output.into_step().map_err(|reason| Error::ContractViolation {
            operation: OperationKind::Think,
            reason,
        })
    }

    /// Invoke the named capability.
    ///
    /// A missing capability, an input that fails the capability's schema, or a
    /// capability that raises all produce `Ok` with an error payload. Only a
    /// failure to reach the capability source (or a timeout) is retried.
    pub async fn act(&self, action: &ActionRequest) -> Result<ActResult> {
        let source = self.capabilities.as_ref();
        let schemas = self.schemas.as_ref();

        let outcome = self
            .call(OperationKind::Act, move || async move {
                let capabilities = source.capabilities().await?;
                Ok::<_, OperationError>(invoke_capability(&capabilities, schemas, action).await)
            })
            .await?;

        Ok(match outcome {
            Ok(output) => ActResult {
                output,
                error: None,
            },
            Err(error) => {
                tracing::warn!("capability '{}' failed: {}", action.name, error);
                ActResult {
                    output: error_payload(action, &error),
                    error: Some(error),
                }
            }
        })
    }

    pub async fn observe(&self, context: &[String], act_result: &str) -> Result<Observation> {
        let reasoner = self.reasoner.as_ref();
        self.call(OperationKind::Observe, move || {
            reasoner.observe(context, act_result)
        })
        .await
    }

    pub async fn compact(&self, transcript: &[String]) -> Result<Condensation> {
        let reasoner = self.reasoner.as_ref();
        self.call(OperationKind::Compact, move || reasoner.compact(transcript))
            .await
    }

    pub async fn persist(&self, messages: &[PersistedMessage]) -> Result<()> {
        let sink = self.sink.as_ref();
        self.call(OperationKind::Persist, move || sink.persist(messages))
            .await
    }

    /// Run one operation under the retry policy.
    async fn call<T, F, Fut>(&self, operation: OperationKind, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OperationError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1u32;

        loop {
            let outcome = match tokio::time::timeout(self.policy.timeout, attempt_fn()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(OperationError::Timeout(self.policy.timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(Error::OperationFailed {
                        operation,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Look up, validate and run a capability. Logical failures come back as `Err`.
async fn invoke_capability(
    capabilities: &[BoxedCapability],
    schemas: &SchemaCache,
    action: &ActionRequest,
) -> std::result::Result<String, CapabilityError> {
    let capability = capabilities
        .iter()
        .find(|c| c.name() == action.name)
        .ok_or_else(|| CapabilityError::NotFound(action.name.clone()))?;

    if let Some(validator) = schemas.validator(capability.name(), &capability.input_schema()) {
        if let Some(reason) = validate_input(&action.input, &validator) {
            return Err(CapabilityError::InvalidInput {
                name: action.name.clone(),
                reason,
            });
        }
    }

    let result = capability.invoke(action.input.clone()).await?;
    tracing::info!("Invoked capability {}", action.name);
    Ok(result)
}

/// Compiled input schemas, keyed by capability name.
///
/// Capabilities are fetched fresh on every call, so an entry is only reused
/// while the capability reports the same schema.
#[derive(Default)]
struct SchemaCache {
    entries: Mutex<HashMap<String, CachedSchema>>,
    compilations: AtomicUsize,
}

struct CachedSchema {
    schema: serde_json::Value,
    /// `None` when the schema does not compile
    validator: Option<Arc<jsonschema::Validator>>,
}

impl SchemaCache {
    fn validator(
        &self,
        name: &str,
        schema: &serde_json::Value,
    ) -> Option<Arc<jsonschema::Validator>> {
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(name).filter(|c| c.schema == *schema) {
            return cached.validator.clone();
        }

        let validator = match jsonschema::validator_for(schema) {
            Ok(v) => Some(Arc::new(v)),
            Err(e) => {
                tracing::warn!(
                    "Invalid input schema for capability '{}', skipping validation: {}",
                    name,
                    e
                );
                None
            }
        };
        let compiled = self.compilations.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(capability = name, compiled, "input schema compiled");

        entries.insert(
            name.to_string(),
            CachedSchema {
                schema: schema.clone(),
                validator: validator.clone(),
            },
        );
        validator
    }
}

/// Validate capability input against a compiled schema.
/// Returns `Some(error_message)` if validation fails.
fn validate_input(input: &serde_json::Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// The structured payload the observe step receives for a failed capability
pub fn error_payload(action: &ActionRequest, error: &CapabilityError) -> String {
    serde_json::json!({
        "name": action.name,
        "input": action.input,
        "error": error.to_string(),
    })
    .to_string()
}
