//! Detail resolution for extracted codes.
//!
//! Lookups are read-only, so a failed or slow lookup only costs that code
//! its detail: it becomes a "no data found" placeholder and the rest of the
//! batch carries on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use super::inference::{InferenceAdapter, InvokeError};
use super::prompts::detail_lookup_prompt;
use crate::db::{find_reference_code, PersistenceGateway, RepositoryError};
use crate::models::{CodeDetail, CodeSystem, FoundDetail, PayerRate};

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("No detail available")]
    NotFound,

    #[error("Lookup reply could not be parsed: {0}")]
    Unparsable(String),

    #[error(transparent)]
    Inference(#[from] InvokeError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Source of descriptive and billing metadata for a single code.
#[async_trait]
pub trait DetailLookup: Send + Sync {
    async fn lookup(&self, system: CodeSystem, code: &str) -> Result<FoundDetail, LookupError>;
}

/// Fans lookups out with a bound on how many run at once. Clones share
/// the bound, so concurrent `resolve_details` calls draw from one pool.
#[derive(Clone)]
pub struct DetailResolver {
    lookup: Arc<dyn DetailLookup>,
    max_in_flight: usize,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl DetailResolver {
    pub fn new(lookup: Arc<dyn DetailLookup>, max_in_flight: usize, timeout: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            lookup,
            max_in_flight,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            timeout,
        }
    }

    /// One detail per input code, in input order. Repeated codes are looked
    /// up once and the result is copied to every position.
    pub async fn resolve_details(&self, system: CodeSystem, codes: &[String]) -> Vec<CodeDetail> {
        if codes.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = codes
            .iter()
            .filter(|code| seen.insert(code.as_str()))
            .cloned()
            .collect();

        let resolved: HashMap<String, CodeDetail> = stream::iter(unique)
            .map(|code| async move {
                let detail = self.lookup_one(system, &code).await;
                (code, detail)
            })
            .buffered(self.max_in_flight)
            .collect()
            .await;

        codes
            .iter()
            .map(|code| {
                resolved
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| CodeDetail::not_found(code.as_str()))
            })
            .collect()
    }

    async fn lookup_one(&self, system: CodeSystem, code: &str) -> CodeDetail {
        let Ok(_permit) = self.permits.acquire().await else {
            return CodeDetail::not_found(code);
        };
        match tokio::time::timeout(self.timeout, self.lookup.lookup(system, code)).await {
            Ok(Ok(found)) => CodeDetail::Found(found),
            Ok(Err(LookupError::NotFound)) => {
                tracing::debug!(%system, code, "No detail found");
                CodeDetail::not_found(code)
            }
            Ok(Err(e)) => {
                tracing::warn!(%system, code, error = %e, "Detail lookup failed");
                CodeDetail::not_found(code)
            }
            Err(_) => {
                tracing::warn!(%system, code, timeout = ?self.timeout, "Detail lookup timed out");
                CodeDetail::not_found(code)
            }
        }
    }
}

/// Reads the `code_reference` table.
pub struct ReferenceTableLookup {
    store: Arc<dyn PersistenceGateway>,
}

impl ReferenceTableLookup {
    pub fn new(store: Arc<dyn PersistenceGateway>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DetailLookup for ReferenceTableLookup {
    async fn lookup(&self, system: CodeSystem, code: &str) -> Result<FoundDetail, LookupError> {
        find_reference_code(self.store.as_ref(), system, code)
            .await?
            .ok_or(LookupError::NotFound)
    }
}

/// Asks the lookup model to describe the code and recovers JSON from the reply.
pub struct InferenceDetailLookup {
    adapter: InferenceAdapter,
    model: String,
}

impl InferenceDetailLookup {
    pub fn new(adapter: InferenceAdapter, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
        }
    }
}

#[async_trait]
impl DetailLookup for InferenceDetailLookup {
    async fn lookup(&self, system: CodeSystem, code: &str) -> Result<FoundDetail, LookupError> {
        let prompt = detail_lookup_prompt(system, code);
        let analysis = self.adapter.invoke(&self.model, &prompt).await?;
        parse_detail_reply(code, &analysis.text)
    }
}

/// Tries `primary` first and `secondary` on any failure.
pub struct FallbackLookup {
    primary: Arc<dyn DetailLookup>,
    secondary: Arc<dyn DetailLookup>,
}

impl FallbackLookup {
    pub fn new(primary: Arc<dyn DetailLookup>, secondary: Arc<dyn DetailLookup>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl DetailLookup for FallbackLookup {
    async fn lookup(&self, system: CodeSystem, code: &str) -> Result<FoundDetail, LookupError> {
        match self.primary.lookup(system, code).await {
            Ok(found) => Ok(found),
            Err(LookupError::NotFound) => self.secondary.lookup(system, code).await,
            Err(e) => {
                tracing::debug!(%system, code, error = %e, "Primary lookup failed, trying secondary");
                self.secondary.lookup(system, code).await
            }
        }
    }
}

/// Pull a detail object out of a free-form model reply. Models wrap JSON in
/// prose or code fences, so only the span from the first `{` to the last
/// `}` is parsed. The requested code is kept even if the reply names another.
pub fn parse_detail_reply(code: &str, reply: &str) -> Result<FoundDetail, LookupError> {
    let start = reply
        .find('{')
        .ok_or_else(|| LookupError::Unparsable("no JSON object in reply".into()))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| LookupError::Unparsable("unterminated JSON object".into()))?;
    let value: Value = serde_json::from_str(&reply[start..=end])
        .map_err(|e| LookupError::Unparsable(e.to_string()))?;

    let details = value.get("details").filter(|d| d.is_object()).unwrap_or(&value);
    let field = |name: &str| {
        details
            .get(name)
            .or_else(|| value.get(name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let short_description = field("short_description")
        .ok_or_else(|| LookupError::Unparsable("short_description missing".into()))?;
    let long_description = field("long_description").unwrap_or_default();
    let billable = value
        .get("billable")
        .or_else(|| details.get("billable"))
        .and_then(Value::as_bool);
    let billing_guidelines = value
        .get("billing_guidelines")
        .and_then(|g| serde_json::from_value::<BTreeMap<String, PayerRate>>(g.clone()).ok())
        .unwrap_or_default();

    Ok(FoundDetail {
        code: code.to_string(),
        billable,
        short_description,
        long_description,
        billing_guidelines,
    })
}
