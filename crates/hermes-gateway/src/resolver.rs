//! Auth chain and namespace resolution.
//!
//! Before a gateway request reaches its target subject it may have to pass
//! a chain of auth subjects, each answering with the headers the next step
//! sees. Subscriptions to namespace-scoped subjects additionally ask a
//! namespace subject which suffix to append to the subscription key.

use std::collections::HashSet;

use hermes_config::GatewayConfig;
use hermes_core::{BusClient, Headers, Request, Response};
use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::subscription::SubscriptionKey;

/// Which subjects need auth and namespace resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Auth subjects, requested in order.
    pub auth_subjects: Vec<String>,
    /// Subjects that skip the auth chain.
    pub non_auth_subjects: HashSet<String>,
    /// Subjects whose subscriptions need a namespace.
    pub namespace_subjects: HashSet<String>,
    /// Subject answering namespace lookups.
    pub namespace_subject: Option<String>,
}

impl From<&GatewayConfig> for ResolverConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            auth_subjects: config.auth_subjects.clone(),
            non_auth_subjects: config.non_auth_subjects.iter().cloned().collect(),
            namespace_subjects: config.namespace_subjects.iter().cloned().collect(),
            namespace_subject: config.namespace_subject.clone(),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Headers after every auth step.
    pub headers: Headers,
    /// Namespace for the subscription, if the subject needs one.
    pub namespace: Option<String>,
}

impl Resolved {
    /// Subscription key for `subject`.
    pub fn key(&self, subject: &str) -> SubscriptionKey {
        SubscriptionKey::new(subject, self.namespace.clone())
    }
}

/// Runs the auth chain and namespace lookup over the bus.
#[derive(Clone)]
pub struct Resolver {
    client: BusClient,
    config: ResolverConfig,
}

impl Resolver {
    /// Creates a resolver.
    pub fn new(client: BusClient, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    /// The configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Returns `true` when `subject` must pass the auth chain.
    pub fn requires_auth(&self, subject: &str) -> bool {
        !self.config.auth_subjects.is_empty() && !self.config.non_auth_subjects.contains(subject)
    }

    /// Returns `true` when subscriptions to `subject` are namespaced.
    pub fn requires_namespace(&self, subject: &str) -> bool {
        self.config.namespace_subject.is_some() && self.config.namespace_subjects.contains(subject)
    }

    /// Requests every auth subject in turn.
    ///
    /// Each step receives `{subject}` as its body and the headers as left
    /// by the previous step; its response headers are merged over them. The
    /// first non-200 answer ends the chain.
    pub async fn authorize(&self, subject: &str, mut headers: Headers) -> GatewayResult<Headers> {
        if !self.requires_auth(subject) {
            return Ok(headers);
        }

        for step in &self.config.auth_subjects {
            let request = Request::new(json!({ "subject": subject })).with_headers(headers.clone());
            let response = self.client.request(step, &request).await?;
            if !response.is_ok() {
                tracing::debug!(subject, step = %step, code = response.code, "auth step rejected request");
                return Err(GatewayError::rejected(step, response.code, response.body));
            }
            headers.extend(response.headers);
        }
        Ok(headers)
    }

    /// Looks up the namespace for `subject`.
    ///
    /// Returns `None` for subjects that are not namespaced.
    pub async fn namespace(&self, subject: &str, headers: &Headers) -> GatewayResult<Option<String>> {
        let Some(lookup) = self.config.namespace_subject.as_deref() else {
            return Ok(None);
        };
        if !self.config.namespace_subjects.contains(subject) {
            return Ok(None);
        }

        let request = Request::new(json!({ "subject": subject })).with_headers(headers.clone());
        let response = self.client.request(lookup, &request).await?;
        if !response.is_ok() {
            return Err(GatewayError::rejected(lookup, response.code, response.body));
        }
        match namespace_of(&response) {
            Some(namespace) => Ok(Some(namespace)),
            None => Err(GatewayError::MissingNamespace(subject.to_string())),
        }
    }

    /// Runs the auth chain, then the namespace lookup with the resulting headers.
    pub async fn resolve(&self, subject: &str, headers: Headers) -> GatewayResult<Resolved> {
        let headers = self.authorize(subject, headers).await?;
        let namespace = self.namespace(subject, &headers).await?;
        Ok(Resolved { headers, namespace })
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("config", &self.config).finish()
    }
}

/// Accepts `"ns"` or `{"namespace": "ns"}`.
fn namespace_of(response: &Response) -> Option<String> {
    let namespace = match response.body.as_ref()? {
        Value::String(namespace) => namespace.as_str(),
        Value::Object(body) => body.get("namespace")?.as_str()?,
        _ => return None,
    };
    (!namespace.is_empty()).then(|| namespace.to_string())
}
