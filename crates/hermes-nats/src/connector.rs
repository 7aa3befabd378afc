//! Connection settings and the [`BusConnector`] for NATS.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_nats::ConnectOptions;
use hermes_core::{BoxFuture, Bus, BusConnector, BusError, DEFAULT_REQUEST_TIMEOUT};

use crate::bus::NatsBus;

/// Connects to a NATS cluster.
///
/// Credentials are applied in this order of preference: a `.creds` file,
/// a token, then user and password.
#[derive(Clone)]
#[must_use]
pub struct NatsConnector {
    servers: Vec<String>,
    name: Option<String>,
    user: Option<(String, String)>,
    token: Option<String>,
    credentials_path: Option<PathBuf>,
    request_timeout: Duration,
}

impl NatsConnector {
    /// Connector for `servers`.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            name: None,
            user: None,
            token: None,
            credentials_path: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Connection name reported to the server.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// User and password auth.
    pub fn with_user_and_password(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some((user.into(), password.into()));
        self
    }

    /// Token auth.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Credentials file auth.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Default timeout of requests made through the bus.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Configured server URLs.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    async fn options(&self) -> Result<ConnectOptions, BusError> {
        let mut options = ConnectOptions::new().request_timeout(Some(self.request_timeout));
        if let Some(name) = &self.name {
            options = options.name(name);
        }
        if let Some(path) = &self.credentials_path {
            options = options.credentials_file(path).await.map_err(|err| {
                BusError::Connect(format!("cannot read credentials {}: {err}", path.display()))
            })?;
        } else if let Some(token) = &self.token {
            options = options.token(token.clone());
        } else if let Some((user, password)) = &self.user {
            options = options.user_and_password(user.clone(), password.clone());
        }
        Ok(options)
    }

    /// Connects and returns the concrete bus.
    pub async fn connect_nats(&self) -> Result<NatsBus, BusError> {
        if self.servers.is_empty() {
            return Err(BusError::Connect("no servers configured".into()));
        }
        let addresses = self.servers.join(",");
        let client = self
            .options()
            .await?
            .connect(addresses.as_str())
            .await
            .map_err(|err| BusError::Connect(err.to_string()))?;
        tracing::info!(servers = %addresses, "connected to NATS");
        Ok(NatsBus::new(client))
    }
}

impl BusConnector for NatsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Bus>, BusError>> {
        Box::pin(async move {
            let bus: Arc<dyn Bus> = Arc::new(self.connect_nats().await?);
            Ok(bus)
        })
    }
}

impl std::fmt::Debug for NatsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsConnector")
            .field("servers", &self.servers)
            .field("name", &self.name)
            .field("user", &self.user.as_ref().map(|(user, _)| user))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("credentials_path", &self.credentials_path)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
