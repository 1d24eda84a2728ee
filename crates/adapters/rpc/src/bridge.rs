//! Provider bridge: an out-of-process integration drives a local
//! [`Provider`] over RPC.
//!
//! The remote declares and updates services with `registerService`,
//! `unregisterService`, `updateValue`, `emitEvent`, `registerProperty`,
//! `registerType`, `registerAction`, `registerIdentifier` and
//! `registerEvent`. Writes and actions on its services are forwarded back as
//! `setValue` and `triggerAction` calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_app::provider::{Provider, Service, ServiceBackend};
use hearth_domain::error::{HearthError, NotFoundError, ValidationError};
use hearth_domain::identifier::Identifier;
use hearth_domain::schema::{ActionSchema, EventSchema, PropertySchema};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RpcError;
use crate::peer::{CallHandler, PeerOptions, RpcPeer, connect};

/// Service backend forwarding writes and actions to the remote side.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    peer: RpcPeer,
}

impl RemoteBackend {
    #[must_use]
    pub fn new(peer: RpcPeer) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl ServiceBackend for RemoteBackend {
    /// The remote confirms with an `updateValue` once the device reports
    /// the new value.
    async fn set_value(&self, service: &Service, key: &str, value: Value) -> Result<(), HearthError> {
        let params = json!({ "id": service.unique_id().service(), "key": key, "value": value });
        self.peer.call("setValue", params).await?;
        Ok(())
    }

    async fn trigger_action(&self, service: &Service, action: &str, args: Value) -> Result<Value, HearthError> {
        let params = json!({ "id": service.unique_id().service(), "action": action, "args": args });
        Ok(self.peer.call("triggerAction", params).await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterService {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    identifiers: Vec<Identifier>,
    #[serde(default)]
    properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default)]
    actions: BTreeMap<String, ActionSchema>,
    #[serde(default)]
    events: BTreeMap<String, EventSchema>,
}

#[derive(Debug, Deserialize)]
struct ServiceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateValue {
    id: String,
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct EmitEvent {
    id: String,
    key: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct Declare<T> {
    id: String,
    key: String,
    #[serde(default)]
    schema: T,
}

#[derive(Debug, Deserialize)]
struct RegisterType {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RegisterIdentifier {
    id: String,
    identifier: Identifier,
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, HearthError> {
    serde_json::from_value(params)
        .map_err(|err| ValidationError::InvalidRequest(format!("{method}: {err}")).into())
}

/// Serves the provider-side methods for one connection.
pub struct ProviderBridge {
    provider: Arc<Provider>,
    peer: RpcPeer,
}

impl ProviderBridge {
    #[must_use]
    pub fn new(provider: Arc<Provider>, peer: RpcPeer) -> Self {
        Self { provider, peer }
    }

    /// Unregister every service the remote declared.
    pub fn disconnect(&self) {
        tracing::info!(provider = %self.provider.id(), "bridge disconnected, dropping its services");
        self.provider.clear_services();
    }

    fn service(&self, id: &str) -> Result<Arc<Service>, HearthError> {
        self.provider.service(id).ok_or_else(|| {
            NotFoundError {
                entity: "Service",
                id: format!("{}:{id}", self.provider.id()),
            }
            .into()
        })
    }

    fn register_service(&self, req: RegisterService) -> Result<(), HearthError> {
        let name = req.name.unwrap_or_else(|| req.id.clone());
        let service = self
            .provider
            .create_service(&req.id, name, Arc::new(RemoteBackend::new(self.peer.clone())));
        service.set_priority(req.priority);
        service.update_types(req.types);
        for (key, schema) in req.properties {
            service.register_property(key, schema);
        }
        for (key, schema) in req.actions {
            service.register_action(key, schema);
        }
        for (key, schema) in req.events {
            service.register_event(key, schema);
        }
        service.update_identifiers(req.identifiers);
        for (key, value) in req.values {
            service.update_value(key, value);
        }
        self.provider.register_service(service)
    }
}

#[async_trait]
impl CallHandler for ProviderBridge {
    async fn handle(&self, method: &str, p: Value) -> Result<Value, HearthError> {
        tracing::trace!(provider = %self.provider.id(), method, "bridge call");
        match method {
            "registerService" => {
                self.register_service(params(method, p)?)?;
                Ok(Value::Null)
            }
            "unregisterService" => {
                let req: ServiceRef = params(method, p)?;
                Ok(Value::Bool(self.provider.unregister_service(&req.id).is_some()))
            }
            "updateValue" => {
                let req: UpdateValue = params(method, p)?;
                Ok(Value::Bool(self.service(&req.id)?.update_value(req.key, req.value)))
            }
            "emitEvent" => {
                let req: EmitEvent = params(method, p)?;
                self.service(&req.id)?.emit_event(req.key, req.args);
                Ok(Value::Null)
            }
            "registerProperty" => {
                let req: Declare<PropertySchema> = params(method, p)?;
                self.service(&req.id)?.register_property(req.key, req.schema);
                Ok(Value::Null)
            }
            "registerAction" => {
                let req: Declare<ActionSchema> = params(method, p)?;
                self.service(&req.id)?.register_action(req.key, req.schema);
                Ok(Value::Null)
            }
            "registerEvent" => {
                let req: Declare<EventSchema> = params(method, p)?;
                self.service(&req.id)?.register_event(req.key, req.schema);
                Ok(Value::Null)
            }
            "registerType" => {
                let req: RegisterType = params(method, p)?;
                self.service(&req.id)?.register_type(req.kind);
                Ok(Value::Null)
            }
            "registerIdentifier" => {
                let req: RegisterIdentifier = params(method, p)?;
                self.service(&req.id)?.register_identifier(req.identifier);
                Ok(Value::Null)
            }
            _ => Err(NotFoundError {
                entity: "Method",
                id: method.to_string(),
            }
            .into()),
        }
    }
}

/// Bridge `provider` over one duplex stream until it closes. The
/// provider's services are unregistered afterwards.
///
/// # Errors
///
/// Returns the error that closed the channel.
pub async fn serve_provider<R, W>(
    provider: &Arc<Provider>,
    reader: R,
    writer: W,
    options: PeerOptions,
) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (peer, connection) = connect(reader, writer, options);
    let bridge = ProviderBridge::new(Arc::clone(provider), peer);
    let result = connection.serve(&bridge).await;
    bridge.disconnect();
    result
}
