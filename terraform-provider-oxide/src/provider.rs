//! Terraform Provider Implementation
//!
//! Implements the Terraform Plugin Protocol for Oxide.

use crate::client::{ControlPlane, OxideClient};
use crate::config::ProviderConfig;
use crate::data_sources::{get_all_data_sources, DataSource};
use crate::functions::{get_all_functions, Function};
use crate::resources::{get_all_resources, Applied, Resource, ResourceState};
use crate::schema::{
    has_errors, Diagnostic, ProviderSchema, RpcRequest, RpcResponse, SchemaAttribute,
    SchemaBlock, Validator,
};
use crate::validation::validate_config;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Runtime;

/// Oxide Terraform Provider
pub struct OxideProvider {
    client: Arc<RwLock<Option<Arc<dyn ControlPlane>>>>,
    resources: HashMap<String, Box<dyn Resource>>,
    data_sources: HashMap<String, Box<dyn DataSource>>,
    functions: HashMap<String, Box<dyn Function>>,
    runtime: Runtime,
}

/// Response carrying nothing but diagnostics
fn diagnostics_response(id: i64, diagnostics: Vec<Diagnostic>) -> RpcResponse {
    RpcResponse::success(id, json!({ "diagnostics": diagnostics }))
}

/// State object under `key`; `null` and missing are both `None`
fn state_param(params: &Value, key: &str) -> Option<ResourceState> {
    params.get(key).cloned().and_then(ResourceState::from_value)
}

fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn state_value(state: Option<&ResourceState>) -> Value {
    state.map_or(Value::Null, ResourceState::to_value)
}

impl OxideProvider {
    /// Create a new provider
    pub fn new() -> std::io::Result<Self> {
        let resources: HashMap<String, Box<dyn Resource>> = get_all_resources()
            .into_iter()
            .map(|r| (r.type_name().to_string(), r))
            .collect();
        let data_sources: HashMap<String, Box<dyn DataSource>> = get_all_data_sources()
            .into_iter()
            .map(|d| (d.type_name().to_string(), d))
            .collect();
        let functions: HashMap<String, Box<dyn Function>> = get_all_functions()
            .into_iter()
            .map(|f| (f.name().to_string(), f))
            .collect();

        Ok(Self {
            client: Arc::new(RwLock::new(None)),
            resources,
            data_sources,
            functions,
            runtime: Runtime::new()?,
        })
    }

    /// Bind a control plane directly, skipping ConfigureProvider
    #[cfg(test)]
    pub fn with_client(self, client: Arc<dyn ControlPlane>) -> Self {
        self.bind(client);
        self
    }

    fn bind(&self, client: Arc<dyn ControlPlane>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    fn provider_block() -> SchemaBlock {
        let conflicts_with_profile = || Validator::ConflictsWith {
            attributes: vec!["profile".to_string()],
        };

        SchemaBlock::new()
            .with_attribute(
                "host",
                SchemaAttribute::string()
                    .with_description(
                        "URL of the root of the target server. Can also be set with OXIDE_HOST.",
                    )
                    .optional()
                    .with_validator(conflicts_with_profile()),
            )
            .with_attribute(
                "token",
                SchemaAttribute::string()
                    .with_description("Token used to authenticate. Can also be set with OXIDE_TOKEN.")
                    .optional()
                    .sensitive()
                    .with_validator(conflicts_with_profile()),
            )
            .with_attribute(
                "profile",
                SchemaAttribute::string()
                    .with_description(
                        "Profile in credentials.toml to authenticate with. Can also be set \
                         with OXIDE_PROFILE.",
                    )
                    .optional(),
            )
            .with_attribute(
                "config_dir",
                SchemaAttribute::string()
                    .with_description(
                        "Directory holding credentials.toml, defaults to ~/.config/oxide. \
                         Can also be set with OXIDE_CONFIG_DIR.",
                    )
                    .optional(),
            )
            .with_attribute(
                "insecure_skip_verify",
                SchemaAttribute::bool()
                    .with_description("Skip TLS certificate verification")
                    .optional(),
            )
            .with_description("Oxide rack provider")
    }

    /// Get provider schema
    fn get_schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new(Self::provider_block());

        for (name, resource) in &self.resources {
            schema = schema.with_resource(name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(name, data_source.schema());
        }
        for (name, function) in &self.functions {
            schema = schema.with_function(name, function.definition());
        }

        schema
    }

    /// Configure the provider
    fn configure(&self, raw: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validate_config(&Self::provider_block(), raw);
        if has_errors(&diagnostics) {
            return diagnostics;
        }

        let config: ProviderConfig = match serde_json::from_value(raw.clone()) {
            Ok(c) => c,
            Err(e) => {
                diagnostics.push(
                    Diagnostic::error("Invalid provider configuration").with_detail(&e.to_string()),
                );
                return diagnostics;
            }
        };

        let resolved = match config.resolve(|key| std::env::var(key).ok()) {
            Ok(r) => r,
            Err(errors) => {
                diagnostics.extend(errors);
                return diagnostics;
            }
        };

        match OxideClient::new(&resolved.host, &resolved.token, resolved.insecure_skip_verify) {
            Ok(client) => {
                tracing::info!(
                    host = %client.host(),
                    profile = ?resolved.profile,
                    insecure_skip_verify = resolved.insecure_skip_verify,
                    "configured Oxide client"
                );
                self.bind(Arc::new(client));
            }
            Err(e) => diagnostics.push(
                Diagnostic::error("Unable to create Oxide client").with_detail(&e.to_string()),
            ),
        }

        diagnostics
    }

    /// Get the configured client
    fn get_client(&self) -> Result<Arc<dyn ControlPlane>, Diagnostic> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                Diagnostic::error("Provider not configured")
                    .with_detail("ConfigureProvider must succeed before resources are managed")
            })
    }

    fn resource(&self, params: &Value) -> Result<&dyn Resource, Diagnostic> {
        let type_name = str_param(params, "type_name");
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| Diagnostic::error(&format!("Unknown resource type: {}", type_name)))
    }

    fn data_source(&self, params: &Value) -> Result<&dyn DataSource, Diagnostic> {
        let type_name = str_param(params, "type_name");
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| Diagnostic::error(&format!("Unknown data source type: {}", type_name)))
    }

    /// Handle an RPC request
    pub fn handle_request(&self, input: &str) -> String {
        let request: RpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                return serde_json::to_string(&RpcResponse::error(
                    0,
                    -32700,
                    &format!("Parse error: {}", e),
                ))
                .unwrap_or_default();
            }
        };
        tracing::debug!(method = %request.method, id = request.id, "handling request");

        let id = request.id;
        let params = &request.params;
        let response = match request.method.as_str() {
            "GetProviderSchema" => self.handle_get_schema(id),
            "ValidateProviderConfig" => diagnostics_response(
                id,
                validate_config(&Self::provider_block(), params.get("config").unwrap_or(&Value::Null)),
            ),
            "ConfigureProvider" => diagnostics_response(
                id,
                self.configure(params.get("config").unwrap_or(&Value::Null)),
            ),
            "ValidateResourceConfig" => self.handle_validate_resource(id, params),
            "ValidateDataResourceConfig" => self.handle_validate_data_source(id, params),
            "PlanResourceChange" => self.handle_plan_resource(id, params),
            "ApplyResourceChange" => self.handle_apply_resource(id, params),
            "ReadResource" => self.handle_read_resource(id, params),
            "ImportResourceState" => self.handle_import_resource(id, params),
            "UpgradeResourceState" => self.handle_upgrade_resource(id, params),
            "ReadDataSource" => self.handle_read_data_source(id, params),
            "GetFunctions" => self.handle_get_functions(id),
            "CallFunction" => self.handle_call_function(id, params),
            "StopProvider" => {
                tracing::info!("stop requested");
                RpcResponse::success(id, json!({}))
            }
            _ => RpcResponse::error(id, -32601, &format!("Method not found: {}", request.method)),
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&RpcResponse::error(
                id,
                -32603,
                &format!("Serialization error: {}", e),
            ))
            .unwrap_or_default()
        })
    }

    /// Handle GetProviderSchema
    fn handle_get_schema(&self, id: i64) -> RpcResponse {
        match serde_json::to_value(self.get_schema()) {
            Ok(schema) => RpcResponse::success(id, schema),
            Err(e) => RpcResponse::error(id, -32603, &format!("Schema error: {}", e)),
        }
    }

    /// Handle ValidateResourceConfig
    fn handle_validate_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let config = params.get("config").unwrap_or(&Value::Null);
        diagnostics_response(id, validate_config(&resource.schema().block, config))
    }

    /// Handle ValidateDataResourceConfig
    fn handle_validate_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.data_source(params) {
            Ok(d) => d,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let config = params.get("config").unwrap_or(&Value::Null);
        diagnostics_response(id, validate_config(&data_source.schema().block, config))
    }

    /// Handle PlanResourceChange
    fn handle_plan_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let Some(proposed) = state_param(params, "proposed_new_state") else {
            // Destroy
            return RpcResponse::success(
                id,
                json!({ "planned_state": null, "requires_replace": [], "diagnostics": [] }),
            );
        };
        let prior = state_param(params, "prior_state");

        match resource.plan_change(prior.as_ref(), &proposed) {
            Ok(planned) => RpcResponse::success(
                id,
                json!({
                    "planned_state": planned.planned_state.to_value(),
                    "requires_replace": planned.requires_replace,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle ApplyResourceChange
    fn handle_apply_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let prior = state_param(params, "prior_state");
        let planned = state_param(params, "planned_state");
        let type_name = resource.type_name();

        let applied = self.runtime.block_on(async {
            match (&prior, &planned) {
                (Some(prior), None) => {
                    tracing::info!(type_name, "deleting resource");
                    match resource.delete(client.as_ref(), prior).await {
                        Ok(()) => Applied::default(),
                        Err(diagnostics) => Applied::with_diagnostics(prior.clone(), diagnostics),
                    }
                }
                (None, Some(planned)) => {
                    tracing::info!(type_name, "creating resource");
                    resource
                        .create(client.as_ref(), planned)
                        .await
                        .unwrap_or_else(|diagnostics| Applied {
                            state: None,
                            diagnostics,
                        })
                }
                (Some(prior), Some(planned)) => {
                    tracing::info!(type_name, "updating resource");
                    resource
                        .update(client.as_ref(), prior, planned)
                        .await
                        .unwrap_or_else(|diagnostics| {
                            Applied::with_diagnostics(prior.clone(), diagnostics)
                        })
                }
                (None, None) => Applied::default(),
            }
        });

        RpcResponse::success(
            id,
            json!({
                "new_state": state_value(applied.state.as_ref()),
                "diagnostics": applied.diagnostics
            }),
        )
    }

    /// Handle ReadResource
    fn handle_read_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let current = state_param(params, "current_state").unwrap_or_default();

        let result = self
            .runtime
            .block_on(async { resource.read(client.as_ref(), &current).await });

        match result {
            Ok(state) => RpcResponse::success(
                id,
                json!({ "new_state": state_value(state.as_ref()), "diagnostics": [] }),
            ),
            Err(diagnostics) => RpcResponse::success(
                id,
                json!({ "new_state": current.to_value(), "diagnostics": diagnostics }),
            ),
        }
    }

    /// Handle ImportResourceState
    fn handle_import_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let resource_id = str_param(params, "id");
        let seed = resource.import_state(resource_id);

        let result = self
            .runtime
            .block_on(async { resource.read(client.as_ref(), &seed).await });

        match result {
            Ok(Some(state)) => RpcResponse::success(
                id,
                json!({
                    "imported_resources": [{
                        "type_name": resource.type_name(),
                        "state": state.to_value()
                    }],
                    "diagnostics": []
                }),
            ),
            Ok(None) => diagnostics_response(
                id,
                vec![Diagnostic::error("Cannot import non-existent remote object").with_detail(
                    &format!("{} {} was not found", resource.type_name(), resource_id),
                )],
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle UpgradeResourceState
    fn handle_upgrade_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let version = params.get("version").and_then(Value::as_i64).unwrap_or(0);

        // raw_state arrives either as an object or as its JSON text
        let raw = match params.get("raw_state") {
            Some(Value::String(text)) => match serde_json::from_str(text) {
                Ok(v) => v,
                Err(e) => {
                    return diagnostics_response(
                        id,
                        vec![Diagnostic::error("Unable to parse raw state")
                            .with_detail(&e.to_string())],
                    )
                }
            },
            Some(value) => value.clone(),
            None => Value::Null,
        };

        match resource.upgrade_state(version, raw) {
            Ok(state) => RpcResponse::success(
                id,
                json!({ "upgraded_state": state.to_value(), "diagnostics": [] }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle ReadDataSource
    fn handle_read_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.data_source(params) {
            Ok(d) => d,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };
        let config = state_param(params, "config").unwrap_or_default();

        let result = self
            .runtime
            .block_on(async { data_source.read(client.as_ref(), &config).await });

        match result {
            Ok(state) => RpcResponse::success(
                id,
                json!({ "state": state.to_value(), "diagnostics": [] }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle GetFunctions
    fn handle_get_functions(&self, id: i64) -> RpcResponse {
        let functions: HashMap<&str, _> = self
            .functions
            .iter()
            .map(|(name, f)| (name.as_str(), f.definition()))
            .collect();
        RpcResponse::success(id, json!({ "functions": functions, "diagnostics": [] }))
    }

    /// Handle CallFunction
    fn handle_call_function(&self, id: i64, params: &Value) -> RpcResponse {
        let name = str_param(params, "name");
        let Some(function) = self.functions.get(name) else {
            return RpcResponse::success(
                id,
                json!({ "error": { "text": format!("Unknown function: {}", name) } }),
            );
        };

        let arguments: &[Value] = params
            .get("arguments")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match function.call(arguments) {
            Ok(result) => RpcResponse::success(id, json!({ "result": result })),
            Err(e) => {
                tracing::debug!(function = name, error = %e, "function call failed");
                RpcResponse::success(
                    id,
                    json!({ "error": { "text": e.message, "function_argument": e.argument } }),
                )
            }
        }
    }
}
