use std::{collections::HashMap, sync::Arc};

use actix_web::{
    HttpResponse, ResponseError,
    http::StatusCode,
    web::{self},
};
use derive_more::derive::{Display, Error};

use super::signal::{Signal, SignalInput};

/// Read and write access to the properties of one asset.
pub trait StateAccess: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn get_state(&self, property: &str) -> Result<Signal, StateAccessError>;

    fn set_state(&self, property: &str, value: f64) -> Result<(), StateAccessError>;
}

#[derive(Debug, Display, Error)]
pub enum StateAccessError {
    #[display("Unknown asset {asset}")]
    UnknownAsset { asset: String },

    #[display("Unknown property {property}")]
    UnknownProperty { property: String },

    #[display("Property {property} is read-only")]
    ReadOnly { property: String },

    #[display("Invalid value for {property}: {reason}")]
    InvalidValue { property: String, reason: String },

    #[display("No value for {property} available yet")]
    NotAvailable { property: String },
}

impl StateAccessError {
    pub fn unknown(property: &str) -> Self {
        StateAccessError::UnknownProperty {
            property: property.to_string(),
        }
    }

    pub fn read_only(property: &str) -> Self {
        StateAccessError::ReadOnly {
            property: property.to_string(),
        }
    }

    pub fn invalid(property: &str, reason: impl ToString) -> Self {
        StateAccessError::InvalidValue {
            property: property.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn not_available(property: &str) -> Self {
        StateAccessError::NotAvailable {
            property: property.to_string(),
        }
    }
}

impl ResponseError for StateAccessError {
    fn status_code(&self) -> StatusCode {
        tracing::warn!("StateAccessError: {:?}", self);

        match self {
            StateAccessError::UnknownAsset { .. } | StateAccessError::UnknownProperty { .. } => StatusCode::NOT_FOUND,
            StateAccessError::ReadOnly { .. } => StatusCode::METHOD_NOT_ALLOWED,
            StateAccessError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            StateAccessError::NotAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

struct AssetRegistry {
    assets: HashMap<String, Arc<dyn StateAccess>>,
}

impl AssetRegistry {
    fn asset(&self, name: &str) -> Result<&dyn StateAccess, StateAccessError> {
        self.assets
            .get(name)
            .map(|asset| asset.as_ref())
            .ok_or_else(|| StateAccessError::UnknownAsset { asset: name.to_string() })
    }
}

/// Exposes `GET` and `PUT` of `/{system}/{asset}/{property}`.
pub fn new_routes(system: &str, assets: Vec<Arc<dyn StateAccess>>) -> actix_web::Scope {
    let registry = AssetRegistry {
        assets: assets.into_iter().map(|a| (a.name().to_string(), a)).collect(),
    };

    web::scope(&format!("/{}", system))
        .app_data(web::Data::new(registry))
        .route("/{asset}/{property}", web::get().to(get_state))
        .route("/{asset}/{property}", web::put().to(set_state))
}

async fn get_state(
    registry: web::Data<AssetRegistry>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, StateAccessError> {
    let (asset, property) = path.into_inner();
    let signal = registry.asset(&asset)?.get_state(&property)?;

    Ok(HttpResponse::Ok().json(signal))
}

async fn set_state(
    registry: web::Data<AssetRegistry>,
    path: web::Path<(String, String)>,
    input: web::Json<SignalInput>,
) -> Result<HttpResponse, StateAccessError> {
    let (asset, property) = path.into_inner();
    let asset = registry.asset(&asset)?;

    if !input.value.is_finite() {
        return Err(StateAccessError::invalid(&property, "not a finite number"));
    }

    asset.set_state(&property, input.value)?;
    tracing::info!("Set {} of {} to {}", property, asset.name(), input.value);

    Ok(HttpResponse::Ok().json(asset.get_state(&property)?))
}
