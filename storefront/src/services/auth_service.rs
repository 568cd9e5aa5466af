// storefront/src/services/auth_service.rs

//! Merchant API-key authentication and role checks.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::errors::{AppError, Result};
use crate::models::{Role, TenantScope};
use crate::store::CommerceStore;

/// Authenticated caller of the merchant API.
#[derive(Debug, Clone)]
pub struct MerchantIdentity {
  pub credential_id: uuid::Uuid,
  pub merchant_id: String,
  pub scope: TenantScope,
  pub role: Role,
}

/// Lower-case hex SHA-256 of an API key, the form stored at rest.
pub fn hash_api_key(api_key: &str) -> String {
  hex::encode(Sha256::digest(api_key.as_bytes()))
}

#[instrument(name = "auth_service::authenticate_merchant", skip(store, api_key), err(Display))]
pub async fn authenticate_merchant(
  store: &dyn CommerceStore,
  api_key: Option<&str>,
  platform_id: Option<&str>,
) -> Result<MerchantIdentity> {
  let api_key = api_key
    .map(str::trim)
    .filter(|k| !k.is_empty())
    .ok_or_else(|| AppError::Unauthorized("missing merchant API key".to_string()))?;

  let key_hash = hash_api_key(api_key);
  let credential = store
    .find_credential_by_key_hash(&key_hash)
    .await?
    .ok_or_else(|| AppError::Unauthorized("unknown merchant API key".to_string()))?;

  // The lookup is by digest; the comparison itself stays constant-time.
  if !bool::from(credential.key_hash.as_bytes().ct_eq(key_hash.as_bytes())) || !credential.active {
    warn!(credential_id = %credential.id, "Rejected inactive or mismatched merchant credential.");
    return Err(AppError::Unauthorized("merchant credential is not valid".to_string()));
  }

  if !credential.allowed_platforms.is_empty() {
    let allowed = platform_id.map_or(false, |p| credential.allowed_platforms.iter().any(|a| a == p));
    if !allowed {
      warn!(credential_id = %credential.id, ?platform_id, "Calling platform is not on the allow-list.");
      return Err(AppError::Forbidden("calling platform is not allowed for this merchant".to_string()));
    }
  }

  debug!(credential_id = %credential.id, role = ?credential.role, "Merchant authenticated.");
  Ok(MerchantIdentity {
    credential_id: credential.id,
    merchant_id: credential.merchant_id,
    scope: TenantScope {
      tenant_id: credential.tenant_id,
      shop_id: credential.shop_id,
    },
    role: credential.role,
  })
}

impl MerchantIdentity {
  pub fn require_role(&self, minimum: Role) -> Result<()> {
    if self.role >= minimum {
      Ok(())
    } else {
      Err(AppError::Forbidden(format!("requires {:?} role or higher", minimum)))
    }
  }

  /// A `merchantId` named in a request body must be the authenticated one.
  pub fn ensure_merchant(&self, merchant_id: Option<&str>) -> Result<()> {
    match merchant_id {
      Some(claimed) if claimed != self.merchant_id => Err(AppError::Forbidden(
        "merchantId does not match the authenticated merchant".to_string(),
      )),
      _ => Ok(()),
    }
  }
}
