//! Cloud provider seam.
//!
//! Provider SDK calls are blocking; callers run them through
//! [`CloudTasks`](crate::tasks::CloudTasks) so they never stall the event
//! loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use topolink_core::CloudSettings;
use zeroize::Zeroizing;

use crate::error::{CloudError, Result};

/// A cloud instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider state, e.g. `ACTIVE`.
    pub state: String,
    /// Public address once the instance has one.
    pub host: Option<String>,
}

/// A provider region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// SSH key pair generated by the provider for a new instance.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Key pair name, the same as its instance.
    pub name: String,
    /// PEM encoded private key.
    pub private_key: Zeroizing<String>,
}

impl KeyPair {
    /// Key pair holding `private_key`.
    pub fn new(name: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            private_key: Zeroizing::new(private_key.into()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Account details needed to open a provider session.
#[derive(Clone)]
pub struct CloudCredentials {
    /// Account user name.
    pub user_name: String,
    /// Account API key.
    pub api_key: Zeroizing<String>,
    /// Identity service endpoint.
    pub ias_url: String,
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("user_name", &self.user_name)
            .field("api_key", &"<redacted>")
            .field("ias_url", &self.ias_url)
            .finish()
    }
}

impl CloudCredentials {
    /// Credentials from `settings`; fails when a required value is empty.
    pub fn from_settings(settings: &CloudSettings) -> Result<Self> {
        if settings.cloud_user_name.is_empty() {
            return Err(CloudError::MissingSetting("cloud_user_name"));
        }
        if settings.cloud_api_key.is_empty() {
            return Err(CloudError::MissingSetting("cloud_api_key"));
        }
        if settings.ias_url.is_empty() {
            return Err(CloudError::MissingSetting("ias_url"));
        }
        Ok(Self {
            user_name: settings.cloud_user_name.clone(),
            api_key: Zeroizing::new(settings.cloud_api_key.clone()),
            ias_url: settings.ias_url.clone(),
        })
    }
}

/// Blocking cloud provider session. Calls may take seconds.
#[cfg_attr(test, mockall::automock)]
pub trait CloudProvider: Send + Sync {
    /// Returns false when the provider rejects the credentials.
    fn authenticate(&self) -> Result<bool>;
    /// Regions available to the account.
    fn list_regions(&self) -> Result<Vec<Region>>;
    /// Returns false when the region is unknown to the provider.
    fn set_region(&self, region: &str) -> Result<bool>;
    /// Instances in the selected region.
    fn list_instances(&self) -> Result<Vec<Instance>>;
    /// Create a key pair named `name`.
    fn create_key_pair(&self, name: &str) -> Result<KeyPair>;
    /// Boot an instance reachable with `key_pair`.
    fn create_instance(
        &self,
        name: &str,
        flavor_id: &str,
        image_id: &str,
        key_pair: &KeyPair,
    ) -> Result<Instance>;
    /// Returns false when the provider refused the deletion.
    fn delete_instance(&self, instance: &Instance) -> Result<bool>;
}

/// Build an authenticated provider with its region selected.
///
/// `connector` creates the provider session from the credentials. When no
/// region is configured the first one the provider lists is used.
pub fn connect_provider<P, F>(settings: &CloudSettings, connector: F) -> Result<P>
where
    P: CloudProvider,
    F: FnOnce(&CloudCredentials) -> P,
{
    let credentials = CloudCredentials::from_settings(settings).inspect_err(|e| {
        log::error!("[CloudTasks] Unable to create cloud provider: {}", e);
    })?;
    let provider = connector(&credentials);

    if !provider.authenticate()? {
        log::error!("[CloudTasks] Authentication failed for cloud provider");
        return Err(CloudError::Authentication);
    }

    let region = if settings.cloud_region.is_empty() {
        provider
            .list_regions()?
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| {
                CloudError::Region("provider lists no regions".to_string())
            })?
    } else {
        settings.cloud_region.clone()
    };

    if !provider.set_region(&region)? {
        log::error!("[CloudTasks] Unable to set cloud provider region {}", region);
        return Err(CloudError::Region(region));
    }

    log::info!(
        "[CloudTasks] Connected to cloud provider as {} in {}",
        credentials.user_name,
        region
    );
    Ok(provider)
}
