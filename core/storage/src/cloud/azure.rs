use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use url::form_urlencoded;

use super::CloudFlavor;
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// Azure Blob Storage.
///
/// Configuration: `container_name`, `account_name` (both required).
///
/// Credentials, first match wins:
/// - `account_key`
/// - `sas_token`
/// - `connection_string` (`AccountKey=...` or `SharedAccessSignature=...`)
///
/// Temporary access URLs can only be signed with an account key.
#[derive(Debug)]
pub struct Azure;

#[derive(Debug, PartialEq, Eq)]
enum AzureAuth {
    AccountKey(String),
    Sas(Vec<(String, String)>),
}

fn sas_pairs(token: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(token.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

/// Pick an authentication method from the supplied credentials.
fn auth_from(credentials: &Credentials) -> Option<AzureAuth> {
    if let Some(key) = credentials.get("account_key") {
        return Some(AzureAuth::AccountKey(key.to_string()));
    }
    if let Some(token) = credentials.get("sas_token") {
        return Some(AzureAuth::Sas(sas_pairs(token)));
    }

    let connection_string = credentials.get("connection_string")?;
    let mut sas = None;
    for part in connection_string.split(';') {
        match part.trim().split_once('=') {
            Some(("AccountKey", key)) if !key.is_empty() => {
                return Some(AzureAuth::AccountKey(key.to_string()));
            }
            Some(("SharedAccessSignature", token)) if !token.is_empty() => {
                sas = Some(AzureAuth::Sas(sas_pairs(token)));
            }
            _ => {}
        }
    }
    sas
}

impl CloudFlavor for Azure {
    type Store = MicrosoftAzure;

    const BACKEND: &'static str = "azure";
    const REQUIRED_OPTIONS: &'static [&'static str] = &["container_name", "account_name"];
    const SCOPE_OPTION: &'static str = "container_name";

    fn build(config: &AdapterConfig, credentials: &Credentials) -> Result<MicrosoftAzure> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(config.require_str("account_name")?)
            .with_container_name(config.require_str("container_name")?);

        match auth_from(credentials) {
            Some(AzureAuth::AccountKey(key)) => builder = builder.with_access_key(key),
            Some(AzureAuth::Sas(pairs)) => builder = builder.with_sas_authorization(pairs),
            None => {}
        }

        builder.build().map_err(|e| {
            StorageError::connection("Azure client initialization failed").with_source(e)
        })
    }

    fn public_url(config: &AdapterConfig, key: &str) -> Option<String> {
        Some(format!(
            "https://{}.blob.core.windows.net/{}/{}",
            config.get_str("account_name")?,
            config.get_str("container_name")?,
            key
        ))
    }
}
