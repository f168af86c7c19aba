//! Connection settings for the table service.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::fmt;

use crate::config::StorageCredentials;
use crate::constants::table_storage::{
    DEFAULT_ENDPOINT_SUFFIX, DEV_STORAGE_ACCOUNT, DEV_STORAGE_ENDPOINT, DEV_STORAGE_KEY,
};
use crate::error::AppError;

#[derive(Clone, PartialEq, Eq)]
pub enum StorageAuth {
    /// Account key, already base64-decoded.
    SharedKey { account: String, key: Vec<u8> },
    /// SAS query string without the leading `?`.
    Sas(String),
}

impl fmt::Debug for StorageAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageAuth::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            StorageAuth::Sas(_) => f.write_str("Sas(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Table endpoint without a trailing slash.
    pub endpoint: String,
    pub auth: StorageAuth,
}

fn decode_key(key: &str) -> Result<Vec<u8>, AppError> {
    STANDARD
        .decode(key.trim())
        .map_err(|e| AppError::credentials_error(format!("Storage access key is not valid base64: {e}")))
}

impl ConnectionSettings {
    pub fn from_account_key(account: &str, key: &str) -> Result<Self, AppError> {
        if account.trim().is_empty() {
            return Err(AppError::credentials_error("Storage account name is empty"));
        }
        Ok(ConnectionSettings {
            endpoint: format!("https://{account}.table.{DEFAULT_ENDPOINT_SUFFIX}"),
            auth: StorageAuth::SharedKey {
                account: account.to_string(),
                key: decode_key(key)?,
            },
        })
    }

    /// Parses a `Key=Value;...` connection string.
    ///
    /// Understands `UseDevelopmentStorage=true`, an explicit `TableEndpoint`,
    /// and either `AccountKey` or `SharedAccessSignature` for authentication.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, AppError> {
        let parts: HashMap<String, String> = connection_string
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .filter_map(|part| {
                part.split_once('=')
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            })
            .collect();

        if parts
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(ConnectionSettings {
                endpoint: DEV_STORAGE_ENDPOINT.to_string(),
                auth: StorageAuth::SharedKey {
                    account: DEV_STORAGE_ACCOUNT.to_string(),
                    key: decode_key(DEV_STORAGE_KEY)?,
                },
            });
        }

        let account = parts.get("accountname").cloned();
        let endpoint = match parts.get("tableendpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let Some(account) = account.as_deref() else {
                    return Err(AppError::credentials_error(
                        "Connection string needs AccountName or TableEndpoint",
                    ));
                };
                let protocol = parts
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = parts
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                format!("{protocol}://{account}.table.{suffix}")
            }
        };

        let auth = match (parts.get("sharedaccesssignature"), parts.get("accountkey"), account) {
            (Some(sas), _, _) => StorageAuth::Sas(sas.trim_start_matches('?').to_string()),
            (None, Some(key), Some(account)) => StorageAuth::SharedKey {
                account,
                key: decode_key(key)?,
            },
            (None, Some(_), None) => {
                return Err(AppError::credentials_error(
                    "Connection string has AccountKey but no AccountName",
                ));
            }
            (None, None, _) => {
                return Err(AppError::credentials_error(
                    "Connection string needs AccountKey or SharedAccessSignature",
                ));
            }
        };

        Ok(ConnectionSettings { endpoint, auth })
    }

    /// `None` for in-memory credentials.
    pub fn from_credentials(credentials: &StorageCredentials) -> Result<Option<Self>, AppError> {
        match credentials {
            StorageCredentials::ConnectionString(value) => {
                Self::from_connection_string(value).map(Some)
            }
            StorageCredentials::AccountKey { account, key } => {
                Self::from_account_key(account, key).map(Some)
            }
            StorageCredentials::InMemory => Ok(None),
        }
    }
}
