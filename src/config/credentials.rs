use crate::constants::env_vars;
use crate::error::AppError;
use std::fmt;

/// How the harvester authenticates against the game API.
#[derive(Clone, PartialEq, Eq)]
pub enum ApiCredentials {
    /// Pre-provisioned API token, used as-is.
    Token(String),
    /// Developer-portal account; a key for the current IP is provisioned at startup.
    Login { email: String, password: String },
}

/// How the harvester reaches table storage.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageCredentials {
    ConnectionString(String),
    AccountKey { account: String, key: String },
    /// Dry runs write into process memory only.
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api: ApiCredentials,
    pub storage: StorageCredentials,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiCredentials::Token(_) => f.write_str("Token(<redacted>)"),
            ApiCredentials::Login { email, .. } => f
                .debug_struct("Login")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCredentials::ConnectionString(_) => f.write_str("ConnectionString(<redacted>)"),
            StorageCredentials::AccountKey { account, .. } => f
                .debug_struct("AccountKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            StorageCredentials::InMemory => f.write_str("InMemory"),
        }
    }
}

/// Raw credential values as supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CredentialInputs {
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
    pub connection_string: Option<String>,
    pub account_name: Option<String>,
    pub access_key: Option<String>,
    pub dry_run: bool,
}

fn pick(flag: &Option<String>, env_name: &str) -> Option<String> {
    flag.clone()
        .or_else(|| std::env::var(env_name).ok())
        .filter(|value| !value.trim().is_empty())
}

impl Credentials {
    /// Merges command-line values with their environment fallbacks.
    ///
    /// Flags win over environment variables. A token wins over an
    /// email/password pair, and a connection string wins over an
    /// account name/key pair.
    pub fn resolve(inputs: &CredentialInputs) -> Result<Self, AppError> {
        let api = match pick(&inputs.api_token, env_vars::API_TOKEN) {
            Some(token) => ApiCredentials::Token(token),
            None => {
                let email = pick(&inputs.email, env_vars::EMAIL);
                let password = pick(&inputs.password, env_vars::PASSWORD);
                match (email, password) {
                    (Some(email), Some(password)) => ApiCredentials::Login { email, password },
                    (Some(_), None) | (None, Some(_)) => {
                        return Err(AppError::credentials_error(
                            "Developer portal login needs both an email and a password",
                        ));
                    }
                    (None, None) => {
                        return Err(AppError::credentials_error(format!(
                            "No game API credentials: pass --api-token or --email/--password, or set {} / {} and {}",
                            env_vars::API_TOKEN,
                            env_vars::EMAIL,
                            env_vars::PASSWORD
                        )));
                    }
                }
            }
        };

        if inputs.dry_run {
            return Ok(Credentials {
                api,
                storage: StorageCredentials::InMemory,
            });
        }

        let storage = match pick(&inputs.connection_string, env_vars::CONNECTION_STRING) {
            Some(connection_string) => StorageCredentials::ConnectionString(connection_string),
            None => {
                let account = pick(&inputs.account_name, env_vars::ACCOUNT_NAME);
                let key = pick(&inputs.access_key, env_vars::ACCESS_KEY);
                match (account, key) {
                    (Some(account), Some(key)) => StorageCredentials::AccountKey { account, key },
                    (Some(_), None) | (None, Some(_)) => {
                        return Err(AppError::credentials_error(
                            "Storage account name and access key must be given together",
                        ));
                    }
                    (None, None) => {
                        return Err(AppError::credentials_error(format!(
                            "No storage credentials: pass --connection-string or --account-name/--access-key, or set {}",
                            env_vars::CONNECTION_STRING
                        )));
                    }
                }
            }
        };

        Ok(Credentials { api, storage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            for name in [
                env_vars::API_TOKEN,
                env_vars::EMAIL,
                env_vars::PASSWORD,
                env_vars::CONNECTION_STRING,
                env_vars::ACCOUNT_NAME,
                env_vars::ACCESS_KEY,
            ] {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_flags_resolve_without_env() {
        clear_env();
        let inputs = CredentialInputs {
            email: Some("chief@example.com".to_string()),
            password: Some("hunter2".to_string()),
            connection_string: Some("UseDevelopmentStorage=true".to_string()),
            ..Default::default()
        };

        let credentials = Credentials::resolve(&inputs).unwrap();
        assert_eq!(
            credentials.api,
            ApiCredentials::Login {
                email: "chief@example.com".to_string(),
                password: "hunter2".to_string()
            }
        );
        assert_eq!(
            credentials.storage,
            StorageCredentials::ConnectionString("UseDevelopmentStorage=true".to_string())
        );
    }

    #[test]
    #[serial]
    fn test_env_fallback_and_token_precedence() {
        clear_env();
        unsafe {
            std::env::set_var(env_vars::API_TOKEN, "env-token");
            std::env::set_var(env_vars::EMAIL, "ignored@example.com");
            std::env::set_var(env_vars::ACCOUNT_NAME, "harvest");
            std::env::set_var(env_vars::ACCESS_KEY, "a2V5");
        }

        let credentials = Credentials::resolve(&CredentialInputs::default()).unwrap();
        clear_env();

        assert_eq!(credentials.api, ApiCredentials::Token("env-token".to_string()));
        assert_eq!(
            credentials.storage,
            StorageCredentials::AccountKey {
                account: "harvest".to_string(),
                key: "a2V5".to_string()
            }
        );
    }

    #[test]
    #[serial]
    fn test_partial_pairs_are_rejected() {
        clear_env();
        let inputs = CredentialInputs {
            email: Some("chief@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Credentials::resolve(&inputs),
            Err(AppError::Credentials(_))
        ));

        let inputs = CredentialInputs {
            api_token: Some("token".to_string()),
            account_name: Some("harvest".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Credentials::resolve(&inputs),
            Err(AppError::Credentials(_))
        ));
    }

    #[test]
    #[serial]
    fn test_dry_run_needs_no_storage() {
        clear_env();
        let inputs = CredentialInputs {
            api_token: Some("token".to_string()),
            dry_run: true,
            ..Default::default()
        };

        let credentials = Credentials::resolve(&inputs).unwrap();
        assert_eq!(credentials.storage, StorageCredentials::InMemory);
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let credentials = Credentials {
            api: ApiCredentials::Login {
                email: "chief@example.com".to_string(),
                password: "hunter2".to_string(),
            },
            storage: StorageCredentials::AccountKey {
                account: "harvest".to_string(),
                key: "c2VjcmV0".to_string(),
            },
        };

        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("chief@example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("c2VjcmV0"));
    }
}
