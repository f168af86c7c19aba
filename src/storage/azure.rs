//! Azure Table Storage over its REST interface.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use super::TableStore;
use super::connection::{ConnectionSettings, StorageAuth};
use crate::constants::table_storage::API_VERSION;
use crate::error::StorageError;
use crate::normalizer::{EntityKey, EntityValue, NormalizedEntity};

type HmacSha256 = Hmac<Sha256>;

const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";

pub struct AzureTableStore {
    client: Client,
    settings: ConnectionSettings,
}

/// `{table}(PartitionKey='..',RowKey='..')` with quotes doubled and values
/// percent-encoded.
pub fn entity_resource(table: &str, partition_key: &str, row_key: &str) -> String {
    let quote = |value: &str| urlencoding::encode(&value.replace('\'', "''")).into_owned();
    format!(
        "{table}(PartitionKey='{}',RowKey='{}')",
        quote(partition_key),
        quote(row_key)
    )
}

/// JSON body for an entity. Integers outside the 32-bit range and all
/// doubles carry an explicit EDM type.
pub fn entity_body(entity: &NormalizedEntity) -> Value {
    let mut body = Map::new();
    body.insert("PartitionKey".to_string(), json!(entity.partition_key));
    body.insert("RowKey".to_string(), json!(entity.row_key));

    for (name, value) in &entity.fields {
        let typed = |body: &mut Map<String, Value>, edm: &str| {
            body.insert(format!("{name}@odata.type"), json!(edm));
        };
        match value {
            EntityValue::String(s) => {
                body.insert(name.clone(), json!(s));
            }
            EntityValue::Bool(b) => {
                body.insert(name.clone(), json!(b));
            }
            EntityValue::Int(i) if i32::try_from(*i).is_ok() => {
                body.insert(name.clone(), json!(i));
            }
            EntityValue::Int(i) => {
                body.insert(name.clone(), json!(i.to_string()));
                typed(&mut body, "Edm.Int64");
            }
            EntityValue::Double(d) => {
                let value = if d.is_nan() {
                    json!("NaN")
                } else if d.is_infinite() {
                    let sign = if *d > 0.0 { "Infinity" } else { "-Infinity" };
                    json!(sign)
                } else {
                    json!(d)
                };
                body.insert(name.clone(), value);
                typed(&mut body, "Edm.Double");
            }
        }
    }
    Value::Object(body)
}

/// SharedKeyLite signature over `x-ms-date` and the canonical resource.
pub fn sign_shared_key_lite(
    account: &str,
    key: &[u8],
    date: &str,
    path: &str,
) -> Result<String, hmac::digest::InvalidLength> {
    let string_to_sign = format!("{date}\n/{account}{path}");
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn map_status(table: &str, status: StatusCode, body: String) -> StorageError {
    match status.as_u16() {
        401 | 403 => StorageError::Unauthorized {
            table: table.to_string(),
            status: status.as_u16(),
        },
        408 | 429 | 500..=599 => StorageError::transient(table, format!("HTTP {status}: {body}")),
        code => StorageError::Rejected {
            table: table.to_string(),
            status: code,
            message: body,
        },
    }
}

impl AzureTableStore {
    pub fn new(client: Client, settings: ConnectionSettings) -> Self {
        AzureTableStore { client, settings }
    }

    fn url(&self, table: &str, resource: &str, query: &[(&str, &str)]) -> Result<Url, StorageError> {
        let mut url = Url::parse(&format!("{}/{resource}", self.settings.endpoint))
            .map_err(|e| StorageError::Rejected {
                table: table.to_string(),
                status: 0,
                message: format!("invalid table URL: {e}"),
            })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        if let StorageAuth::Sas(sas) = &self.settings.auth {
            let joined = match url.query() {
                Some(existing) => format!("{existing}&{sas}"),
                None => sas.clone(),
            };
            url.set_query(Some(&joined));
        }
        Ok(url)
    }

    fn request(&self, table: &str, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut builder = self
            .client
            .request(method, url.clone())
            .header("x-ms-date", date.as_str())
            .header("x-ms-version", API_VERSION)
            .header(reqwest::header::ACCEPT, ACCEPT_NO_METADATA)
            .header("DataServiceVersion", "3.0;NetFx");

        if let StorageAuth::SharedKey { account, key } = &self.settings.auth {
            let signature = sign_shared_key_lite(account, key, &date, url.path()).map_err(|e| {
                StorageError::Unauthorized {
                    table: format!("{table} ({e})"),
                    status: 0,
                }
            })?;
            builder = builder.header(
                reqwest::header::AUTHORIZATION,
                format!("SharedKeyLite {account}:{signature}"),
            );
        }
        Ok(builder)
    }

    async fn send(&self, table: &str, builder: RequestBuilder) -> Result<reqwest::Response, StorageError> {
        builder.send().await.map_err(|e| {
            warn!("Table request failed for {table}: {e}");
            StorageError::transient(table, e.to_string())
        })
    }
}

#[async_trait]
impl TableStore for AzureTableStore {
    #[instrument(skip(self))]
    async fn ensure_table(&self, table: &str) -> Result<(), StorageError> {
        let url = self.url(table, "Tables", &[])?;
        let builder = self
            .request(table, Method::POST, url)?
            .header("Prefer", "return-no-content")
            .json(&json!({ "TableName": table }));
        let response = self.send(table, builder).await?;

        match response.status() {
            status if status.is_success() => {
                debug!("Created table {table}");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            status => Err(map_status(table, status, response.text().await.unwrap_or_default())),
        }
    }

    async fn create(&self, entity: &NormalizedEntity) -> Result<(), StorageError> {
        let table = entity.table_name.as_str();
        let url = self.url(table, table, &[])?;
        let builder = self
            .request(table, Method::POST, url)?
            .header("Prefer", "return-no-content")
            .json(&entity_body(entity));
        let response = self.send(table, builder).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StorageError::Conflict {
                table: table.to_string(),
                partition_key: entity.partition_key.clone(),
                row_key: entity.row_key.clone(),
            }),
            status => Err(map_status(table, status, response.text().await.unwrap_or_default())),
        }
    }

    async fn upsert(&self, entity: &NormalizedEntity) -> Result<(), StorageError> {
        let table = entity.table_name.as_str();
        let resource = entity_resource(table, &entity.partition_key, &entity.row_key);
        let url = self.url(table, &resource, &[])?;
        let builder = self.request(table, Method::PUT, url)?.json(&entity_body(entity));
        let response = self.send(table, builder).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(map_status(table, status, response.text().await.unwrap_or_default())),
        }
    }

    async fn exists(&self, key: &EntityKey) -> Result<bool, StorageError> {
        let table = key.table.as_str();
        let resource = entity_resource(table, &key.partition_key, &key.row_key);
        let url = self.url(table, &resource, &[("$select", "PartitionKey")])?;
        let response = self.send(table, self.request(table, Method::GET, url)?).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(map_status(table, status, response.text().await.unwrap_or_default())),
        }
    }
}
