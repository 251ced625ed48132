//! Live remote store: Firestore documents and Firebase Auth over REST.
//!
//! - Accounts: `accounts:signUp` / `accounts:signInWithPassword` on the
//!   Identity Toolkit API. The returned ID token authorises later document
//!   calls.
//! - Documents: `licenses/{code}` and `users/{uid}` in the default database.
//!   Merge writes send `updateMask.fieldPaths` for every written field.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Identity, LicenseRecord, LicenseUpdate, RemoteLicenseStore, UserRecord, UserUpdate};
use crate::config::RemoteConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::logging::mask_email;

const AUTH_BASE: &str = "https://identitytoolkit.googleapis.com/v1";
const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";

/// Firestore + Firebase Auth backed store.
pub struct FirestoreLicenseStore {
    client: Client,
    project_id: String,
    api_key: String,
    id_token: RwLock<Option<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    id_token: String,
    local_id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: Map<String, Value>,
}

impl FirestoreLicenseStore {
    pub fn new(config: &RemoteConfig) -> LicenseResult<Self> {
        if config.project_id.is_empty() || config.api_key.is_empty() {
            return Err(LicenseError::ConfigError(
                "live remote store needs project_id and api_key".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            project_id: config.project_id.clone(),
            api_key: config.api_key.clone(),
            id_token: RwLock::new(None),
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}/{}",
            FIRESTORE_BASE, self.project_id, collection, id
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.query(&[("key", self.api_key.as_str())]);
        match self.id_token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn credentials_call(&self, endpoint: &str, email: &str, password: &str) -> LicenseResult<Identity> {
        let url = format!("{}/accounts:{}", AUTH_BASE, endpoint);
        let body = CredentialsRequest {
            email,
            password,
            return_secure_token: true,
        };

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if resp.status().is_server_error() {
            return Err(LicenseError::RemoteUnavailable(format!(
                "auth service returned {}",
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            let message = error_message(resp).await;
            warn!(email = %mask_email(email), endpoint, error = %message, "Firebase auth rejected");
            return Err(LicenseError::AuthenticationFailed(message));
        }

        let auth: AuthResponse = resp.json().await?;
        *self.id_token.write().await = Some(auth.id_token);
        Ok(Identity {
            uid: auth.local_id,
            email: auth.email,
        })
    }

    async fn get_document<T: DeserializeOwned>(&self, collection: &str, id: &str) -> LicenseResult<Option<T>> {
        let request = self.client.get(self.document_url(collection, id));
        let resp = self.authorize(request).await.send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp).await?;

        let doc: FirestoreDocument = resp.json().await?;
        let value = from_firestore_fields(&doc.fields);
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| LicenseError::RemoteRejected(format!("malformed {collection}/{id}: {e}")))
    }

    async fn write_document<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        fields: &T,
        merge: bool,
    ) -> LicenseResult<()> {
        let fields = match serde_json::to_value(fields)? {
            Value::Object(map) => map,
            _ => {
                return Err(LicenseError::SerializationError(
                    "document fields must be an object".to_string(),
                ))
            }
        };

        let mut request = self.client.patch(self.document_url(collection, id));
        if merge {
            let mask: Vec<(&str, &str)> = fields
                .keys()
                .map(|k| ("updateMask.fieldPaths", k.as_str()))
                .collect();
            request = request.query(&mask);
        }

        let body = json!({ "fields": to_firestore_fields(&fields) });
        let resp = self.authorize(request).await.json(&body).send().await?;
        check_status(resp).await?;
        debug!(collection, merge, "Firestore document written");
        Ok(())
    }
}

async fn error_message(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorEnvelope>().await {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ => format!("HTTP {status}"),
    }
}

async fn check_status(resp: Response) -> LicenseResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = error_message(resp).await;
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(LicenseError::RemoteUnavailable(message))
    } else {
        Err(LicenseError::RemoteRejected(message))
    }
}

/// Plain JSON object -> Firestore `fields` map.
fn to_firestore_fields(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), to_firestore_value(v)))
            .collect(),
    )
}

fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(to_firestore_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": to_firestore_fields(map) } }),
    }
}

/// Firestore `fields` map -> plain JSON object.
fn from_firestore_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), from_firestore_value(v)))
            .collect(),
    )
}

fn from_firestore_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" | "booleanValue" | "stringValue" | "timestampValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(from_firestore_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => inner
            .get("fields")
            .and_then(Value::as_object)
            .map(from_firestore_fields)
            .unwrap_or_else(|| Value::Object(Map::new())),
        _ => Value::Null,
    }
}

#[async_trait]
impl RemoteLicenseStore for FirestoreLicenseStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn get_license(&self, code: &str) -> LicenseResult<Option<LicenseRecord>> {
        self.get_document("licenses", code).await
    }

    async fn set_license(&self, code: &str, fields: &LicenseUpdate, merge: bool) -> LicenseResult<()> {
        self.write_document("licenses", code, fields, merge).await
    }

    async fn get_user(&self, uid: &str) -> LicenseResult<Option<UserRecord>> {
        self.get_document("users", uid).await
    }

    async fn set_user(&self, uid: &str, fields: &UserUpdate, merge: bool) -> LicenseResult<()> {
        self.write_document("users", uid, fields, merge).await
    }

    async fn create_account(&self, email: &str, password: &str) -> LicenseResult<Identity> {
        self.credentials_call("signUp", email, password).await
    }

    async fn authenticate(&self, email: &str, password: &str) -> LicenseResult<Identity> {
        self.credentials_call("signInWithPassword", email, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteMode;

    #[test]
    fn firestore_values_convert_both_ways() {
        let plain = json!({
            "code": "LIQ-2025-TEST-0001-MAIK",
            "validationCount": 4,
            "isRenewal": false,
            "previousLicenses": ["LIQ-2024-AAAA-BBBB-SAEZ"],
            "meta": { "ratio": 0.5 }
        });
        let Value::Object(map) = &plain else { unreachable!() };

        let encoded = to_firestore_fields(map);
        assert_eq!(encoded["validationCount"], json!({"integerValue": "4"}));
        assert_eq!(encoded["code"]["stringValue"], "LIQ-2025-TEST-0001-MAIK");

        let Value::Object(encoded) = encoded else { unreachable!() };
        assert_eq!(from_firestore_fields(&encoded), plain);
    }

    #[test]
    fn live_store_requires_credentials() {
        let config = RemoteConfig {
            mode: RemoteMode::Live,
            project_id: String::new(),
            api_key: String::new(),
            timeout_secs: 5,
        };
        assert!(matches!(
            FirestoreLicenseStore::new(&config),
            Err(LicenseError::ConfigError(_))
        ));
    }

    #[test]
    fn document_urls_use_default_database() {
        let config = RemoteConfig {
            mode: RemoteMode::Live,
            project_id: "liqueen-app".into(),
            api_key: "k".into(),
            timeout_secs: 5,
        };
        let store = FirestoreLicenseStore::new(&config).unwrap();
        assert_eq!(
            store.document_url("licenses", "LIQ-2025-TEST-0001-MAIK"),
            "https://firestore.googleapis.com/v1/projects/liqueen-app/databases/(default)/documents/licenses/LIQ-2025-TEST-0001-MAIK"
        );
    }
}
