use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const CURRENCY: &str = "CLP";

#[derive(Debug, Serialize)]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub currency_id: &'static str,
}

impl PreferenceItem {
    pub fn new(id: String, title: String, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            id,
            title,
            quantity,
            unit_price,
            currency_id: CURRENCY,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Payer {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub payer: Payer,
    pub external_reference: String,
    pub back_urls: BackUrls,
    pub auto_return: &'static str,
    pub notification_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Preference {
    pub id: String,
    pub init_point: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: Option<Decimal>,
}

impl Payment {
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "rejected" | "cancelled" | "refunded" | "charged_back")
    }
}

#[derive(Debug, Serialize)]
pub struct AutoRecurring {
    pub frequency: u32,
    pub frequency_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_amount: Decimal,
    pub currency_id: &'static str,
}

impl AutoRecurring {
    pub fn monthly(amount: Decimal) -> Self {
        Self {
            frequency: 1,
            frequency_type: "months",
            transaction_amount: amount,
            currency_id: CURRENCY,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreapprovalRequest {
    pub reason: String,
    pub payer_email: String,
    pub external_reference: String,
    pub back_url: String,
    pub auto_recurring: AutoRecurring,
    pub status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Preapproval {
    pub id: String,
    pub status: String,
    pub init_point: Option<String>,
    pub external_reference: Option<String>,
    pub next_payment_date: Option<chrono::DateTime<chrono::Utc>>,
}

/// Thin REST client for the MercadoPago checkout, payments and preapproval APIs.
#[derive(Clone)]
pub struct MercadoPago {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    webhook_secret: Option<String>,
}

impl MercadoPago {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: config.mercadopago_api_url.trim_end_matches('/').to_string(),
            access_token: config.mercadopago_access_token.clone(),
            webhook_secret: config.mercadopago_webhook_secret.clone(),
        })
    }

    fn token(&self) -> AppResult<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| AppError::Gateway("MERCADOPAGO_ACCESS_TOKEN is not configured".to_string()))
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> AppResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!("{} failed with {}: {}", what, status, body)));
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn create_preference(&self, request: &PreferenceRequest) -> AppResult<Preference> {
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(self.token()?)
            .json(request)
            .send()
            .await?;
        Self::parse(response, "create preference").await
    }

    pub async fn get_payment(&self, payment_id: &str) -> AppResult<Payment> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
            .bearer_auth(self.token()?)
            .send()
            .await?;
        Self::parse(response, "get payment").await
    }

    pub async fn create_preapproval(&self, request: &PreapprovalRequest) -> AppResult<Preapproval> {
        let response = self
            .http
            .post(format!("{}/preapproval", self.base_url))
            .bearer_auth(self.token()?)
            .json(request)
            .send()
            .await?;
        Self::parse(response, "create preapproval").await
    }

    pub async fn get_preapproval(&self, preapproval_id: &str) -> AppResult<Preapproval> {
        let response = self
            .http
            .get(format!("{}/preapproval/{}", self.base_url, preapproval_id))
            .bearer_auth(self.token()?)
            .send()
            .await?;
        Self::parse(response, "get preapproval").await
    }

    pub async fn cancel_preapproval(&self, preapproval_id: &str) -> AppResult<Preapproval> {
        let response = self
            .http
            .put(format!("{}/preapproval/{}", self.base_url, preapproval_id))
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({ "status": "cancelled" }))
            .send()
            .await?;
        Self::parse(response, "cancel preapproval").await
    }

    /// Checks the `x-signature` header of a webhook notification. Without a configured
    /// secret every notification is accepted.
    pub fn verify_signature(
        &self,
        x_signature: Option<&str>,
        x_request_id: Option<&str>,
        data_id: &str,
    ) -> bool {
        let Some(secret) = self.webhook_secret.as_deref() else {
            log::warn!("MERCADOPAGO_WEBHOOK_SECRET not set; skipping webhook signature check");
            return true;
        };
        let Some(header) = x_signature else {
            return false;
        };

        let mut ts = None;
        let mut v1 = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value.trim()),
                Some(("v1", value)) => v1 = Some(value.trim()),
                _ => {}
            }
        }
        let (Some(ts), Some(v1)) = (ts, v1) else {
            return false;
        };

        let manifest = signature_manifest(data_id, x_request_id, ts);
        let Ok(expected) = sign(secret, &manifest) else {
            return false;
        };
        let Ok(received) = hex::decode(v1) else {
            return false;
        };
        expected.as_slice().ct_eq(received.as_slice()).into()
    }
}

/// `id:<data.id>;request-id:<x-request-id>;ts:<ts>;` with absent parts left out.
pub fn signature_manifest(data_id: &str, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if !data_id.is_empty() {
        // Alphanumeric ids are signed in lowercase
        manifest.push_str(&format!("id:{};", data_id.to_lowercase()));
    }
    if let Some(request_id) = request_id.filter(|r| !r.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

pub fn sign(secret: &str, manifest: &str) -> AppResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
    mac.update(manifest.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
