use askama::Template;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Order, OrderItem};

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Transactional e-mail through the Resend HTTP API. Without an API key messages are only
/// logged, which keeps local development free of outbound mail.
#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            base_url: config.resend_api_url.trim_end_matches('/').to_string(),
            api_key: config.resend_api_key.clone(),
            from: config.email_from.clone(),
        })
    }

    pub async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            log::info!("Email disabled, would send '{}' to {}", message.subject, message.to);
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .json(&SendRequest {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Email(format!("send failed with {}: {}", status, body)));
        }

        log::info!("Sent '{}' to {}", message.subject, message.to);
        Ok(())
    }

    /// Sends a freshly rendered message and logs failures instead of returning them. Used
    /// after a database commit where a lost e-mail must not undo the write.
    pub async fn send_logged(&self, message: AppResult<EmailMessage>) {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                log::error!("Failed to render email: {}", e);
                return;
            }
        };
        if let Err(e) = self.send(&message).await {
            log::error!("Failed to send '{}' to {}: {}", message.subject, message.to, e);
        }
    }
}

fn money(amount: Decimal) -> String {
    // CLP has no minor unit; group thousands with dots
    let whole = amount.round().abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if amount < Decimal::ZERO { "-" } else { "" };
    format!("{}${}", sign, grouped)
}

fn order_link(site_url: &str, order: &Order) -> String {
    format!(
        "{}/pedido/{}?email={}",
        site_url,
        order.id,
        urlencoding::encode(&order.guest_email)
    )
}

struct ItemRow<'a> {
    title: &'a str,
    quantity: i32,
    total: String,
}

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmation<'a> {
    name: &'a str,
    rows: Vec<ItemRow<'a>>,
    subtotal: String,
    shipping: String,
    total: String,
    link: String,
}

#[derive(Template)]
#[template(path = "email/shipping_update.html")]
struct ShippingUpdate<'a> {
    name: &'a str,
    address: &'a str,
    note: &'a str,
    link: String,
}

#[derive(Template)]
#[template(path = "email/loyalty_notice.html")]
struct LoyaltyNotice<'a> {
    name: &'a str,
    points: i32,
}

#[derive(Template)]
#[template(path = "email/payment_reminder.html")]
struct PaymentReminder<'a> {
    description: &'a str,
    outstanding: String,
    due: &'a str,
}

pub fn order_confirmation(order: &Order, items: &[OrderItem], site_url: &str) -> AppResult<EmailMessage> {
    let html = OrderConfirmation {
        name: &order.guest_name,
        rows: items
            .iter()
            .map(|item| ItemRow {
                title: &item.title,
                quantity: item.quantity,
                total: money(item.line_total),
            })
            .collect(),
        subtotal: money(order.subtotal),
        shipping: money(order.shipping_cost),
        total: money(order.total_amount),
        link: order_link(site_url, order),
    }
    .render()?;

    Ok(EmailMessage {
        to: order.guest_email.clone(),
        subject: format!("Confirmación de tu pedido #{}", short_id(order)),
        html,
    })
}

pub fn shipping_update(order: &Order, site_url: &str) -> AppResult<EmailMessage> {
    let html = ShippingUpdate {
        name: &order.guest_name,
        address: &order.shipping_address,
        note: order.tracking_note.as_deref().unwrap_or("").trim(),
        link: order_link(site_url, order),
    }
    .render()?;

    Ok(EmailMessage {
        to: order.guest_email.clone(),
        subject: format!("Tu pedido #{} va en camino", short_id(order)),
        html,
    })
}

pub fn loyalty_notice(email: &str, name: Option<&str>, points: i32) -> AppResult<EmailMessage> {
    let html = LoyaltyNotice {
        name: name.unwrap_or("cliente"),
        points,
    }
    .render()?;

    Ok(EmailMessage {
        to: email.to_string(),
        subject: "¡Tienes puntos para canjear!".to_string(),
        html,
    })
}

pub fn payment_reminder(
    email: &str,
    description: &str,
    outstanding: Decimal,
    due: &str,
) -> AppResult<EmailMessage> {
    let html = PaymentReminder {
        description,
        outstanding: money(outstanding),
        due,
    }
    .render()?;

    Ok(EmailMessage {
        to: email.to_string(),
        subject: format!("Recordatorio de pago: {}", description),
        html,
    })
}

fn short_id(order: &Order) -> String {
    order.id.simple().to_string()[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mailer(base_url: &str, api_key: Option<&str>) -> Mailer {
        let mut config = AppConfig::for_tests();
        config.resend_api_url = base_url.to_string();
        config.resend_api_key = api_key.map(str::to_string);
        Mailer::new(&config).unwrap()
    }

    fn message() -> EmailMessage {
        loyalty_notice("cliente@correo.cl", Some("Ana"), 120).unwrap()
    }

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(Decimal::from(17200)), "$17.200");
        assert_eq!(money(Decimal::from(1_234_567)), "$1.234.567");
        assert_eq!(money(Decimal::from(990)), "$990");
        assert_eq!(money(Decimal::from(-3990)), "-$3.990");
    }

    fn order(guest_name: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: None,
            guest_email: "ana+fardos@correo.cl".to_string(),
            guest_name: guest_name.to_string(),
            phone: None,
            shipping_address: "Camino Real 123".to_string(),
            city: None,
            region: None,
            status: "paid".to_string(),
            subtotal: Decimal::from(13000),
            shipping_cost: Decimal::from(3990),
            total_amount: Decimal::from(16990),
            mp_preference_id: None,
            mp_payment_id: None,
            tracking_note: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(order: &Order, title: &str) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: None,
            title: title.to_string(),
            quantity: 2,
            unit_price: Decimal::from(6500),
            line_total: Decimal::from(13000),
        }
    }

    #[test]
    fn confirmation_lists_items_and_totals() {
        let order = order("Ana");
        let items = vec![item(&order, "Fardo Alfalfa")];

        let email = order_confirmation(&order, &items, "https://fardo.cl").unwrap();
        assert_eq!(email.to, "ana+fardos@correo.cl");
        assert!(email.html.contains("Fardo Alfalfa"));
        assert!(email.html.contains("$16.990"));
        assert!(email.html.contains("email=ana%2Bfardos%40correo.cl"));
    }

    #[test]
    fn customer_text_is_escaped() {
        let order = order(r#"<a href="https://evil.example">Pagar aqui</a>"#);
        let items = vec![item(&order, "<script>alert(1)</script>")];

        let email = order_confirmation(&order, &items, "https://fardo.cl").unwrap();
        assert!(!email.html.contains("<a href=\"https://evil.example\">"));
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;a href="));
        assert!(email.html.contains("&lt;script&gt;"));

        let reminder = payment_reminder(
            "admin@fardo.cl",
            "<b>Riego</b>",
            Decimal::from(18000),
            "05-11-2024",
        )
        .unwrap();
        assert!(reminder.html.contains("&lt;b&gt;Riego&lt;/b&gt;"));
        assert!(reminder.html.contains("$18.000"));

        let notice = loyalty_notice("ana@correo.cl", Some("<i>Ana</i>"), 120).unwrap();
        assert!(!notice.html.contains("<i>"));
        assert!(notice.html.contains("120 puntos"));
    }

    #[test]
    fn shipping_update_carries_the_tracking_note() {
        let mut shipped = order("Ana");
        shipped.tracking_note = Some("Starken 99812".to_string());
        let email = shipping_update(&shipped, "https://fardo.cl").unwrap();
        assert!(email.html.contains("Starken 99812"));
        assert!(email.html.contains("Camino Real 123"));

        shipped.tracking_note = None;
        let email = shipping_update(&shipped, "https://fardo.cl").unwrap();
        assert!(!email.html.contains("<p></p>"));
    }

    #[tokio::test]
    async fn sends_through_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(bearer_token("re_test"))
            .and(body_partial_json(serde_json::json!({ "to": ["cliente@correo.cl"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "em_1" })))
            .expect(1)
            .mount(&server)
            .await;

        mailer(&server.uri(), Some("re_test")).send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn provider_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let err = mailer(&server.uri(), Some("re_test")).send(&message()).await.unwrap_err();
        assert!(matches!(err, AppError::Email(_)));
    }

    #[tokio::test]
    async fn without_api_key_nothing_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        mailer(&server.uri(), None).send(&message()).await.unwrap();
    }
}
