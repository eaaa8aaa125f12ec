use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{Order, PaymentMethod, ShippingDetails},
};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const MAX_INTENT_ID_LEN: usize = 255;

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub payment_method: PaymentMethod,
    /// Required when `paymentMethod` is `stripe`.
    pub payment_intent_id: Option<String>,
    /// Fallback for clients that cannot set the `Idempotency-Key` header.
    pub idempotency_key: Option<String>,
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 500, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 1, max = 120, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 32, message = "postalCode is required"))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 64, message = "country is required"))]
    pub country: String,
    #[validate(length(min = 3, max = 32, message = "phone is required"))]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentChoice {
    CashOnDelivery,
    Gateway { intent_id: String },
}

impl PaymentChoice {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentChoice::CashOnDelivery => PaymentMethod::Cod,
            PaymentChoice::Gateway { .. } => PaymentMethod::Stripe,
        }
    }
}

/// A validated placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrderCommand {
    pub payment: PaymentChoice,
    pub shipping: ShippingDetails,
    pub idempotency_key: Option<String>,
}

impl PlaceOrderRequest {
    /// Validates the body and resolves the idempotency key. The header value
    /// wins over the body field when both are present.
    pub fn into_command(mut self, header_key: Option<&str>) -> AppResult<PlaceOrderCommand> {
        self.trim_fields();
        self.validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let payment = match (self.payment_method, self.payment_intent_id) {
            (PaymentMethod::Cod, _) => PaymentChoice::CashOnDelivery,
            (PaymentMethod::Stripe, Some(intent_id)) => {
                if !is_valid_intent_id(&intent_id) {
                    return Err(AppError::BadRequest("paymentIntentId is malformed".into()));
                }
                PaymentChoice::Gateway { intent_id }
            }
            (PaymentMethod::Stripe, None) => {
                return Err(AppError::BadRequest(
                    "paymentIntentId is required for stripe payments".into(),
                ));
            }
        };

        let idempotency_key = match normalize_idempotency_key(header_key)? {
            Some(key) => Some(key),
            None => normalize_idempotency_key(self.idempotency_key.as_deref())?,
        };

        Ok(PlaceOrderCommand {
            payment,
            shipping: ShippingDetails {
                name: self.name,
                email: self.email,
                address: self.address,
                city: self.city,
                postal_code: self.postal_code,
                country: self.country,
                phone: self.phone,
            },
            idempotency_key,
        })
    }

    fn trim_fields(&mut self) {
        for field in [
            &mut self.name,
            &mut self.address,
            &mut self.city,
            &mut self.postal_code,
            &mut self.country,
            &mut self.phone,
        ] {
            *field = field.trim().to_string();
        }
        self.email = blank_to_none(self.email.take());
        self.payment_intent_id = blank_to_none(self.payment_intent_id.take());
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Blank keys are ignored; overlong keys are rejected.
pub fn normalize_idempotency_key(raw: Option<&str>) -> AppResult<Option<String>> {
    let Some(key) = raw.map(str::trim).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(Some(key.to_string()))
}

/// Intent ids are interpolated into the gateway URL, so only `[A-Za-z0-9_]` is accepted.
fn is_valid_intent_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_INTENT_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: PaymentMethod, intent: Option<&str>) -> PlaceOrderRequest {
        PlaceOrderRequest {
            payment_method: method,
            payment_intent_id: intent.map(str::to_string),
            idempotency_key: None,
            name: "  Ada Lovelace ".into(),
            email: Some("".into()),
            address: "12 Analytical St".into(),
            city: "London".into(),
            postal_code: "N1 9GU".into(),
            country: "GB".into(),
            phone: "+44 20 7946 0000".into(),
        }
    }

    #[test]
    fn cod_ignores_intent_and_trims_fields() {
        let cmd = request(PaymentMethod::Cod, Some("pi_123"))
            .into_command(None)
            .unwrap();
        assert_eq!(cmd.payment, PaymentChoice::CashOnDelivery);
        assert_eq!(cmd.shipping.name, "Ada Lovelace");
        assert_eq!(cmd.shipping.email, None);
    }

    #[test]
    fn stripe_requires_a_well_formed_intent() {
        let missing = request(PaymentMethod::Stripe, None).into_command(None);
        assert!(matches!(missing, Err(AppError::BadRequest(msg)) if msg.contains("required")));

        let blank = request(PaymentMethod::Stripe, Some("   ")).into_command(None);
        assert!(matches!(blank, Err(AppError::BadRequest(_))));

        let traversal = request(PaymentMethod::Stripe, Some("pi_1/../refunds")).into_command(None);
        assert!(matches!(traversal, Err(AppError::BadRequest(msg)) if msg.contains("malformed")));

        let ok = request(PaymentMethod::Stripe, Some("pi_3Nabc")).into_command(None).unwrap();
        assert_eq!(
            ok.payment,
            PaymentChoice::Gateway {
                intent_id: "pi_3Nabc".into()
            }
        );
    }

    #[test]
    fn blank_shipping_field_is_rejected() {
        let mut req = request(PaymentMethod::Cod, None);
        req.city = "   ".into();
        assert!(matches!(req.into_command(None), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn header_key_wins_over_body_key() {
        let mut req = request(PaymentMethod::Cod, None);
        req.idempotency_key = Some("from-body".into());
        let cmd = req.clone().into_command(Some(" from-header ")).unwrap();
        assert_eq!(cmd.idempotency_key.as_deref(), Some("from-header"));

        let cmd = req.into_command(Some("  ")).unwrap();
        assert_eq!(cmd.idempotency_key.as_deref(), Some("from-body"));
    }

    #[test]
    fn overlong_key_is_rejected() {
        let key = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(normalize_idempotency_key(Some(&key)).is_err());
        assert_eq!(normalize_idempotency_key(Some("")).unwrap(), None);
    }

    #[test]
    fn key_limit_counts_characters_not_bytes() {
        let multibyte = "é".repeat(MAX_IDEMPOTENCY_KEY_LEN);
        assert!(multibyte.len() > MAX_IDEMPOTENCY_KEY_LEN);
        assert_eq!(
            normalize_idempotency_key(Some(&multibyte)).unwrap(),
            Some(multibyte.clone())
        );
    }
}
