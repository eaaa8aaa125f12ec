#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use storefront_api::{
    config::PaymentSettings,
    dto::orders::PlaceOrderRequest,
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Order, OrderItem, PaymentMethod},
    repository::orders::{NewOrder, OrderRepository, RepoError, UniqueField},
    services::{
        cart_service::{CartLine, CartSnapshot, CartSnapshotReader},
        order_service::OrderPlacementService,
        payment_gateway::{GatewayError, IntentStatus, PaymentGateway, PaymentIntent},
    },
};
use uuid::Uuid;

pub const SECRET_KEY: &str = "sk_test_do_not_leak_4242";

/// Orders kept in memory with the same uniqueness rules as the Postgres indexes.
#[derive(Default)]
pub struct InMemoryOrders {
    orders: Mutex<Vec<Order>>,
    pub create_calls: AtomicUsize,
    /// Makes `find_by_transaction_id` miss, as if a concurrent insert had not landed yet.
    hide_transaction_lookups: bool,
}

impl InMemoryOrders {
    pub fn racing() -> Self {
        Self {
            hide_transaction_lookups: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrders {
    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .find(|o| o.user_id == user_id && o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepoError> {
        if self.hide_transaction_lookups {
            return Ok(None);
        }
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .find(|o| o.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn create(&self, new: NewOrder) -> Result<Order, RepoError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut orders = self.orders.lock().unwrap();

        if let Some(key) = new.idempotency_key.as_deref()
            && orders
                .iter()
                .any(|o| o.user_id == new.user_id && o.idempotency_key.as_deref() == Some(key))
        {
            return Err(RepoError::Duplicate(UniqueField::IdempotencyKey));
        }
        if let Some(txn) = new.transaction_id.as_deref()
            && orders
                .iter()
                .any(|o| o.transaction_id.as_deref() == Some(txn))
        {
            return Err(RepoError::Duplicate(UniqueField::TransactionId));
        }

        let order = Order {
            id: Uuid::new_v4(),
            order_number: new.order_number,
            user_id: new.user_id,
            idempotency_key: new.idempotency_key,
            payment_method: new.payment_method,
            transaction_id: new.transaction_id,
            payment_status: new.payment_status,
            status: "pending".into(),
            total_amount: new.total_amount,
            currency: new.currency,
            shipping: new.shipping,
            items: new
                .items
                .into_iter()
                .map(|item| OrderItem {
                    id: Uuid::new_v4(),
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_amount: item.unit_amount,
                })
                .collect(),
            created_at: Utc::now(),
        };
        orders.push(order.clone());
        Ok(order)
    }
}

pub struct FakeCart {
    lines: Mutex<Vec<CartLine>>,
    currency: String,
    pub reads: AtomicUsize,
    /// Yield once per read so concurrent placements interleave.
    pub yield_on_read: bool,
}

impl FakeCart {
    pub fn with_lines(lines: Vec<CartLine>) -> Self {
        Self {
            lines: Mutex::new(lines),
            currency: "usd".into(),
            reads: AtomicUsize::new(0),
            yield_on_read: false,
        }
    }

    /// One product at the given unit price (minor units).
    pub fn single(quantity: i32, unit_amount: i64) -> Self {
        Self::with_lines(vec![CartLine {
            product_id: Uuid::new_v4(),
            quantity,
            unit_amount,
        }])
    }

    pub fn empty() -> Self {
        Self::with_lines(Vec::new())
    }
}

#[async_trait]
impl CartSnapshotReader for FakeCart {
    async fn cart_total(&self, _user_id: Uuid) -> AppResult<CartSnapshot> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.yield_on_read {
            tokio::task::yield_now().await;
        }
        let lines = self.lines.lock().unwrap().clone();
        CartSnapshot::from_lines(lines, self.currency.clone())
    }
}

#[derive(Clone)]
pub enum GatewayReply {
    Intent(PaymentIntent),
    NotFound,
    Unavailable,
    Malformed,
}

pub struct FakeGateway {
    replies: Mutex<HashMap<String, GatewayReply>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_secret: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            last_secret: Mutex::new(None),
        }
    }

    pub fn with_intent(intent: PaymentIntent) -> Self {
        let gateway = Self::new();
        gateway.reply(&intent.id.clone(), GatewayReply::Intent(intent));
        gateway
    }

    pub fn reply(&self, intent_id: &str, reply: GatewayReply) {
        self.replies
            .lock()
            .unwrap()
            .insert(intent_id.to_string(), reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn retrieve_payment_intent(
        &self,
        secret_key: &SecretString,
        intent_id: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_secret.lock().unwrap() = Some(secret_key.expose_secret().to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().get(intent_id).cloned();
        match reply {
            Some(GatewayReply::Intent(intent)) => Ok(intent),
            Some(GatewayReply::Unavailable) => Err(GatewayError::Unavailable("503".into())),
            Some(GatewayReply::Malformed) => Err(GatewayError::Malformed("eof".into())),
            Some(GatewayReply::NotFound) | None => Err(GatewayError::NotFound),
        }
    }
}

pub fn succeeded_intent(id: &str, amount_received: i64) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        status: IntentStatus::Succeeded,
        amount_received: Some(amount_received),
        currency: Some("usd".into()),
        metadata: HashMap::new(),
    }
}

pub fn settings() -> PaymentSettings {
    PaymentSettings {
        stripe_secret_key: Some(SecretString::from(SECRET_KEY.to_string())),
        gateway_timeout: Duration::from_millis(200),
        ..PaymentSettings::default()
    }
}

pub struct Harness {
    pub orders: Arc<InMemoryOrders>,
    pub cart: Arc<FakeCart>,
    pub gateway: Arc<FakeGateway>,
    pub service: OrderPlacementService,
}

impl Harness {
    pub fn new(orders: InMemoryOrders, cart: FakeCart, gateway: FakeGateway) -> Self {
        Self::with_settings(orders, cart, gateway, settings())
    }

    pub fn with_settings(
        orders: InMemoryOrders,
        cart: FakeCart,
        gateway: FakeGateway,
        settings: PaymentSettings,
    ) -> Self {
        let orders = Arc::new(orders);
        let cart = Arc::new(cart);
        let gateway = Arc::new(gateway);
        let service =
            OrderPlacementService::new(orders.clone(), cart.clone(), gateway.clone(), settings);
        Self {
            orders,
            cart,
            gateway,
            service,
        }
    }
}

pub fn shopper() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
    }
}

pub fn request(method: PaymentMethod, intent_id: Option<&str>) -> PlaceOrderRequest {
    PlaceOrderRequest {
        payment_method: method,
        payment_intent_id: intent_id.map(str::to_string),
        idempotency_key: None,
        name: "Grace Hopper".into(),
        email: Some("a@b.com".into()),
        address: "1 Compiler Way".into(),
        city: "Arlington".into(),
        postal_code: "22201".into(),
        country: "US".into(),
        phone: "+1 555 0100".into(),
    }
}

pub fn cod_request() -> PlaceOrderRequest {
    request(PaymentMethod::Cod, None)
}

pub fn stripe_request(intent_id: &str) -> PlaceOrderRequest {
    request(PaymentMethod::Stripe, Some(intent_id))
}
