use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::PaymentSettings,
    dto::orders::{OrderList, PaymentChoice, PlaceOrderRequest},
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult, PaymentVerificationError},
    middleware::auth::AuthUser,
    models::{Order, PaymentStatus},
    repository::orders::{
        NewOrder, NewOrderItem, OrderRepository, RepoError, UniqueField, load_items,
        order_from_entity,
    },
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::{CartSnapshot, CartSnapshotReader},
        payment_gateway::{GatewayError, IntentStatus, PaymentGateway},
    },
    state::AppState,
};

/// Metadata key the storefront writes when it creates a payment intent.
pub const INTENT_USER_METADATA_KEY: &str = "user_id";

/// Outcome of a placement call.
#[derive(Debug, Clone)]
pub struct Placement {
    pub order: Order,
    /// `true` when an earlier order with the same idempotency key was returned.
    pub replayed: bool,
}

/// Turns a user's cart into an order, verifying gateway payments first.
///
/// Holds no mutable state; concurrent calls are serialized only by the
/// unique indexes behind [`OrderRepository::create`].
pub struct OrderPlacementService {
    orders: Arc<dyn OrderRepository>,
    cart: Arc<dyn CartSnapshotReader>,
    gateway: Arc<dyn PaymentGateway>,
    settings: PaymentSettings,
}

impl OrderPlacementService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        cart: Arc<dyn CartSnapshotReader>,
        gateway: Arc<dyn PaymentGateway>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            orders,
            cart,
            gateway,
            settings,
        }
    }

    #[instrument(
        skip_all,
        fields(user_id = %user.user_id, payment_method = request.payment_method.as_str())
    )]
    pub async fn place_order(
        &self,
        user: &AuthUser,
        request: PlaceOrderRequest,
        idempotency_key: Option<&str>,
    ) -> AppResult<Placement> {
        let command = request.into_command(idempotency_key)?;

        if let Some(key) = command.idempotency_key.as_deref()
            && let Some(order) = self.orders.find_by_idempotency_key(user.user_id, key).await?
        {
            info!(order_number = %order.order_number, "idempotent replay");
            return Ok(Placement {
                order,
                replayed: true,
            });
        }

        let cart = self.cart.cart_total(user.user_id).await?;

        let (transaction_id, payment_status) = match &command.payment {
            PaymentChoice::CashOnDelivery => (None, PaymentStatus::Pending),
            PaymentChoice::Gateway { intent_id } => {
                let verified = self.verify_payment(user, intent_id, &cart).await;
                if let Err(AppError::Payment(PaymentVerificationError::TransactionReused)) =
                    &verified
                    && let Some(winner) = self
                        .concurrent_winner(user, command.idempotency_key.as_deref())
                        .await?
                {
                    return Ok(winner);
                }
                verified?;
                (Some(intent_id.clone()), PaymentStatus::Paid)
            }
        };

        let new_order = NewOrder {
            order_number: build_order_number(),
            user_id: user.user_id,
            idempotency_key: command.idempotency_key.clone(),
            payment_method: command.payment.method(),
            transaction_id,
            payment_status,
            total_amount: cart.total,
            currency: cart.currency.clone(),
            shipping: command.shipping,
            items: cart
                .lines
                .iter()
                .map(|line| NewOrderItem {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_amount: line.unit_amount,
                })
                .collect(),
        };

        match self.orders.create(new_order).await {
            Ok(order) => {
                info!(
                    order_number = %order.order_number,
                    total_amount = order.total_amount,
                    "order placed"
                );
                Ok(Placement {
                    order,
                    replayed: false,
                })
            }
            Err(RepoError::Duplicate(UniqueField::IdempotencyKey)) => self
                .concurrent_winner(user, command.idempotency_key.as_deref())
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(
                        "Order with this idempotency key is still being created".into(),
                    )
                }),
            Err(RepoError::Duplicate(UniqueField::TransactionId)) => {
                if let Some(winner) = self
                    .concurrent_winner(user, command.idempotency_key.as_deref())
                    .await?
                {
                    return Ok(winner);
                }
                warn!("payment intent consumed by a concurrent order");
                Err(PaymentVerificationError::TransactionReused.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The order a concurrent request carrying the same key has already committed.
    async fn concurrent_winner(
        &self,
        user: &AuthUser,
        idempotency_key: Option<&str>,
    ) -> AppResult<Option<Placement>> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        let winner = self.orders.find_by_idempotency_key(user.user_id, key).await?;
        if let Some(order) = &winner {
            info!(order_number = %order.order_number, "concurrent placement replayed");
        }
        Ok(winner.map(|order| Placement {
            order,
            replayed: true,
        }))
    }

    /// Fails closed: any error or ambiguity from the gateway rejects the order.
    async fn verify_payment(
        &self,
        user: &AuthUser,
        intent_id: &str,
        cart: &CartSnapshot,
    ) -> AppResult<()> {
        let secret_key = self.settings.stripe_secret_key.as_ref().ok_or_else(|| {
            AppError::Configuration("STRIPE_SECRET_KEY is not configured".into())
        })?;

        let lookup = self.gateway.retrieve_payment_intent(secret_key, intent_id);
        let intent = match tokio::time::timeout(self.settings.gateway_timeout, lookup).await {
            Err(_) => {
                warn!(intent_id, "payment gateway timed out");
                return Err(PaymentVerificationError::GatewayTimeout.into());
            }
            Ok(Err(err)) => {
                warn!(intent_id, error = %err, "payment intent lookup failed");
                return Err(verification_error(err).into());
            }
            Ok(Ok(intent)) => intent,
        };

        if intent.id != intent_id {
            warn!(intent_id, returned = %intent.id, "gateway returned a different intent");
            return Err(PaymentVerificationError::IntentNotFound.into());
        }

        if intent.status != IntentStatus::Succeeded {
            warn!(intent_id, status = intent.status.as_str(), "payment not succeeded");
            return Err(
                PaymentVerificationError::IntentNotSuccessful(intent.status.as_str().into()).into(),
            );
        }

        let currency_matches = intent
            .currency
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(&cart.currency));
        if !currency_matches || intent.amount_received != Some(cart.total) {
            warn!(
                intent_id,
                expected = cart.total,
                captured = ?intent.amount_received,
                currency = ?intent.currency,
                "payment amount mismatch"
            );
            return Err(PaymentVerificationError::AmountMismatch {
                expected: cart.total,
                captured: intent.amount_received,
            }
            .into());
        }

        if let Some(existing) = self.orders.find_by_transaction_id(intent_id).await? {
            warn!(intent_id, order_number = %existing.order_number, "payment intent replay");
            return Err(PaymentVerificationError::TransactionReused.into());
        }

        if let Some(owner) = intent.metadata.get(INTENT_USER_METADATA_KEY)
            && owner.as_str() != user.user_id.to_string()
        {
            warn!(intent_id, "payment intent owned by another user");
            return Err(PaymentVerificationError::IntentOwnerMismatch.into());
        }

        Ok(())
    }
}

fn verification_error(err: GatewayError) -> PaymentVerificationError {
    match err {
        GatewayError::NotFound => PaymentVerificationError::IntentNotFound,
        GatewayError::Timeout => PaymentVerificationError::GatewayTimeout,
        GatewayError::Unavailable(detail) | GatewayError::Malformed(detail) => {
            PaymentVerificationError::GatewayUnavailable(detail)
        }
    }
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
    let mut items = load_items(&state.orm, &ids).await?;
    let orders = models
        .into_iter()
        .map(|model| {
            let lines = items.remove(&model.id).unwrap_or_default();
            order_from_entity(model, lines)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut items = load_items(&state.orm, &[order.id]).await?;
    let lines = items.remove(&order.id).unwrap_or_default();

    Ok(ApiResponse::success(
        "OK",
        order_from_entity(order, lines)?,
        Some(Meta::empty()),
    ))
}

/// 64 random bits per day keep `order_number` collisions out of reach.
fn build_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", date, &suffix[..16])
}
