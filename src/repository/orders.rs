use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    db::OrmConn,
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    models::{Order, OrderItem, PaymentMethod, PaymentStatus, ShippingDetails},
};

/// Names of the unique indexes created in `migrations/0002_orders.sql`.
pub const IDEMPOTENCY_KEY_INDEX: &str = "orders_user_idempotency_key_uidx";
pub const TRANSACTION_ID_INDEX: &str = "orders_transaction_id_uidx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    IdempotencyKey,
    TransactionId,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A concurrent insert already claimed this key.
    #[error("duplicate {0:?}")]
    Duplicate(UniqueField),

    #[error(transparent)]
    Db(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Uuid,
    pub idempotency_key: Option<String>,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub total_amount: i64,
    pub currency: String,
    pub shipping: ShippingDetails,
    pub items: Vec<NewOrderItem>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Idempotency keys are scoped to the user that supplied them.
    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Order>, RepoError>;

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepoError>;

    /// Inserts the order and its items atomically. Unique index collisions
    /// come back as [`RepoError::Duplicate`].
    async fn create(&self, order: NewOrder) -> Result<Order, RepoError>;
}

#[derive(Clone)]
pub struct SeaOrmOrderRepository {
    orm: OrmConn,
}

impl SeaOrmOrderRepository {
    pub fn new(orm: OrmConn) -> Self {
        Self { orm }
    }

    async fn hydrate(&self, model: Option<OrderModel>) -> Result<Option<Order>, RepoError> {
        let Some(model) = model else {
            return Ok(None);
        };
        let mut items = load_items(&self.orm, &[model.id]).await?;
        let items = items.remove(&model.id).unwrap_or_default();
        Ok(Some(order_from_entity(model, items)?))
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn find_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        let model = Orders::find()
            .filter(
                Condition::all()
                    .add(OrderCol::UserId.eq(user_id))
                    .add(OrderCol::IdempotencyKey.eq(key)),
            )
            .one(&self.orm)
            .await?;
        self.hydrate(model).await
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepoError> {
        let model = Orders::find()
            .filter(OrderCol::TransactionId.eq(transaction_id))
            .one(&self.orm)
            .await?;
        self.hydrate(model).await
    }

    async fn create(&self, order: NewOrder) -> Result<Order, RepoError> {
        let txn = self.orm.begin().await?;

        let NewOrder {
            order_number,
            user_id,
            idempotency_key,
            payment_method,
            transaction_id,
            payment_status,
            total_amount,
            currency,
            shipping,
            items,
        } = order;

        let saved = OrderActive {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            user_id: Set(user_id),
            idempotency_key: Set(idempotency_key),
            payment_method: Set(payment_method.as_str().to_string()),
            transaction_id: Set(transaction_id),
            payment_status: Set(payment_status.as_str().to_string()),
            status: Set("pending".into()),
            total_amount: Set(total_amount),
            currency: Set(currency),
            shipping_name: Set(shipping.name),
            shipping_email: Set(shipping.email),
            shipping_address: Set(shipping.address),
            shipping_city: Set(shipping.city),
            shipping_postal_code: Set(shipping.postal_code),
            shipping_country: Set(shipping.country),
            shipping_phone: Set(shipping.phone),
            created_at: Set(Utc::now().into()),
        }
        .insert(&txn)
        .await
        .map_err(classify)?;

        let mut saved_items = Vec::with_capacity(items.len());
        for item in items {
            let row = OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(saved.id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_amount: Set(item.unit_amount),
            }
            .insert(&txn)
            .await?;
            saved_items.push(row);
        }

        txn.commit().await.map_err(classify)?;

        Ok(order_from_entity(saved, saved_items)?)
    }
}

/// Maps a unique-index violation on the orders table to the field it guards.
pub fn classify(err: DbErr) -> RepoError {
    let duplicate = match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            if detail.contains(IDEMPOTENCY_KEY_INDEX) {
                Some(UniqueField::IdempotencyKey)
            } else if detail.contains(TRANSACTION_ID_INDEX) {
                Some(UniqueField::TransactionId)
            } else {
                None
            }
        }
        _ => None,
    };
    match duplicate {
        Some(field) => RepoError::Duplicate(field),
        None => RepoError::Db(err),
    }
}

/// Loads items for the given orders, grouped by order id.
pub async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<OrderItemModel>>, DbErr> {
    let mut grouped: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(grouped);
    }
    let rows = OrderItems::find()
        .filter(OrderItemCol::OrderId.is_in(order_ids.iter().copied()))
        .all(conn)
        .await?;
    for row in rows {
        grouped.entry(row.order_id).or_default().push(row);
    }
    Ok(grouped)
}

pub fn order_from_entity(model: OrderModel, items: Vec<OrderItemModel>) -> Result<Order, DbErr> {
    let payment_method = model
        .payment_method
        .parse::<PaymentMethod>()
        .map_err(|e| DbErr::Custom(format!("order {}: payment_method {e}", model.id)))?;
    let payment_status = model
        .payment_status
        .parse::<PaymentStatus>()
        .map_err(|e| DbErr::Custom(format!("order {}: payment_status {e}", model.id)))?;

    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        idempotency_key: model.idempotency_key,
        payment_method,
        transaction_id: model.transaction_id,
        payment_status,
        status: model.status,
        total_amount: model.total_amount,
        currency: model.currency,
        shipping: ShippingDetails {
            name: model.shipping_name,
            email: model.shipping_email,
            address: model.shipping_address,
            city: model.shipping_city,
            postal_code: model.shipping_postal_code,
            country: model.shipping_country,
            phone: model.shipping_phone,
        },
        items: items.into_iter().map(order_item_from_entity).collect(),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_amount: model.unit_amount,
    }
}
