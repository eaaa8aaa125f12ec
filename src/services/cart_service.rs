use async_trait::async_trait;
use chrono::DateTime;
use sea_orm::{
    ColumnTrait, EntityTrait, FromQueryResult, JoinType, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::{DbPool, OrmConn},
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems, Relation as CartRel},
        products::Column as ProdCol,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Minor units.
    pub unit_amount: i64,
}

/// The cart as it stands at the moment of reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub total: i64,
    pub currency: String,
}

impl CartSnapshot {
    pub fn from_lines(lines: Vec<CartLine>, currency: impl Into<String>) -> AppResult<Self> {
        if lines.is_empty() {
            return Err(AppError::BadRequest("Cart is empty".into()));
        }

        let mut total: i64 = 0;
        for line in &lines {
            if line.quantity <= 0 {
                return Err(AppError::BadRequest("Cart has invalid quantity".into()));
            }
            if line.unit_amount < 0 {
                return Err(AppError::BadRequest(format!(
                    "Product {} has an invalid price",
                    line.product_id
                )));
            }
            total = line
                .unit_amount
                .checked_mul(i64::from(line.quantity))
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| AppError::BadRequest("Cart total is out of range".into()))?;
        }

        Ok(Self {
            lines,
            total,
            currency: currency.into(),
        })
    }
}

#[async_trait]
pub trait CartSnapshotReader: Send + Sync {
    /// Reads the user's cart fresh on every call.
    async fn cart_total(&self, user_id: Uuid) -> AppResult<CartSnapshot>;
}

#[derive(Clone)]
pub struct SeaOrmCartReader {
    orm: OrmConn,
    currency: String,
}

impl SeaOrmCartReader {
    pub fn new(orm: OrmConn, currency: impl Into<String>) -> Self {
        Self {
            orm,
            currency: currency.into(),
        }
    }
}

#[async_trait]
impl CartSnapshotReader for SeaOrmCartReader {
    async fn cart_total(&self, user_id: Uuid) -> AppResult<CartSnapshot> {
        #[derive(Debug, FromQueryResult)]
        struct CartProductRow {
            product_id: Uuid,
            quantity: i32,
            price: i64,
        }

        let rows = CartItems::find()
            .select_only()
            .column_as(CartCol::ProductId, "product_id")
            .column_as(CartCol::Quantity, "quantity")
            .join(JoinType::InnerJoin, CartRel::Products.def())
            .column_as(ProdCol::Price, "price")
            .filter(CartCol::UserId.eq(user_id))
            .order_by_asc(CartCol::CreatedAt)
            .into_model::<CartProductRow>()
            .all(&self.orm)
            .await?;

        let lines = rows
            .into_iter()
            .map(|row| CartLine {
                product_id: row.product_id,
                quantity: row.quantity,
                unit_amount: row.price,
            })
            .collect();

        CartSnapshot::from_lines(lines, self.currency.clone())
    }
}

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    created_at: DateTime<chrono::Utc>,
}

pub async fn list_cart(
    pool: &DbPool,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartList>> {
    let (page, limit, offset) = pagination.normalize();
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity,
               p.id AS product_id, p.name, p.description, p.price, p.created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(pool)
        .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            id: row.cart_id,
            product: Product {
                id: row.product_id,
                name: row.name,
                description: row.description,
                price: row.price,
                created_at: row.created_at,
            },
            quantity: row.quantity,
        })
        .collect();

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", CartList { items }, Some(meta)))
}

/// Sets the quantity of a product in the cart, inserting the line if needed.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(pool)
        .await?;
    if product_exist.is_none() {
        return Err(AppError::BadRequest("product not found".to_string()));
    }

    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        INSERT INTO cart_items (user_id, product_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
        RETURNING id, product_id, user_id, quantity, created_at
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
