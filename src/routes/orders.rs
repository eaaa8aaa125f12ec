use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, PlaceOrderRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(place_order))
        .route("/{id}", get(get_order))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Retries with the same key return the original order")
    ),
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<Order>),
        (status = 200, description = "Idempotent replay of an earlier order", body = ApiResponse<Order>),
        (status = 400, description = "Invalid request or unknown payment intent"),
        (status = 402, description = "Payment has not succeeded"),
        (status = 409, description = "Payment amount does not match, or payment intent already used"),
        (status = 502, description = "Payment gateway unavailable"),
        (status = 504, description = "Payment gateway timed out"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<Order>>)> {
    let Json(payload) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid Idempotency-Key header".into()))
        })
        .transpose()?;

    let placement = state
        .placement
        .place_order(&user, payload, idempotency_key)
        .await?;

    if placement.replayed {
        return Ok((
            StatusCode::OK,
            Json(ApiResponse::success(
                "Order already placed",
                placement.order,
                Some(Meta::empty()),
            )),
        ));
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_placed",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": placement.order.id,
            "payment_method": placement.order.payment_method.as_str(),
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Order placed",
            placement.order,
            Some(Meta::empty()),
        )),
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "Orders of the current user", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<Order>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}
