use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartItemDto, CartList},
        orders::{OrderList, PlaceOrderRequest},
    },
    models::{CartItem, Order, OrderItem, PaymentMethod, PaymentStatus, Product, ShippingDetails},
    response::{ApiResponse, Meta},
    routes::{cart, health, orders, params},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
    ),
    components(
        schemas(
            Product,
            CartItem,
            CartItemDto,
            CartList,
            AddToCartRequest,
            Order,
            OrderItem,
            OrderList,
            PaymentMethod,
            PaymentStatus,
            ShippingDetails,
            PlaceOrderRequest,
            params::Pagination,
            params::OrderListQuery,
            params::SortOrder,
            Meta,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<CartList>,
            ApiResponse<CartItem>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order placement and history"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_order_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/orders"));
        assert!(doc.paths.paths.contains_key("/api/orders/{id}"));
    }
}
