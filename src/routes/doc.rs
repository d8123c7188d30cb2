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
        auth as auth_dto,
        customers::{CustomerList, UpdateCustomerRequest},
        orders::{
            CancelOrderRequest, CreateOrderRequest, OrderItemRequest, OrderList, OrderWithItems,
            UpdateOrderRequest, UpdateOrderStatusRequest,
        },
        payments::{CreatePaymentRequest, PaymentList, RefundPaymentRequest},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{Customer, Order, OrderItem, Payment, Product, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, customers, health, orders, params, payments, products, ws},
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
        auth::login,
        auth::register,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        customers::list_customers,
        customers::get_own_profile,
        customers::get_customer,
        customers::update_customer,
        customers::deactivate_customer,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order,
        orders::update_order_status,
        orders::cancel_order,
        orders::delete_order,
        payments::create_payment,
        payments::list_payments,
        payments::get_payment,
        payments::refund_payment,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_low_stock,
        admin::adjust_inventory,
        ws::subscribe
    ),
    components(
        schemas(
            User,
            Product,
            Customer,
            Order,
            OrderItem,
            Payment,
            auth_dto::RegisterRequest,
            auth_dto::LoginRequest,
            auth_dto::LoginResponse,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            UpdateCustomerRequest,
            CustomerList,
            CreateOrderRequest,
            OrderItemRequest,
            UpdateOrderRequest,
            UpdateOrderStatusRequest,
            CancelOrderRequest,
            OrderList,
            OrderWithItems,
            CreatePaymentRequest,
            RefundPaymentRequest,
            PaymentList,
            admin::LowStockQuery,
            admin::InventoryAdjustRequest,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::PaymentListQuery,
            params::CustomerListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Customer>,
            ApiResponse<CustomerList>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<Payment>,
            ApiResponse<PaymentList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Customers", description = "Customer profile endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Payment endpoints"),
        (name = "Admin", description = "Admin endpoints"),
        (name = "Notifications", description = "WebSocket push channel"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
