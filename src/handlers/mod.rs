pub mod bom;
pub mod common;
pub mod health;
pub mod production_orders;
pub mod products;
pub mod purchase_orders;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

#[cfg(test)]
mod tests {
    use crate::{
        app_router, config::AppConfig, errors::ErrorResponse, repositories::MemoryStore, AppState,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState::new(Arc::new(MemoryStore::new()), AppConfig::default(), None);
        app_router(state)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_product(app: &Router, sku: &str, kind: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/products",
            Some(json!({ "sku": sku, "name": sku, "unit": "kg", "kind": kind })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_store_up() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "up");
        assert_eq!(body["store"]["status"], "up");
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let uri = format!("/api/v1/products/{}", uuid::Uuid::new_v4());
        let (status, body) = call(&app(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(error.kind.to_string(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn adjustment_updates_stock_view() {
        let app = app();
        let flour = create_product(&app, "FLOUR-1", "RAW_MATERIAL").await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/v1/products/{}/adjustments", flour),
            Some(json!({ "qty": "10", "notes": "opening balance" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            call(&app, Method::GET, &format!("/api/v1/products/{}/stock", flour), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["qty_on_hand"], "10");
        assert_eq!(body["data"]["balanced"], true);

        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/products/{}/movements", flour),
            None,
        )
        .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["movement_type"], "ADJUSTMENT");
    }

    #[tokio::test]
    async fn start_without_stock_is_unprocessable() {
        let app = app();
        let flour = create_product(&app, "FLOUR-1", "RAW_MATERIAL").await;
        let bread = create_product(&app, "BREAD-1", "FINISHED_GOOD").await;

        let (status, bom) = call(
            &app,
            Method::POST,
            "/api/v1/boms",
            Some(json!({
                "final_product_id": bread,
                "name": "Bread",
                "components": [{ "product_id": flour, "quantity_per_unit": "0.5", "unit": "kg" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let bom_id = bom["data"]["bom"]["id"].as_str().unwrap().to_string();

        let (status, order) = call(
            &app,
            Method::POST,
            "/api/v1/production-orders",
            Some(json!({ "product_id": bread, "bom_id": bom_id, "qty_ordered": "4" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["data"]["status"], "PLANNED");
        let order_id = order["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/v1/production-orders/{}", order_id),
            Some(json!({ "status": "IN_PROGRESS" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "INSUFFICIENT_STOCK");

        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/production-orders/{}", order_id),
            None,
        )
        .await;
        assert_eq!(body["data"]["status"], "PLANNED");
    }

    #[tokio::test]
    async fn received_purchase_order_delete_requires_reversal_flag() {
        let app = app();
        let flour = create_product(&app, "FLOUR-1", "RAW_MATERIAL").await;

        let (status, po) = call(
            &app,
            Method::POST,
            "/api/v1/purchase-orders",
            Some(json!({
                "po_number": "PO-100",
                "status": "RECEIVED",
                "items": [{ "product_id": flour, "qty_ordered": "50", "qty_received": "50", "unit_cost": "1.20" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(po["data"]["status"], "RECEIVED");
        let uri = format!("/api/v1/purchase-orders/{}", po["data"]["id"].as_str().unwrap());

        let (status, body) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "INVALID_STATE");

        let (status, body) =
            call(&app, Method::DELETE, &format!("{}?reverse_receipts=true", uri), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, body) =
            call(&app, Method::GET, &format!("/api/v1/products/{}/stock", flour), None).await;
        assert_eq!(body["data"]["qty_on_hand"], "0");
    }

    #[tokio::test]
    async fn receiving_through_update_credits_stock() {
        let app = app();
        let flour = create_product(&app, "FLOUR-1", "RAW_MATERIAL").await;

        let (status, po) = call(
            &app,
            Method::POST,
            "/api/v1/purchase-orders",
            Some(json!({
                "po_number": "PO-200",
                "items": [{ "product_id": flour, "qty_ordered": "50", "unit_cost": "1.20" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(po["data"]["status"], "DRAFT");
        let uri = format!("/api/v1/purchase-orders/{}", po["data"]["id"].as_str().unwrap());

        let (status, body) = call(
            &app,
            Method::PUT,
            &uri,
            Some(json!({
                "status": "RECEIVED",
                "items": [{ "product_id": flour, "qty_ordered": "50", "qty_received": "50", "unit_cost": "1.20" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "RECEIVED");
        assert_eq!(body["data"]["items"][0]["qty_posted"], "50");

        let (_, body) =
            call(&app, Method::GET, &format!("/api/v1/products/{}/stock", flour), None).await;
        assert_eq!(body["data"]["qty_on_hand"], "50");
        assert_eq!(body["data"]["balanced"], true);
    }

    #[tokio::test]
    async fn failed_completion_leaves_finished_good_uncredited() {
        let app = app();
        let flour = create_product(&app, "FLOUR-1", "RAW_MATERIAL").await;
        let bread = create_product(&app, "BREAD-1", "FINISHED_GOOD").await;

        let (_, bom) = call(
            &app,
            Method::POST,
            "/api/v1/boms",
            Some(json!({
                "final_product_id": bread,
                "name": "Bread",
                "components": [{ "product_id": flour, "quantity_per_unit": "0.5", "unit": "kg" }]
            })),
        )
        .await;
        let bom_id = bom["data"]["bom"]["id"].as_str().unwrap().to_string();

        let (_, order) = call(
            &app,
            Method::POST,
            "/api/v1/production-orders",
            Some(json!({ "product_id": bread, "bom_id": bom_id, "qty_ordered": "4" })),
        )
        .await;
        let uri = format!("/api/v1/production-orders/{}", order["data"]["id"].as_str().unwrap());

        let (status, body) = call(&app, Method::PUT, &uri, Some(json!({ "status": "DONE" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "INSUFFICIENT_STOCK");

        let (_, body) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(body["data"]["status"], "PLANNED");

        let (_, body) =
            call(&app, Method::GET, &format!("/api/v1/products/{}/stock", bread), None).await;
        assert_eq!(body["data"]["qty_on_hand"], "0");
        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/products/{}/movements", bread),
            None,
        )
        .await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }
}
