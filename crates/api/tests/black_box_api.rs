use std::net::SocketAddr;

use chrono::{Duration as ChronoDuration, Utc};
use classbook_auth::{JwtClaims, PrincipalId, Role};
use classbook_core::StudentId;
use classbook_infra::services::Services;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";
const ADMIN_KEY: &str = "test-admin-key";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        classbook_observability::tracing::init_for_tests();

        // Same router as prod over in-memory services, bound to an ephemeral port.
        let app = classbook_api::app::router(Services::in_memory(), JWT_SECRET, ADMIN_KEY);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn patch(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .patch(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .put(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn student_login(&self, access_code: &str, phone: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}/auth/student/login", self.base_url))
            .json(&json!({ "access_code": access_code, "phone": phone }))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn guardian_login(&self, name: &str, phone: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}/auth/guardian/login", self.base_url))
            .json(&json!({ "name": name, "phone": phone }))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(roles: Vec<Role>, student_id: Option<StudentId>, expires_in: ChronoDuration) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        roles,
        student_id,
        guardian_id: None,
        issued_at: now,
        expires_at: now + expires_in,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn admin_token() -> String {
    mint_jwt(vec![Role::ADMIN], None, ChronoDuration::minutes(10))
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let expired = mint_jwt(vec![Role::ADMIN], None, ChronoDuration::minutes(-1));
    let (status, body) = srv.post(&expired, "/classes", json!({ "name": "A1" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = srv.get(&admin_token(), "/classes").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty(), "nothing was created");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_login_exchanges_key_for_token() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(format!("{}/auth/admin/login", srv.base_url))
        .json(&json!({ "admin_key": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    for near_miss in [&ADMIN_KEY[..ADMIN_KEY.len() - 1], "test-admin-key-2"] {
        let res = srv
            .client
            .post(format!("{}/auth/admin/login", srv.base_url))
            .json(&json!({ "admin_key": near_miss }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");
    }

    let res = srv
        .client
        .post(format!("{}/auth/admin/login", srv.base_url))
        .json(&json!({ "admin_key": ADMIN_KEY }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let (status, whoami) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert!(whoami["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn student_role_cannot_reach_admin_routes() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::STUDENT], Some(StudentId::new()), ChronoDuration::minutes(10));

    let (status, body) = srv.post(&token, "/classes", json!({ "name": "A1" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = srv.get(&token, "/billing/invoices").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = srv.get(&token, "/audit").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv.get(&admin_token(), "/classes").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    let (status, body) = srv
        .post(&token, "/billing/invoices/generate", json!({ "period": "2025-03" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": "not-a-uuid", "period": "2025-03" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, class) = srv
        .post(&token, "/classes", json!({ "name": "A1", "monthly_tuition": 85000 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let class_id = class["id"].as_str().unwrap();

    let (status, _) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": class_id, "period": "2025-13" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = srv
        .post(
            &token,
            "/billing/payments",
            json!({ "paid_on": "2025-03-08", "amount": 0, "method": "pix" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = srv
        .patch(
            &token,
            "/billing/invoices/0190c6d4-0000-7000-8000-000000000000/approval",
            json!({ "decision": "maybe" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let srv = TestServer::spawn().await;
    let token = admin_token();
    let missing = "0190c6d4-0000-7000-8000-000000000000";

    let (status, _) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": missing, "period": "2025-03" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = srv
        .patch(
            &token,
            &format!("/billing/invoices/{missing}/approval"),
            json!({ "decision": "approved" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = srv
        .post(
            &token,
            "/billing/payments",
            json!({ "invoice_id": missing, "paid_on": "2025-03-08", "amount": 100, "method": "cash" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tuition_billing_lifecycle() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    // Class with a financial plan.
    let (status, class) = srv
        .post(
            &token,
            "/classes",
            json!({ "name": "Turma A1", "enrollment_fee": 10000, "monthly_tuition": 85000 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let class_id = class["id"].as_str().unwrap().to_string();

    // Student enrolled in the class.
    let (status, student) = srv
        .post(
            &token,
            "/students",
            json!({ "name": "Ana", "phone": "(11) 98888-7777", "class_ids": [class_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(student["access_code"], "R001");
    assert_eq!(student["memberships"].as_array().unwrap().len(), 1);
    let student_id = student["id"].as_str().unwrap().to_string();

    // Half scholarship.
    let (status, _) = srv
        .post(
            &token,
            "/billing/discounts",
            json!({ "student_id": student_id, "kind": "scholarship", "percentage": 50 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Generate March invoices.
    let (status, generated) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": class_id, "period": "2025-03" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["count"], 1);
    let invoice = &generated["items"][0];
    assert_eq!(invoice["gross"], 85000);
    assert_eq!(invoice["discount"], 42500);
    assert_eq!(invoice["net"], 42500);
    assert_eq!(invoice["due_date"], "2025-03-10");
    assert_eq!(invoice["payment_status"], "pending");
    assert_eq!(invoice["approval_status"], "pending");
    assert_eq!(
        invoice["legacy_key"].as_str().unwrap(),
        format!("2025-03-{student_id}-{class_id}")
    );
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    // Regeneration keeps identity.
    let (_, again) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": class_id, "period": "2025-03" }),
        )
        .await;
    assert_eq!(again["items"][0]["id"].as_str().unwrap(), invoice_id);

    // Login blocked until the invoice is approved.
    let (status, body) = srv.student_login("r001", "11988887777").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "access_blocked");

    let (status, _) = srv.student_login("R001", "11000000000").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, decided) = srv
        .patch(
            &token,
            &format!("/billing/invoices/{invoice_id}/approval"),
            json!({ "decision": "approved" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["invoice"]["approval_status"], "approved");
    assert_eq!(decided["previous_status"], "pending");

    let (status, login) = srv.student_login("r001", "11 98888 7777").await;
    assert_eq!(status, StatusCode::OK);
    let student_token = login["token"].as_str().unwrap().to_string();

    // Partial payment keeps the invoice pending; the remainder settles it.
    let (status, paid) = srv
        .post(
            &token,
            "/billing/payments",
            json!({ "invoice_id": invoice_id, "paid_on": "2025-03-05", "amount": 20000, "method": "pix" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(paid["invoice"]["payment_status"], "pending");

    let (_, paid) = srv
        .post(
            &token,
            "/billing/payments",
            json!({ "invoice_id": invoice_id, "paid_on": "2025-03-09", "amount": 22500, "method": "CASH", "notes": "balcão" }),
        )
        .await;
    assert_eq!(paid["invoice"]["payment_status"], "paid");

    // The student sees their own invoice with both payments.
    let (status, summary) = srv.get(&student_token, "/portal/student/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["student"]["id"].as_str().unwrap(), student_id);
    assert_eq!(summary["memberships"].as_array().unwrap().len(), 1);
    assert_eq!(summary["invoices"][0]["total_paid"], 42500);
    assert_eq!(summary["invoices"][0]["payments"].as_array().unwrap().len(), 2);

    let (status, _) = srv.get(&token, "/portal/student/summary").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Rejection ends the enrollment and blocks login again.
    let (status, decided) = srv
        .patch(
            &token,
            &format!("/billing/invoices/{invoice_id}/approval"),
            json!({ "decision": "rejected" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["enrollment"]["membership"]["active"], false);

    let (status, _) = srv.student_login("R001", "11988887777").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Listing and audit trail.
    let (status, listed) = srv
        .get(&token, &format!("/billing/invoices?student_id={student_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);

    let (status, audit) = srv.get(&token, "/audit?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    let entries = audit["items"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["action"], "DECIDE_INVOICE");
}

#[tokio::test]
async fn malformed_query_strings_get_json_errors() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    for path in [
        "/audit?limit=lots",
        "/students?include_inactive=maybe",
        "/billing/cashbook/entries?period=2025-03&period=2025-04",
    ] {
        let (status, body) = srv.get(&token, path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(body["error"], "invalid_query", "{path}");
        assert!(body["message"].is_string(), "{path}");
    }

    let (status, body) = srv.get(&token, "/billing/cashbook/summary?kind=gift").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn cash_book_entries_and_summary() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    let (status, _) = srv
        .post(&token, "/classes", json!({ "name": "A1", "enrollment_fee": 15000, "monthly_tuition": 85000 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, income) = srv
        .post(
            &token,
            "/billing/cashbook/entries",
            json!({
                "kind": "income",
                "category": "variable",
                "description": "Venda de apostilas",
                "amount": 30000,
                "occurred_on": "2025-03-04",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(income["amount"], 30000);

    let (status, rent) = srv
        .post(
            &token,
            "/billing/cashbook/entries",
            json!({
                "kind": "expense",
                "category": "fixed",
                "description": "Aluguel",
                "amount": 100000,
                "occurred_on": "2025-03-05",
                "notes": "março",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let rent_id = rent["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(
            &token,
            "/billing/cashbook/entries",
            json!({ "kind": "expense", "category": "fixed", "description": "x", "amount": 0, "occurred_on": "2025-03-05" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, updated) = srv
        .put(
            &token,
            &format!("/billing/cashbook/entries/{rent_id}"),
            json!({
                "kind": "expense",
                "category": "fixed",
                "description": "Aluguel",
                "amount": 90000,
                "occurred_on": "2025-03-05",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["amount"], 90000);
    assert_eq!(updated["notes"], Value::Null);

    let (status, listed) = srv
        .get(&token, "/billing/cashbook/entries?period=2025-03&kind=expense")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);

    let (status, summary) = srv.get(&token, "/billing/cashbook/summary?period=2025-03").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["items"].as_array().unwrap().len(), 2);
    assert_eq!(summary["income"], 30000);
    assert_eq!(summary["expenses"], 90000);
    assert_eq!(summary["enrollment_fees"], 0);
    assert_eq!(summary["balance"], -60000);

    let (status, _) = srv.delete(&token, &format!("/billing/cashbook/entries/{rent_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = srv.delete(&token, &format!("/billing/cashbook/entries/{rent_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (_, audit) = srv.get(&token, "/audit?limit=3").await;
    let actions: Vec<&str> = audit["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["DELETE", "UPDATE", "CREATE"]);

    let student = mint_jwt(vec![Role::STUDENT], Some(StudentId::new()), ChronoDuration::minutes(10));
    let (status, _) = srv.get(&student, "/billing/cashbook/summary").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn guardian_portal_login_and_summary() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    let (_, class) = srv
        .post(&token, "/classes", json!({ "name": "A1", "monthly_tuition": 85000 }))
        .await;
    let class_id = class["id"].as_str().unwrap().to_string();
    let (_, ana) = srv
        .post(&token, "/students", json!({ "name": "Ana", "phone": "11988887777", "class_ids": [class_id] }))
        .await;
    let (_, bia) = srv
        .post(&token, "/students", json!({ "name": "Bia", "phone": "11977776666" }))
        .await;
    let ana_id = ana["id"].as_str().unwrap().to_string();
    let bia_id = bia["id"].as_str().unwrap().to_string();

    let (status, guardian) = srv
        .post(
            &token,
            "/guardians",
            json!({ "name": "Maria Souza", "phone": "(11) 91234-5678", "student_ids": [ana_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let guardian_id = guardian["id"].as_str().unwrap().to_string();

    let (status, linked) = srv
        .post(&token, &format!("/guardians/{guardian_id}/students"), json!({ "student_id": bia_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(linked["student_ids"].as_array().unwrap().len(), 2);

    let (status, _) = srv
        .post(
            &token,
            "/billing/invoices/generate",
            json!({ "class_id": class_id, "period": "2025-03" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv.guardian_login("Maria Souza", "11900000000").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, login) = srv.guardian_login("maria souza", "11 91234 5678").await;
    assert_eq!(status, StatusCode::OK);
    assert!(login["roles"].as_array().unwrap().iter().any(|r| r == "guardian"));
    let guardian_token = login["token"].as_str().unwrap().to_string();

    let (status, summary) = srv.get(&guardian_token, "/portal/guardian/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["guardian"]["id"].as_str().unwrap(), guardian_id);
    assert_eq!(summary["students"].as_array().unwrap().len(), 2);
    assert_eq!(summary["invoices"].as_array().unwrap().len(), 1);

    let (status, _) = srv.get(&guardian_token, "/portal/student/summary").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = srv.get(&guardian_token, "/guardians").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, listed) = srv.get(&token, "/guardians").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn audit_entries_record_request_origin() {
    let srv = TestServer::spawn().await;
    let token = admin_token();

    let res = srv
        .client
        .post(format!("{}/classes", srv.base_url))
        .bearer_auth(&token)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("user-agent", "classbook-tests/1.0")
        .json(&json!({ "name": "A1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let (_, audit) = srv.get(&token, "/audit?limit=1").await;
    assert_eq!(audit["items"][0]["ip"], "203.0.113.7");
    assert_eq!(audit["items"][0]["user_agent"], "classbook-tests/1.0");

    // Without a proxy header the peer address is recorded.
    let (status, _) = srv.post(&token, "/classes", json!({ "name": "B1" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, audit) = srv.get(&token, "/audit?limit=1").await;
    assert_eq!(audit["items"][0]["ip"], "127.0.0.1");
}
