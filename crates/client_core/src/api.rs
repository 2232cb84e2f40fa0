//! REST bindings. Each call only shapes a [`RequestConfig`]; everything else
//! (headers, de-duplication, envelope handling) belongs to the transport.

use std::sync::Arc;

use serde_json::{Map, Value};
use shared::protocol::{ApiResponse, LoginRequest, StoreLookupRequest};

use crate::transport::{Delivery, RequestConfig, RequestTransport, TransportError};

pub const LOGIN_MEMBER_PATH: &str = "/v1/mem/memmember/login";
pub const LOGIN_SELLER_PATH: &str = "/v1/sel/memmember/login";
pub const FIND_STORE_PATH: &str = "/v1/sel/stostore/getStore";
pub const SAVE_CLASSROOM_PATH: &str = "/v1/sel/stoseller/saveClassroomId";
pub const DELETE_CLASSROOM_PATH: &str = "/v1/sel/stoseller/deleteClassroomId";
pub const UPDATE_CLASSROOM_PATH: &str = "/v1/sel/stoseller/updateClassroomId";

pub type ApiResult = Result<Delivery<ApiResponse>, TransportError>;

pub fn login_member_request(request: &LoginRequest) -> Result<RequestConfig, serde_json::Error> {
    RequestConfig::post(LOGIN_MEMBER_PATH, request)
}

pub fn login_seller_request(request: &LoginRequest) -> Result<RequestConfig, serde_json::Error> {
    RequestConfig::post(LOGIN_SELLER_PATH, request)
}

pub fn find_store_request(
    request: &StoreLookupRequest,
) -> Result<RequestConfig, serde_json::Error> {
    RequestConfig::post(FIND_STORE_PATH, request)
}

pub fn classroom_request(
    path: &str,
    body: &Map<String, Value>,
) -> Result<RequestConfig, serde_json::Error> {
    RequestConfig::post(path, body)
}

#[derive(Clone)]
pub struct Api {
    transport: Arc<RequestTransport>,
}

impl Api {
    pub fn new(transport: Arc<RequestTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<RequestTransport> {
        &self.transport
    }

    pub async fn login_member(&self, request: &LoginRequest) -> ApiResult {
        self.transport.send(login_member_request(request)?).await
    }

    pub async fn login_seller(&self, request: &LoginRequest) -> ApiResult {
        self.transport.send(login_seller_request(request)?).await
    }

    pub async fn find_store(&self, request: &StoreLookupRequest) -> ApiResult {
        self.transport.send(find_store_request(request)?).await
    }

    pub async fn save_classroom(&self, body: &Map<String, Value>) -> ApiResult {
        self.transport
            .send(classroom_request(SAVE_CLASSROOM_PATH, body)?)
            .await
    }

    pub async fn delete_classroom(&self, body: &Map<String, Value>) -> ApiResult {
        self.transport
            .send(classroom_request(DELETE_CLASSROOM_PATH, body)?)
            .await
    }

    pub async fn update_classroom(&self, body: &Map<String, Value>) -> ApiResult {
        self.transport
            .send(classroom_request(UPDATE_CLASSROOM_PATH, body)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;
    use shared::domain::EntityId;

    use super::*;

    #[test]
    fn login_bindings_post_account_and_password() {
        let request = LoginRequest::new("a@b.com", "x");

        let member = login_member_request(&request).expect("member");
        let seller = login_seller_request(&request).expect("seller");

        assert_eq!(member.url, "/v1/mem/memmember/login");
        assert_eq!(seller.url, "/v1/sel/memmember/login");
        assert_eq!(member.method, Method::POST);
        assert_eq!(member.data, json!({"account": "a@b.com", "password": "x"}));
        assert_eq!(member.data, seller.data);
    }

    #[test]
    fn store_lookup_wraps_id_in_param() {
        let config = find_store_request(&StoreLookupRequest {
            param: EntityId::Number(12),
        })
        .expect("store lookup");

        assert_eq!(config.url, FIND_STORE_PATH);
        assert_eq!(config.data, json!({"param": 12}));
    }

    #[test]
    fn classroom_bindings_pass_body_through() {
        let body = json!({"sellerId": 3, "classroomId": "room-9"})
            .as_object()
            .cloned()
            .expect("object");

        for path in [
            SAVE_CLASSROOM_PATH,
            DELETE_CLASSROOM_PATH,
            UPDATE_CLASSROOM_PATH,
        ] {
            let config = classroom_request(path, &body).expect("classroom");
            assert_eq!(config.url, path);
            assert_eq!(config.method, Method::POST);
            assert_eq!(config.data, Value::Object(body.clone()));
        }
    }
}
