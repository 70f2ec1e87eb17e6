//! etcd v3 JSON gateway over a [`KvBackend`].
//!
//! Serves the KV subset an API-server storage layer speaks:
//!
//! | route | body |
//! |-------|------|
//! | `POST /v3/kv/range` | [`RangeRequest`] |
//! | `POST /v3/kv/put` | [`PutRequest`] |
//! | `POST /v3/kv/deleterange` | [`DeleteRangeRequest`] |
//! | `POST /v3/kv/txn` | [`TxnRequest`] |
//! | `POST /v3/kv/compaction` | [`CompactionRequest`] |
//! | `GET /health` | |
//!
//! Field names follow the protobuf originals; bytes are base64 and int64
//! values are decimal strings.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::backend::{
    Compare, CompareResult, CompareTarget, DeleteResult, KeyValue, KvBackend, PutResult,
    RangeResult, Txn, TxnOp, TxnOpResult,
};
use crate::error::{KvError, KvResult};
use crate::wire;

pub type SharedBackend = Arc<dyn KvBackend>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(with = "wire::int64")]
    pub revision: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(with = "wire::b64")]
    pub key: Vec<u8>,
    #[serde(default, with = "wire::b64_opt", skip_serializing_if = "Option::is_none")]
    pub range_end: Option<Vec<u8>>,
    #[serde(default, with = "wire::int64")]
    pub limit: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeResponse {
    pub header: ResponseHeader,
    #[serde(default)]
    pub kvs: Vec<KeyValue>,
    #[serde(default)]
    pub more: bool,
    #[serde(with = "wire::int64")]
    pub count: i64,
}

impl From<RangeResult> for RangeResponse {
    fn from(result: RangeResult) -> Self {
        Self {
            header: ResponseHeader {
                revision: result.revision,
            },
            kvs: result.kvs,
            more: result.more,
            count: result.count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(with = "wire::b64")]
    pub key: Vec<u8>,
    #[serde(default, with = "wire::b64")]
    pub value: Vec<u8>,
    #[serde(default)]
    pub prev_kv: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub header: ResponseHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_kv: Option<KeyValue>,
}

impl PutResponse {
    fn new(result: PutResult, with_prev: bool) -> Self {
        Self {
            header: ResponseHeader {
                revision: result.revision,
            },
            prev_kv: result.prev_kv.filter(|_| with_prev),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    #[serde(with = "wire::b64")]
    pub key: Vec<u8>,
    #[serde(default, with = "wire::b64_opt", skip_serializing_if = "Option::is_none")]
    pub range_end: Option<Vec<u8>>,
    #[serde(default)]
    pub prev_kv: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    pub header: ResponseHeader,
    #[serde(with = "wire::int64")]
    pub deleted: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prev_kvs: Vec<KeyValue>,
}

impl DeleteRangeResponse {
    fn new(result: DeleteResult, with_prev: bool) -> Self {
        Self {
            header: ResponseHeader {
                revision: result.revision,
            },
            deleted: result.deleted,
            prev_kvs: if with_prev { result.prev_kvs } else { Vec::new() },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareTargetKind {
    #[default]
    Version,
    Create,
    Mod,
    Value,
}

/// A compare as the gateway encodes it: enum defaults are omitted, so an
/// absent `result` is `EQUAL` and an absent `target` is `VERSION`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCompare {
    #[serde(default)]
    pub result: CompareResult,
    #[serde(default)]
    pub target: CompareTargetKind,
    #[serde(with = "wire::b64")]
    pub key: Vec<u8>,
    #[serde(default, with = "wire::int64")]
    pub version: i64,
    #[serde(default, with = "wire::int64")]
    pub create_revision: i64,
    #[serde(default, with = "wire::int64")]
    pub mod_revision: i64,
    #[serde(default, with = "wire::b64_opt", skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl From<WireCompare> for Compare {
    fn from(wire: WireCompare) -> Self {
        let target = match wire.target {
            CompareTargetKind::Version => CompareTarget::Version(wire.version),
            CompareTargetKind::Create => CompareTarget::Create(wire.create_revision),
            CompareTargetKind::Mod => CompareTarget::Mod(wire.mod_revision),
            CompareTargetKind::Value => CompareTarget::Value(wire.value.unwrap_or_default()),
        };
        Compare::new(wire.key, target, wire.result)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOp {
    RequestRange(RangeRequest),
    RequestPut(PutRequest),
    RequestDeleteRange(DeleteRangeRequest),
}

impl RequestOp {
    fn into_op(self) -> TxnOp {
        match self {
            Self::RequestRange(r) => TxnOp::Range {
                key: r.key,
                range_end: r.range_end,
                limit: limit(r.limit),
            },
            Self::RequestPut(p) => TxnOp::Put {
                key: p.key,
                value: p.value,
            },
            Self::RequestDeleteRange(d) => TxnOp::DeleteRange {
                key: d.key,
                range_end: d.range_end,
            },
        }
    }

    fn wants_prev(&self) -> bool {
        match self {
            Self::RequestRange(_) => false,
            Self::RequestPut(p) => p.prev_kv,
            Self::RequestDeleteRange(d) => d.prev_kv,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOp {
    ResponseRange(RangeResponse),
    ResponsePut(PutResponse),
    ResponseDeleteRange(DeleteRangeResponse),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    #[serde(default)]
    pub compare: Vec<WireCompare>,
    #[serde(default)]
    pub success: Vec<RequestOp>,
    #[serde(default)]
    pub failure: Vec<RequestOp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    pub header: ResponseHeader,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub responses: Vec<ResponseOp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRequest {
    #[serde(with = "wire::int64")]
    pub revision: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionResponse {
    pub header: ResponseHeader,
}

fn limit(raw: i64) -> usize {
    usize::try_from(raw).unwrap_or(0)
}

/// Error body in the gateway's shape, carrying a gRPC status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: u32,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: 13,
            message: message.into(),
        }
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Compacted { .. } | KvError::FutureRevision { .. } => Self {
                status: StatusCode::BAD_REQUEST,
                code: 11,
                message: err.to_string(),
            },
            other => {
                warn!(error = %other, "datastore request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "message": self.message,
            "code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Run a datastore call off the async executor.
async fn blocking<R, F>(kv: &SharedBackend, call: F) -> Result<R, ApiError>
where
    R: Send + 'static,
    F: FnOnce(&dyn KvBackend) -> KvResult<R> + Send + 'static,
{
    let kv = Arc::clone(kv);
    tokio::task::spawn_blocking(move || call(kv.as_ref()))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "health": "true" }))
}

async fn range(
    State(kv): State<SharedBackend>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<RangeResponse>, ApiError> {
    let result = blocking(&kv, move |kv| {
        kv.range(&req.key, req.range_end.as_deref(), limit(req.limit))
    })
    .await?;
    Ok(Json(result.into()))
}

async fn put(
    State(kv): State<SharedBackend>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>, ApiError> {
    let with_prev = req.prev_kv;
    let result = blocking(&kv, move |kv| kv.put(&req.key, &req.value)).await?;
    Ok(Json(PutResponse::new(result, with_prev)))
}

async fn delete_range(
    State(kv): State<SharedBackend>,
    Json(req): Json<DeleteRangeRequest>,
) -> Result<Json<DeleteRangeResponse>, ApiError> {
    let with_prev = req.prev_kv;
    let result = blocking(&kv, move |kv| kv.delete_range(&req.key, req.range_end.as_deref())).await?;
    Ok(Json(DeleteRangeResponse::new(result, with_prev)))
}

async fn txn(
    State(kv): State<SharedBackend>,
    Json(req): Json<TxnRequest>,
) -> Result<Json<TxnResponse>, ApiError> {
    let success_prev: Vec<bool> = req.success.iter().map(RequestOp::wants_prev).collect();
    let failure_prev: Vec<bool> = req.failure.iter().map(RequestOp::wants_prev).collect();
    let txn = Txn {
        compare: req.compare.into_iter().map(Compare::from).collect(),
        success: req.success.into_iter().map(RequestOp::into_op).collect(),
        failure: req.failure.into_iter().map(RequestOp::into_op).collect(),
    };

    let result = blocking(&kv, move |kv| kv.txn(txn)).await?;
    let wants_prev = if result.succeeded { success_prev } else { failure_prev };
    let responses = result
        .responses
        .into_iter()
        .zip(wants_prev)
        .map(|(response, with_prev)| match response {
            TxnOpResult::Range(r) => ResponseOp::ResponseRange(r.into()),
            TxnOpResult::Put(p) => ResponseOp::ResponsePut(PutResponse::new(p, with_prev)),
            TxnOpResult::DeleteRange(d) => {
                ResponseOp::ResponseDeleteRange(DeleteRangeResponse::new(d, with_prev))
            }
        })
        .collect();

    Ok(Json(TxnResponse {
        header: ResponseHeader {
            revision: result.revision,
        },
        succeeded: result.succeeded,
        responses,
    }))
}

async fn compaction(
    State(kv): State<SharedBackend>,
    Json(req): Json<CompactionRequest>,
) -> Result<Json<CompactionResponse>, ApiError> {
    let revision = blocking(&kv, move |kv| {
        kv.compact(req.revision)?;
        kv.revision()
    })
    .await?;
    Ok(Json(CompactionResponse {
        header: ResponseHeader { revision },
    }))
}

/// Build the gateway router over `kv`.
pub fn build_router(kv: SharedBackend) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v3/kv/range", post(range))
        .route("/v3/kv/put", post(put))
        .route("/v3/kv/deleterange", post(delete_range))
        .route("/v3/kv/txn", post(txn))
        .route("/v3/kv/compaction", post(compaction))
        .layer(TraceLayer::new_for_http())
        .with_state(kv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LogKv;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde::de::DeserializeOwned;
    use tower::util::ServiceExt;

    fn app() -> (Router, SharedBackend) {
        let kv: SharedBackend = Arc::new(LogKv::in_memory());
        (build_router(Arc::clone(&kv)), kv)
    }

    async fn call<T: DeserializeOwned>(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, T) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn put_then_range() {
        let (app, _) = app();
        // "/t/a" = L3QvYQ==, "one" = b25l
        let (status, put): (_, PutResponse) =
            call(&app, "/v3/kv/put", json!({ "key": "L3QvYQ==", "value": "b25l" })).await;
        assert_eq!(status, 200);
        assert_eq!(put.header.revision, 1);

        let (_, raw): (_, serde_json::Value) = call(&app, "/v3/kv/range", json!({ "key": "L3QvYQ==" })).await;
        assert_eq!(raw["count"], "1");
        assert_eq!(raw["kvs"][0]["value"], "b25l");
        assert_eq!(raw["kvs"][0]["mod_revision"], "1");
    }

    #[tokio::test]
    async fn prev_kv_only_when_asked() {
        let (app, kv) = app();
        kv.put(b"/t/a", b"old").unwrap();

        let (_, plain): (_, PutResponse) =
            call(&app, "/v3/kv/put", json!({ "key": "L3QvYQ==", "value": "b25l" })).await;
        assert!(plain.prev_kv.is_none());

        let (_, deleted): (_, DeleteRangeResponse) =
            call(&app, "/v3/kv/deleterange", json!({ "key": "L3QvYQ==", "prev_kv": true })).await;
        assert_eq!(deleted.deleted, 1);
        assert_eq!(deleted.prev_kvs[0].value, b"one");
    }

    #[tokio::test]
    async fn txn_create_if_absent() {
        let (app, kv) = app();
        let body = json!({
            "compare": [{ "target": "CREATE", "key": "L3QvYQ==", "create_revision": "0" }],
            "success": [{ "request_put": { "key": "L3QvYQ==", "value": "b25l" } }],
            "failure": [{ "request_range": { "key": "L3QvYQ==" } }],
        });

        let (_, first): (_, TxnResponse) = call(&app, "/v3/kv/txn", body.clone()).await;
        assert!(first.succeeded);
        let (_, second): (_, TxnResponse) = call(&app, "/v3/kv/txn", body).await;
        assert!(!second.succeeded);
        match &second.responses[0] {
            ResponseOp::ResponseRange(r) => assert_eq!(r.count, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(kv.revision().unwrap(), 1);
    }

    #[tokio::test]
    async fn compaction_errors_map_to_bad_request() {
        let (app, kv) = app();
        kv.put(b"/t/a", b"1").unwrap();
        kv.put(b"/t/a", b"2").unwrap();

        let (ok, _): (_, CompactionResponse) = call(&app, "/v3/kv/compaction", json!({ "revision": 1 })).await;
        assert_eq!(ok, 200);
        let (again, err): (_, serde_json::Value) = call(&app, "/v3/kv/compaction", json!({ "revision": 1 })).await;
        assert_eq!(again, StatusCode::BAD_REQUEST);
        assert_eq!(err["code"], 11);
    }

    #[test]
    fn omitted_compare_fields_take_proto_defaults() {
        let wire: WireCompare = serde_json::from_str(r#"{"key":"YQ=="}"#).unwrap();
        let compare = Compare::from(wire);
        assert_eq!(compare.target, CompareTarget::Version(0));
        assert_eq!(compare.result, CompareResult::Equal);
    }
}
