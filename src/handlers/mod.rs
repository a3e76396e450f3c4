mod error;

pub use error::{HandlerError, Op};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tonic::{Request, Response, Status};
use tracing::Instrument;
use uuid::Uuid;

use crate::messaging::{Event, EventPublisher};
use crate::metrics::Metrics;
use crate::pb::record::v1::record_service_server::RecordService;
use crate::pb::record::v1::{
    CreateRecordRequest, CreateRecordResponse, DeleteRecordRequest, GetRecordRequest,
    GetRecordResponse, UpdateRecordRequest,
};
use crate::repository::{NewRecord, RecordRepository, RecordUpdate};

// ============================================================================
// Record Command Handlers
// ============================================================================
//
// One method per operation, all following the same shape:
//
//   validate (mutations only) → repository call → response → notify
//
// A validation failure produces no side effect at all. The notification is
// emitted only on the success path, exactly once, and its outcome never
// changes the response: by the time the event is handed off, the RPC result
// is already decided.
//
// ============================================================================

/// Source of event timestamps. Injectable so tests can pin time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct RecordHandler {
    repository: Arc<dyn RecordRepository>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    metrics: Arc<Metrics>,
    clock: Clock,
}

impl RecordHandler {
    pub fn new(
        repository: Arc<dyn RecordRepository>,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            publisher,
            topic: topic.into(),
            metrics,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock; events then carry deterministic timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn fail(&self, op: Op, error: HandlerError) -> Status {
        tracing::error!(operation = op.as_str(), %error, "request failed");
        self.metrics.record_rpc(op.as_str(), error.kind());
        error.into()
    }

    fn ok(&self, op: Op) {
        self.metrics.record_rpc(op.as_str(), "ok");
    }

    /// Hand one notification to the publisher. Best effort: a refusal is
    /// logged and counted, and the response already decided for this RPC is
    /// returned regardless.
    async fn emit_event(&self, op: Op, request_body: String) {
        let event = Event {
            timestamp: (self.clock)(),
            event_type: op.method_path().to_string(),
            request_body,
        };
        if let Err(error) = self.publisher.send_event(&self.topic, event).await {
            tracing::error!(
                %error,
                operation = op.as_str(),
                "failed to hand event to the stream"
            );
            self.metrics.record_publish(op.method_path(), false);
        }
    }
}

fn validate_record(name: &str, rating: i64) -> Result<(), HandlerError> {
    if name.is_empty() || rating < 1 {
        return Err(HandlerError::InvalidRecordData);
    }
    Ok(())
}

#[tonic::async_trait]
impl RecordService for RecordHandler {
    async fn create_record(
        &self,
        request: Request<CreateRecordRequest>,
    ) -> Result<Response<CreateRecordResponse>, Status> {
        let req = request.into_inner();
        let span = tracing::info_span!("create_record", correlation_id = %Uuid::new_v4());

        async move {
            validate_record(&req.name, req.rating).map_err(|e| self.fail(Op::Create, e))?;

            let id = self
                .repository
                .create(NewRecord {
                    name: req.name.clone(),
                    rating: req.rating,
                })
                .await
                .map_err(|e| self.fail(Op::Create, HandlerError::storage(Op::Create, e)))?;

            tracing::info!(id, "record created");
            let body = serde_json::json!({ "name": req.name.as_str(), "rating": req.rating });
            self.emit_event(Op::Create, body.to_string()).await;
            self.ok(Op::Create);

            Ok(Response::new(CreateRecordResponse {
                id,
                name: req.name,
                rating: req.rating,
            }))
        }
        .instrument(span)
        .await
    }

    async fn get_record(
        &self,
        request: Request<GetRecordRequest>,
    ) -> Result<Response<GetRecordResponse>, Status> {
        let req = request.into_inner();
        let span =
            tracing::info_span!("get_record", id = req.id, correlation_id = %Uuid::new_v4());

        async move {
            let record = self
                .repository
                .get_by_id(req.id)
                .await
                .map_err(|e| self.fail(Op::Get, HandlerError::from_repository(Op::Get, req.id, e)))?;

            self.emit_event(Op::Get, String::new()).await;
            self.ok(Op::Get);

            Ok(Response::new(GetRecordResponse {
                id: record.id,
                name: record.name,
                rating: record.rating,
            }))
        }
        .instrument(span)
        .await
    }

    async fn update_record(
        &self,
        request: Request<UpdateRecordRequest>,
    ) -> Result<Response<prost_types::Empty>, Status> {
        let req = request.into_inner();
        let span =
            tracing::info_span!("update_record", id = req.id, correlation_id = %Uuid::new_v4());

        async move {
            validate_record(&req.name, req.rating).map_err(|e| self.fail(Op::Update, e))?;

            self.repository
                .update(RecordUpdate {
                    id: req.id,
                    name: req.name.clone(),
                    rating: req.rating,
                })
                .await
                .map_err(|e| {
                    self.fail(Op::Update, HandlerError::from_repository(Op::Update, req.id, e))
                })?;

            tracing::info!(id = req.id, "record updated");
            let body = serde_json::json!({
                "id": req.id,
                "name": req.name.as_str(),
                "rating": req.rating,
            });
            self.emit_event(Op::Update, body.to_string()).await;
            self.ok(Op::Update);

            Ok(Response::new(prost_types::Empty::default()))
        }
        .instrument(span)
        .await
    }

    async fn delete_record(
        &self,
        request: Request<DeleteRecordRequest>,
    ) -> Result<Response<prost_types::Empty>, Status> {
        let req = request.into_inner();
        let span =
            tracing::info_span!("delete_record", id = req.id, correlation_id = %Uuid::new_v4());

        async move {
            self.repository.delete(req.id).await.map_err(|e| {
                self.fail(Op::Delete, HandlerError::from_repository(Op::Delete, req.id, e))
            })?;

            tracing::info!(id = req.id, "record deleted");
            self.emit_event(Op::Delete, String::new()).await;
            self.ok(Op::Delete);

            Ok(Response::new(prost_types::Empty::default()))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::PublishError;
    use crate::repository::{Record, RepositoryError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use tonic::Code;

    struct InMemoryRepository {
        records: Mutex<HashMap<i64, Record>>,
        next_id: AtomicI64,
        calls: AtomicUsize,
    }

    impl InMemoryRepository {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                calls: AtomicUsize::new(0),
            })
        }

        async fn len(&self) -> usize {
            self.records.lock().await.len()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordRepository for InMemoryRepository {
        async fn create(&self, record: NewRecord) -> Result<i64, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.records.lock().await.insert(
                id,
                Record {
                    id,
                    name: record.name,
                    rating: record.rating,
                    created_at: Utc::now(),
                },
            );
            Ok(id)
        }

        async fn get_by_id(&self, id: i64) -> Result<Record, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn update(&self, record: RecordUpdate) -> Result<(), RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().await;
            match records.get_mut(&record.id) {
                Some(existing) => {
                    existing.name = record.name;
                    existing.rating = record.rating;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound),
            }
        }

        async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.records.lock().await.remove(&id) {
                Some(_) => Ok(()),
                None => Err(RepositoryError::NotFound),
            }
        }
    }

    struct RecordingPublisher {
        events: Mutex<Vec<(String, Event)>>,
        fail: bool,
    }

    impl RecordingPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        async fn events(&self) -> Vec<(String, Event)> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn send_event(&self, topic: &str, event: Event) -> Result<(), PublishError> {
            self.events.lock().await.push((topic.to_string(), event));
            if self.fail {
                return Err(PublishError::Transport("broker unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap()
    }

    fn handler(
        repository: Arc<InMemoryRepository>,
        publisher: Arc<RecordingPublisher>,
    ) -> RecordHandler {
        RecordHandler::new(
            repository,
            publisher,
            "record-events",
            Arc::new(Metrics::new().unwrap()),
        )
        .with_clock(Arc::new(fixed_time))
    }

    fn create_request(name: &str, rating: i64) -> Request<CreateRecordRequest> {
        Request::new(CreateRecordRequest {
            name: name.to_string(),
            rating,
        })
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids_and_echoes_fields() {
        let repo = InMemoryRepository::new();
        let handler = handler(repo.clone(), RecordingPublisher::new());

        let first = handler
            .create_record(create_request("name", 10))
            .await
            .unwrap()
            .into_inner();
        let second = handler
            .create_record(create_request("other", 3))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(first.id, 1);
        assert_eq!(first.name, "name");
        assert_eq!(first.rating, 10);
        assert_ne!(first.id, second.id);

        let fetched = handler
            .get_record(Request::new(GetRecordRequest { id: first.id }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched.id, first.id);
        assert_eq!(fetched.name, "name");
        assert_eq!(fetched.rating, 10);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_data_with_no_side_effects() {
        let repo = InMemoryRepository::new();
        let publisher = RecordingPublisher::new();
        let handler = handler(repo.clone(), publisher.clone());

        for (name, rating) in [("", 10), ("name", 0), ("name", -5)] {
            let status = handler
                .create_record(create_request(name, rating))
                .await
                .unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument);
        }

        assert_eq!(repo.calls(), 0);
        assert!(publisher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_data_with_no_side_effects() {
        let repo = InMemoryRepository::new();
        let publisher = RecordingPublisher::new();
        let handler = handler(repo.clone(), publisher.clone());

        let status = handler
            .update_record(Request::new(UpdateRecordRequest {
                id: 1,
                name: String::new(),
                rating: 10,
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(repo.calls(), 0);
        assert!(publisher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_record_is_not_found() {
        let handler = handler(InMemoryRepository::new(), RecordingPublisher::new());

        let status = handler
            .get_record(Request::new(GetRecordRequest { id: 7 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found_and_creates_nothing() {
        let repo = InMemoryRepository::new();
        let handler = handler(repo.clone(), RecordingPublisher::new());

        let status = handler
            .update_record(Request::new(UpdateRecordRequest {
                id: 1,
                name: "name".to_string(),
                rating: 10,
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(repo.len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_is_not_idempotent() {
        let repo = InMemoryRepository::new();
        let handler = handler(repo.clone(), RecordingPublisher::new());

        let created = handler
            .create_record(create_request("name", 10))
            .await
            .unwrap()
            .into_inner();

        handler
            .delete_record(Request::new(DeleteRecordRequest { id: created.id }))
            .await
            .unwrap();

        let status = handler
            .delete_record(Request::new(DeleteRecordRequest { id: created.id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let status = handler
            .get_record(Request::new(GetRecordRequest { id: created.id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_every_successful_operation_emits_exactly_one_event() {
        let repo = InMemoryRepository::new();
        let publisher = RecordingPublisher::new();
        let handler = handler(repo.clone(), publisher.clone());

        let created = handler
            .create_record(create_request("name", 10))
            .await
            .unwrap()
            .into_inner();
        handler
            .get_record(Request::new(GetRecordRequest { id: created.id }))
            .await
            .unwrap();
        handler
            .update_record(Request::new(UpdateRecordRequest {
                id: created.id,
                name: "renamed".to_string(),
                rating: 2,
            }))
            .await
            .unwrap();
        handler
            .delete_record(Request::new(DeleteRecordRequest { id: created.id }))
            .await
            .unwrap();

        let events = publisher.events().await;
        assert_eq!(events.len(), 4);
        for (topic, event) in &events {
            assert_eq!(topic, "record-events");
            assert_eq!(event.timestamp, fixed_time());
        }

        assert_eq!(events[0].1.event_type, "/record.v1.RecordService/CreateRecord");
        assert_eq!(
            events[0].1.request_body,
            serde_json::json!({ "name": "name", "rating": 10 }).to_string()
        );

        assert_eq!(events[1].1.event_type, "/record.v1.RecordService/GetRecord");
        assert_eq!(events[1].1.request_body, "");

        assert_eq!(events[2].1.event_type, "/record.v1.RecordService/UpdateRecord");
        assert_eq!(
            events[2].1.request_body,
            serde_json::json!({ "id": created.id, "name": "renamed", "rating": 2 }).to_string()
        );

        assert_eq!(events[3].1.event_type, "/record.v1.RecordService/DeleteRecord");
        assert_eq!(events[3].1.request_body, "");
    }

    #[tokio::test]
    async fn test_failed_operations_emit_no_event() {
        let publisher = RecordingPublisher::new();
        let handler = handler(InMemoryRepository::new(), publisher.clone());

        let _ = handler
            .get_record(Request::new(GetRecordRequest { id: 1 }))
            .await
            .unwrap_err();
        let _ = handler
            .delete_record(Request::new(DeleteRecordRequest { id: 1 }))
            .await
            .unwrap_err();

        assert!(publisher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_change_the_rpc_outcome() {
        let repo = InMemoryRepository::new();
        let publisher = RecordingPublisher::failing();
        let handler = handler(repo.clone(), publisher.clone());

        let created = handler
            .create_record(create_request("name", 10))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(created.id, 1);

        handler
            .delete_record(Request::new(DeleteRecordRequest { id: created.id }))
            .await
            .unwrap();

        // Both operations attempted their one publish.
        assert_eq!(publisher.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let repo = InMemoryRepository::new();
        let handler = handler(repo.clone(), RecordingPublisher::new());

        let created = handler
            .create_record(create_request("name", 10))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(created.id, 1);
        assert_eq!(created.name, "name");
        assert_eq!(created.rating, 10);

        let fetched = handler
            .get_record(Request::new(GetRecordRequest { id: 1 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched.id, 1);
        assert_eq!(fetched.name, "name");
        assert_eq!(fetched.rating, 10);

        // Updating an id the store has never seen affects zero rows.
        let status = handler
            .update_record(Request::new(UpdateRecordRequest {
                id: 2,
                name: "name".to_string(),
                rating: 10,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let status = handler
            .delete_record(Request::new(DeleteRecordRequest { id: 9999 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
