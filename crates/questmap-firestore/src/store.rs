//! [`MarkerStore`] over the Cloud Firestore REST API.
//!
//! Subscriptions poll `runQuery` and emit a batch only when the result set
//! changed. The first snapshot is fetched inside `subscribe`, so a store that
//! cannot be reached fails the subscription up front.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use questmap_config::{ConfigError, ConfigResult, QuestmapConfig};
use questmap_core::{
    ChangeBatch, ChangeStream, MarkerDocument, MarkerId, MarkerPatch, MarkerStore, NewMarker,
    QueryScope, StoreError, StoreResult,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::wire::{
    self, CommitRequest, Document, ErrorEnvelope, FieldTransform, Fields, Precondition,
    RunQueryItem, RunQueryRequest, Write, FIELD_CREATED_AT, FIELD_POSITION,
};

/// Consecutive failed polls before a subscription is closed.
const MAX_POLL_FAILURES: u32 = 3;

/// Length of client-generated document ids.
const DOCUMENT_ID_LEN: usize = 20;

/// Connection settings for [`FirestoreStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreSettings {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub collection: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl FirestoreSettings {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: questmap_config::DEFAULT_ENDPOINT.to_string(),
            project_id: project_id.into(),
            api_key: api_key.into(),
            access_token: None,
            collection: questmap_config::DEFAULT_COLLECTION.to_string(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Settings from the `[store]` and `[session]` sections.
    pub fn from_config(config: &QuestmapConfig) -> ConfigResult<Self> {
        let store = &config.store;
        let project_id = store
            .project_id
            .clone()
            .ok_or(ConfigError::MissingCredential("project_id"))?;
        let api_key = store
            .api_key
            .clone()
            .ok_or(ConfigError::MissingCredential("api_key"))?;

        Ok(Self {
            endpoint: store.endpoint.clone(),
            project_id,
            api_key,
            access_token: store.access_token.clone(),
            collection: store.collection.clone(),
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `projects/{p}/databases/(default)/documents`
    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.project_id
        )
    }
}

/// Firestore-backed marker collection.
///
/// Cloning is cheap and shares the HTTP connection pool.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Client,
    settings: FirestoreSettings,
}

impl FirestoreStore {
    pub fn new(client: Client, settings: FirestoreSettings) -> Self {
        Self { client, settings }
    }

    /// Build a store with its own client using the configured request timeout.
    pub fn connect(settings: FirestoreSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        info!(
            project = %settings.project_id,
            collection = %settings.collection,
            "Firestore store ready"
        );
        Ok(Self::new(client, settings))
    }

    pub fn settings(&self) -> &FirestoreSettings {
        &self.settings
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/v1/{}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.database_path()
        )
    }

    fn document_url(&self, id: &MarkerId) -> String {
        format!(
            "{}/{}/{}",
            self.documents_url(),
            self.settings.collection,
            id
        )
    }

    fn document_name(&self, id: &MarkerId) -> String {
        format!(
            "{}/{}/{}",
            self.settings.database_path(),
            self.settings.collection,
            id
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.query(&[("key", self.settings.api_key.as_str())]);
        match &self.settings.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: Option<&MarkerId>) -> StoreResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response, id).await)
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        let url = format!("{}:commit", self.documents_url());
        self.send(self.client.post(url).json(&CommitRequest { writes }), None)
            .await?;
        Ok(())
    }

    async fn run_query(&self, scope: &QueryScope) -> StoreResult<Vec<MarkerDocument>> {
        let url = format!("{}:runQuery", self.documents_url());
        let body = RunQueryRequest::new(&self.settings.collection, &scope.filter);
        let response = self.send(self.client.post(url).json(&body), None).await?;
        let items: Vec<RunQueryItem> = response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("malformed query response: {e}")))?;

        let mut docs: Vec<MarkerDocument> = items
            .into_iter()
            .filter_map(|item| item.document)
            .filter_map(|doc| {
                let name = doc.name.clone();
                match MarkerDocument::try_from(doc) {
                    Ok(doc) => Some(doc),
                    Err(err) => {
                        warn!(document = %name, error = %err, "Skipping malformed document");
                        None
                    }
                }
            })
            .filter(|doc| scope.matches(doc))
            .collect();
        docs.sort_by_key(|doc| doc.created_at);
        Ok(docs)
    }
}

/// Client-side document id, 20 alphanumeric characters.
fn generate_document_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(DOCUMENT_ID_LEN);
    id
}

/// Map a non-success response onto the store error taxonomy.
async fn error_from_response(response: Response, id: Option<&MarkerId>) -> StoreError {
    let status = response.status();
    let detail = match response.json::<ErrorEnvelope>().await {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            format!("{} {}: {}", status.as_u16(), envelope.error.status, envelope.error.message)
        }
        _ => status.to_string(),
    };
    status_error(status, id, detail)
}

pub(crate) fn status_error(status: StatusCode, id: Option<&MarkerId>, detail: String) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => match id {
            Some(id) => StoreError::NotFound(id.clone()),
            None => StoreError::WriteRejected(detail),
        },
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::CONFLICT
        | StatusCode::PRECONDITION_FAILED => StoreError::WriteRejected(detail),
        _ => StoreError::Unavailable(detail),
    }
}

struct Poll {
    store: FirestoreStore,
    scope: QueryScope,
    last: Vec<MarkerDocument>,
    closed: bool,
}

impl Poll {
    async fn next_change(&mut self) -> Option<StoreResult<ChangeBatch>> {
        if self.closed {
            return None;
        }

        let mut failures = 0;
        loop {
            tokio::time::sleep(self.store.settings.poll_interval).await;
            match self.store.run_query(&self.scope).await {
                Ok(docs) if docs == self.last => {
                    failures = 0;
                }
                Ok(docs) => {
                    debug!(scope = %self.scope, markers = docs.len(), "Remote change detected");
                    self.last = docs.clone();
                    return Some(Ok(ChangeBatch::new(docs)));
                }
                Err(err) if err.is_transient() && failures + 1 < MAX_POLL_FAILURES => {
                    failures += 1;
                    warn!(error = %err, failures, "Poll failed, retrying");
                }
                Err(err) => {
                    warn!(error = %err, "Closing subscription");
                    self.closed = true;
                    return Some(Err(StoreError::SubscriptionClosed(err.to_string())));
                }
            }
        }
    }
}

#[async_trait]
impl MarkerStore for FirestoreStore {
    async fn create(&self, marker: NewMarker) -> StoreResult<MarkerId> {
        let id = MarkerId::new(generate_document_id());
        let write = Write {
            update: Some(Document {
                name: self.document_name(&id),
                fields: wire::new_marker_fields(&marker),
                create_time: None,
                update_time: None,
            }),
            update_transforms: vec![FieldTransform::request_time(FIELD_CREATED_AT)],
            current_document: Some(Precondition { exists: false }),
            ..Write::default()
        };
        self.commit(vec![write]).await?;
        debug!(id = %id, "Created document");
        Ok(id)
    }

    async fn update(&self, id: &MarkerId, patch: MarkerPatch) -> StoreResult<()> {
        let mut fields = Fields::new();
        fields.insert(
            FIELD_POSITION.to_string(),
            wire::position_value(patch.position),
        );
        let request = self
            .client
            .patch(self.document_url(id))
            .query(&[
                ("updateMask.fieldPaths", FIELD_POSITION),
                ("currentDocument.exists", "true"),
            ])
            .json(&Document {
                name: String::new(),
                fields,
                create_time: None,
                update_time: None,
            });
        self.send(request, Some(id)).await?;
        Ok(())
    }

    async fn delete(&self, id: &MarkerId) -> StoreResult<()> {
        match self.send(self.client.delete(self.document_url(id)), Some(id)).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn delete_many(&self, ids: &[MarkerId]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let writes = ids
            .iter()
            .map(|id| Write {
                delete: Some(self.document_name(id)),
                ..Write::default()
            })
            .collect();
        self.commit(writes).await?;
        debug!(count = ids.len(), "Deleted documents");
        Ok(())
    }

    async fn list(&self, scope: &QueryScope) -> StoreResult<Vec<MarkerDocument>> {
        self.run_query(scope).await
    }

    async fn subscribe(&self, scope: &QueryScope) -> StoreResult<ChangeStream> {
        let initial = self.run_query(scope).await?;
        let poll = Poll {
            store: self.clone(),
            scope: scope.clone(),
            last: initial.clone(),
            closed: false,
        };

        let first = stream::once(async move { Ok::<_, StoreError>(ChangeBatch::new(initial)) });
        let rest = stream::unfold(poll, |mut poll| async move {
            let item = poll.next_change().await?;
            Some((item, poll))
        });
        Ok(first.chain(rest).boxed())
    }

    fn name(&self) -> &str {
        "firestore"
    }
}
