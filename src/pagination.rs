//! Lazy traversal of cursor-paginated list endpoints.
//!
//! A page response looks like
//! `{"data": [...], "has_more": true, "first_id": "a", "last_id": "z"}`.
//! The next page is requested with the same parameters plus
//! `after_id=<last_id>`, and only once the consumer asks for it.

use async_trait::async_trait;
use futures_util::Stream;
use futures_util::stream;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpClient, RequestDescriptor};

/// Query parameter carrying the cursor of the next page.
pub const AFTER_PARAM: &str = "after_id";

/// Key under which list endpoints return their items.
pub const DEFAULT_ITEM_KEY: &str = "data";

pub type Params = BTreeMap<String, String>;

/// Continuation state derived from one page response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor {
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

impl Cursor {
    pub fn from_page(page: &Value) -> Self {
        let id = |key: &str| {
            page.get(key)
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };
        Self {
            has_more: page
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            first_id: id("first_id"),
            last_id: id("last_id"),
        }
    }

    /// Parameters for the following page, or `None` when traversal is over.
    pub fn next_params(&self, params: &Params) -> Option<Params> {
        if !self.has_more {
            return None;
        }
        let last_id = self.last_id.as_ref()?;
        let mut next = params.clone();
        next.insert(AFTER_PARAM.to_string(), last_id.clone());
        Some(next)
    }
}

/// Fetches one page for the given parameters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetchPage: Send + Sync {
    async fn fetch_page(&self, params: &Params) -> Result<Value, ApiError>;
}

/// Adapts a closure into a [`FetchPage`].
pub struct FetchFn<F>(pub F);

#[async_trait]
impl<F, Fut> FetchPage for FetchFn<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    async fn fetch_page(&self, params: &Params) -> Result<Value, ApiError> {
        (self.0)(params.clone()).await
    }
}

/// Pages fetched with `GET <path>` through the request executor.
pub struct HttpPageFetcher {
    client: HttpClient,
    config: ClientConfig,
    path: String,
}

impl HttpPageFetcher {
    pub fn new(client: HttpClient, config: ClientConfig, path: impl Into<String>) -> Self {
        Self {
            client,
            config,
            path: path.into(),
        }
    }
}

#[async_trait]
impl FetchPage for HttpPageFetcher {
    #[tracing::instrument(skip(self), fields(path = %self.path))]
    async fn fetch_page(&self, params: &Params) -> Result<Value, ApiError> {
        let request = RequestDescriptor::get(self.path.clone()).with_query_map(params.clone());
        self.client.execute(&request, &self.config).await
    }
}

/// Lazy sequence of whole page responses.
pub struct PageStream<F: FetchPage> {
    fetcher: F,
    next_params: Option<Params>,
    pages_fetched: usize,
}

impl<F: FetchPage> PageStream<F> {
    pub fn new(fetcher: F, initial_params: Params) -> Self {
        Self {
            fetcher,
            next_params: Some(initial_params),
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetches the next page, or returns `None` once the server reported no
    /// more pages. A failed fetch ends the traversal.
    pub async fn next_page(&mut self) -> Result<Option<Value>, ApiError> {
        let Some(params) = self.next_params.take() else {
            return Ok(None);
        };

        debug!("Fetching page {} with {:?}...", self.pages_fetched + 1, params);
        let page = self.fetcher.fetch_page(&params).await?;
        self.pages_fetched += 1;

        let cursor = Cursor::from_page(&page);
        self.next_params = cursor.next_params(&params);
        if cursor.has_more && self.next_params.is_none() {
            warn!(
                "Page {} reports has_more without last_id; stopping pagination",
                self.pages_fetched
            );
        }

        Ok(Some(page))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value, ApiError>>
    where
        F: 'static,
    {
        stream::unfold(Some(self), |state| async move {
            let mut pages = state?;
            match pages.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(pages))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Eagerly fetches every remaining page.
    pub async fn collect_pages(mut self) -> Result<Vec<Value>, ApiError> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }
}

/// Lazy sequence of the items found under `item_key` across pages.
pub struct ItemStream<F: FetchPage> {
    pages: PageStream<F>,
    item_key: String,
    buffered: VecDeque<Value>,
}

impl<F: FetchPage> ItemStream<F> {
    pub fn new(fetcher: F, initial_params: Params, item_key: impl Into<String>) -> Self {
        Self {
            pages: PageStream::new(fetcher, initial_params),
            item_key: item_key.into(),
            buffered: VecDeque::new(),
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages.pages_fetched()
    }

    /// Next item. A new page is fetched only when every item of the previous
    /// one has been handed out.
    pub async fn next_item(&mut self) -> Result<Option<Value>, ApiError> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Ok(Some(item));
            }
            match self.pages.next_page().await? {
                Some(page) => self.buffered.extend(take_items(page, &self.item_key)),
                None => return Ok(None),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value, ApiError>>
    where
        F: 'static,
    {
        stream::unfold(Some(self), |state| async move {
            let mut items = state?;
            match items.next_item().await {
                Ok(Some(item)) => Some((Ok(item), Some(items))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Eagerly collects every remaining item in order.
    pub async fn collect_items(mut self) -> Result<Vec<Value>, ApiError> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }
}

fn take_items(page: Value, item_key: &str) -> Vec<Value> {
    match page {
        Value::Object(mut fields) => match fields.remove(item_key) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!("Expected an array under {:?}, got {}", item_key, other);
                Vec::new()
            }
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures_util::StreamExt;
    use mockall::predicate::function;
    use serde_json::json;
    use std::future::{Ready, ready};
    use std::sync::{Arc, Mutex};

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Three pages keyed by their `after_id`, recording every fetch.
    fn three_pages(
        log: Arc<Mutex<Vec<Params>>>,
    ) -> FetchFn<impl Fn(Params) -> Ready<Result<Value, ApiError>> + Send + Sync> {
        FetchFn(move |params: Params| {
            log.lock().unwrap().push(params.clone());
            let page = match params.get(AFTER_PARAM).map(String::as_str) {
                None => {
                    json!({"data": [1, 2], "has_more": true, "first_id": "1", "last_id": "2"})
                }
                Some("2") => {
                    json!({"data": [3, 4], "has_more": true, "first_id": "3", "last_id": "4"})
                }
                Some("4") => {
                    json!({"data": [5], "has_more": false, "first_id": "5", "last_id": "5"})
                }
                Some(other) => panic!("unexpected cursor {}", other),
            };
            ready(Ok(page))
        })
    }

    #[test]
    fn test_cursor_from_page() {
        let cursor = Cursor::from_page(&json!({"has_more": true, "first_id": "a", "last_id": "z"}));
        assert!(cursor.has_more);
        assert_eq!(cursor.first_id.as_deref(), Some("a"));
        assert_eq!(cursor.last_id.as_deref(), Some("z"));

        let cursor = Cursor::from_page(&json!({"data": [], "last_id": null}));
        assert_eq!(cursor, Cursor::default());
    }

    #[test]
    fn test_cursor_next_params_keeps_other_params() {
        let cursor = Cursor {
            has_more: true,
            first_id: None,
            last_id: Some("z".to_string()),
        };
        let next = cursor.next_params(&params(&[("limit", "2"), ("after_id", "old")]));
        assert_eq!(next, Some(params(&[("limit", "2"), ("after_id", "z")])));

        let done = Cursor::default();
        assert_eq!(done.next_params(&params(&[("limit", "2")])), None);
    }

    #[tokio::test]
    async fn test_items_across_three_pages_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let items = ItemStream::new(three_pages(log.clone()), params(&[("limit", "2")]), "data")
            .collect_items()
            .await
            .unwrap();

        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], params(&[("limit", "2")]));
        assert_eq!(log[1], params(&[("limit", "2"), ("after_id", "2")]));
        assert_eq!(log[2], params(&[("limit", "2"), ("after_id", "4")]));
    }

    #[tokio::test]
    async fn test_items_fetch_pages_lazily() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut items = ItemStream::new(three_pages(log.clone()), Params::new(), "data");

        assert_eq!(items.next_item().await.unwrap(), Some(json!(1)));
        assert_eq!(log.lock().unwrap().len(), 1);

        assert_eq!(items.next_item().await.unwrap(), Some(json!(2)));
        assert_eq!(log.lock().unwrap().len(), 1);

        // Page 3 is not requested until page 2 is exhausted.
        assert_eq!(items.next_item().await.unwrap(), Some(json!(3)));
        assert_eq!(items.next_item().await.unwrap(), Some(json!(4)));
        assert_eq!(log.lock().unwrap().len(), 2);

        assert_eq!(items.next_item().await.unwrap(), Some(json!(5)));
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(items.next_item().await.unwrap(), None);
        assert_eq!(items.pages_fetched(), 3);
    }

    #[tokio::test]
    async fn test_take_first_item_only_fetches_first_page() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first: Vec<_> = ItemStream::new(three_pages(log.clone()), Params::new(), "data")
            .into_stream()
            .take(1)
            .collect()
            .await;

        assert_eq!(first.len(), 1);
        assert_eq!(*first[0].as_ref().unwrap(), json!(1));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_page_stream_yields_whole_pages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pages = PageStream::new(three_pages(log), Params::new())
            .collect_pages()
            .await
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0]["last_id"], "2");
        assert_eq!(pages[2]["has_more"], false);
    }

    #[tokio::test]
    async fn test_missing_has_more_stops_after_one_page() {
        let mut fetcher = MockFetchPage::new();
        fetcher
            .expect_fetch_page()
            .times(1)
            .returning(|_| Ok(json!({"data": ["only"]})));

        let items = ItemStream::new(fetcher, Params::new(), "data")
            .collect_items()
            .await
            .unwrap();
        assert_eq!(items, vec![json!("only")]);
    }

    #[test_log::test(tokio::test)]
    async fn test_has_more_without_last_id_stops() {
        let mut fetcher = MockFetchPage::new();
        fetcher
            .expect_fetch_page()
            .times(1)
            .returning(|_| Ok(json!({"data": [1], "has_more": true, "last_id": null})));

        let mut pages = PageStream::new(fetcher, Params::new());
        assert!(pages.next_page().await.unwrap().is_some());
        assert!(pages.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_item_key() {
        let mut fetcher = MockFetchPage::new();
        fetcher
            .expect_fetch_page()
            .with(function(|p: &Params| p.get("limit").map(String::as_str) == Some("1")))
            .times(1)
            .returning(|_| Ok(json!({"results": [{"id": "a"}], "has_more": false})));

        let items = ItemStream::new(fetcher, params(&[("limit", "1")]), "results")
            .collect_items()
            .await
            .unwrap();
        assert_eq!(items, vec![json!({"id": "a"})]);
    }

    #[tokio::test]
    async fn test_error_mid_traversal_keeps_yielded_items_and_stops() {
        let mut fetcher = MockFetchPage::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!({"data": [1], "has_more": true, "last_id": "1"})));
        fetcher
            .expect_fetch_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ApiError::from_response(500, Value::Null, None)));

        let results: Vec<_> = ItemStream::new(fetcher, Params::new(), "data")
            .into_stream()
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].as_ref().unwrap(), json!(1));
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::InternalServer
        );
    }

    #[tokio::test]
    async fn test_http_page_fetcher() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/v1/models?limit=1")
            .with_status(200)
            .with_body(
                json!({"data": [{"id": "m1"}], "has_more": true, "first_id": "m1", "last_id": "m1"})
                    .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v1/models?after_id=m1&limit=1")
            .with_status(200)
            .with_body(json!({"data": [{"id": "m2"}], "has_more": false}).to_string())
            .create_async()
            .await;

        let config = ClientConfig::builtin().with_base_url(server.url());
        let fetcher = HttpPageFetcher::new(HttpClient::default(), config, "v1/models");
        let items = ItemStream::new(fetcher, params(&[("limit", "1")]), DEFAULT_ITEM_KEY)
            .collect_items()
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(items, vec![json!({"id": "m1"}), json!({"id": "m2"})]);
    }
}
