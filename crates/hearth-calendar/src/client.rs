//! HTTP fetcher for iCalendar feeds and the Google Calendar API.

use std::time::Duration;

use chrono::{Days, NaiveDate, NaiveTime};
use tracing::instrument;

use crate::engine::CalendarFetch;
use crate::error::CalendarError;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ApiEvent, CalendarSource, EventListResponse, FeedLocation, Payload, Window};

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Pages followed per calendar before giving up on `nextPageToken`.
const MAX_PAGES: usize = 5;

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
    google_base_url: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            retry,
            google_base_url: GOOGLE_CALENDAR_API_BASE.to_string(),
        })
    }

    /// Point Google requests at another API root.
    pub fn with_google_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.google_base_url = base_url.into();
        self
    }

    /// Download an iCalendar feed.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_ics(&self, url: &str) -> Result<String, CalendarError> {
        let response = with_retry(&self.retry, || self.client.get(url).send()).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        if !body.contains("BEGIN:VCALENDAR") {
            return Err(CalendarError::InvalidPayload(
                "response is not an iCalendar document".to_string(),
            ));
        }
        Ok(body)
    }

    /// One page of `events.list`, bounded to the window and expanded upstream.
    #[instrument(skip(self, api_key), level = "info")]
    pub async fn list_events(
        &self,
        calendar_id: &str,
        api_key: &str,
        window: &Window,
        page_token: Option<&str>,
    ) -> Result<EventListResponse, CalendarError> {
        // Padded by a day on each side; the engine clips to the window after
        // shifting stamps to local time.
        let time_min = utc_midnight(window.start().pred_opt().unwrap_or(window.start()));
        let time_max = utc_midnight(
            window
                .end()
                .checked_add_days(Days::new(2))
                .unwrap_or(window.end()),
        );

        let mut url = format!(
            "{}/calendars/{}/events?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults=250&key={}",
            self.google_base_url,
            urlencoding::encode(calendar_id),
            urlencoding::encode(&time_min),
            urlencoding::encode(&time_max),
            urlencoding::encode(api_key),
        );

        if let Some(pt) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(pt)));
        }

        let response = with_retry(&self.retry, || self.client.get(&url).send()).await?;
        self.handle_response(response).await
    }

    /// All pages of a calendar's events inside the window.
    pub async fn fetch_google(
        &self,
        calendar_id: &str,
        api_key: &str,
        window: &Window,
    ) -> Result<Vec<ApiEvent>, CalendarError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self
                .list_events(calendar_id, api_key, window, page_token.as_deref())
                .await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }

        tracing::warn!(
            "Calendar {} has more than {} pages, keeping {} events",
            calendar_id,
            MAX_PAGES,
            items.len()
        );
        Ok(items)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::InvalidPayload(format!("JSON parse error: {}", e)))
        } else {
            Err(status_error(response).await)
        }
    }
}

impl CalendarFetch for HttpFetcher {
    #[instrument(skip_all, fields(source = %source.name), level = "info")]
    async fn fetch(&self, source: &CalendarSource, window: &Window) -> Result<Payload, CalendarError> {
        match &source.feed {
            FeedLocation::Ics { url } => self.fetch_ics(url).await.map(Payload::Ics),
            FeedLocation::Google {
                calendar_id,
                api_key,
            } => self
                .fetch_google(calendar_id, api_key, window)
                .await
                .map(Payload::Structured),
        }
    }
}

fn utc_midnight(date: NaiveDate) -> String {
    date.and_time(NaiveTime::default()).and_utc().to_rfc3339()
}

async fn status_error(response: reqwest::Response) -> CalendarError {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return CalendarError::RateLimited(retry_after);
    }

    let message = response.text().await.unwrap_or_default();
    CalendarError::FeedStatus { status, message }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::SourceRole;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nSUMMARY:Swim\r\nDTSTART:20240611T170000\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    fn fetcher(retries: u32) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), RetryConfig::new(retries, 1, 5)).unwrap()
    }

    fn window() -> Window {
        Window::week_from(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ics_feed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/wren.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&mock_server)
            .await;

        let source = CalendarSource::ics(
            "wren",
            SourceRole::Child,
            format!("{}/wren.ics", mock_server.uri()),
        );
        let payload = fetcher(0).fetch(&source, &window()).await.unwrap();

        match payload {
            Payload::Ics(body) => assert!(body.contains("SUMMARY:Swim")),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_ics_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.ics"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&mock_server)
            .await;

        let result = fetcher(2)
            .fetch_ics(&format!("{}/missing.ics", mock_server.uri()))
            .await;

        match result {
            Err(CalendarError::FeedStatus { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_ics_rejects_html() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Sign in</html>"))
            .mount(&mock_server)
            .await;

        let result = fetcher(0).fetch_ics(&format!("{}/feed.ics", mock_server.uri())).await;
        assert!(matches!(result, Err(CalendarError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_fetch_ics_retries_server_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&mock_server)
            .await;

        let body = fetcher(2)
            .fetch_ics(&format!("{}/feed.ics", mock_server.uri()))
            .await
            .unwrap();
        assert!(body.contains("BEGIN:VEVENT"));
    }

    #[tokio::test]
    async fn test_google_events_follow_pages() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendars/family%40example.com/events"))
            .and(query_param("pageToken", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "b", "summary": "Ferien", "start": {"date": "2024-06-12"}}
                ]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/family%40example.com/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "a", "summary": "Meeting", "start": {"dateTime": "2024-06-11T10:00:00Z"}}
                ],
                "nextPageToken": "page2"
            })))
            .mount(&mock_server)
            .await;

        let source = CalendarSource::google("family", SourceRole::Household, "family@example.com", "secret");
        let payload = fetcher(0)
            .with_google_base_url(mock_server.uri())
            .fetch(&source, &window())
            .await
            .unwrap();

        match payload {
            Payload::Structured(items) => {
                let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_google_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let result = fetcher(0)
            .with_google_base_url(mock_server.uri())
            .fetch_google("primary", "key", &window())
            .await;

        assert!(matches!(result, Err(CalendarError::RateLimited(30))));
    }

    #[test]
    fn test_utc_midnight_format() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        assert_eq!(utc_midnight(date), "2024-06-09T00:00:00+00:00");
    }
}
