use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::{PageSource, SourceError};
use crate::core::config::SourceConfig;
use crate::model::RawItemFields;

/// W3C WebDriver element key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// How long the browser waits for elements to appear before reporting
/// "no such element".
const IMPLICIT_WAIT_MS: u64 = 10_000;

/// Settle time after navigating to the listing.
const LISTING_SETTLE_SECS: u64 = 3;

/// Relative XPaths of the listing-row fields, in persisted-record order.
const ROW_FIELD_XPATHS: [(&str, &str); 10] = [
    ("name", "./div[1]/span[2]"),
    ("fullname", "./div[1]/span[5]"),
    ("price", "./div[2]"),
    ("age", "./div[3]"),
    ("buys", "./div[4]"),
    ("sells", "./div[5]"),
    ("volume", "./div[6]"),
    ("makers", "./div[7]"),
    ("liquidity", "./div[12]"),
    ("fdv", "./div[13]"),
];

const DETAIL_STATS_XPATH: &str =
    "/html/body/div[1]/div/main/div/div/div[1]/div/div/div[4]/div/div[1]";
const DETAIL_AGE_XPATH: &str =
    "/html/body/div[1]/div/main/div/div/div[1]/div/div/div[4]/div/div[1]/div[1]/span[2]";
const COPY_BUTTON_XPATH: &str =
    "/html/body/div[1]/div/main/div/div/div[1]/div/div/div[4]/div/div[1]/div[9]/div/button";
const LOCKED_LIQUIDITY_CSS: &str = ".custom-f1j64i > .chakra-icon";

const CLIPBOARD_SCRIPT: &str = r#"
const done = arguments[arguments.length - 1];
navigator.clipboard.readText().then(done).catch(function () { done(null); });
"#;

/// `PageSource` backed by a WebDriver server (chromedriver or a Selenium
/// grid), speaking the W3C wire protocol over JSON/HTTP.
pub struct WebDriverSource {
    client: Client,
    server_url: String,
    listing_url: String,
    session_id: Option<String>,
    listing_handle: Option<String>,
    detail_handle: Option<String>,
    detail_href: Option<String>,
}

impl WebDriverSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            server_url: config.webdriver_url.trim_end_matches('/').to_string(),
            listing_url: config.listing_url(),
            session_id: None,
            listing_handle: None,
            detail_handle: None,
            detail_href: None,
        }
    }

    /// Start a browser session and configure waits and window size.
    pub async fn connect(&mut self) -> Result<(), SourceError> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--window-size=1919,1040"]
                    }
                }
            }
        });

        let value = self.request(Method::POST, "/session", Some(body)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Protocol("session response missing sessionId".into()))?
            .to_string();
        self.session_id = Some(session_id);

        self.session_request(
            Method::POST,
            "/timeouts",
            Some(json!({ "implicit": IMPLICIT_WAIT_MS })),
        )
        .await?;

        tracing::info!("WebDriver session established at {}", self.server_url);
        Ok(())
    }

    /// End the browser session.
    pub async fn quit(&mut self) -> Result<(), SourceError> {
        if self.session_id.is_some() {
            self.session_request(Method::DELETE, "", None).await?;
            self.session_id = None;
        }
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.server_url, path);

        let mut request = self.client.request(method, &url);
        // The wire protocol requires a JSON body on every POST.
        request = match body {
            Some(body) => request.json(&body),
            None => request.json(&json!({})),
        };

        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let code = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");

        if is_transient(status, code) {
            Err(SourceError::Transient(format!("{}: {}", code, message)))
        } else {
            Err(SourceError::Protocol(format!(
                "{} ({}): {}",
                code, status, message
            )))
        }
    }

    async fn session_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, SourceError> {
        let session_id = self.session_id.as_ref().ok_or(SourceError::NoSession)?;
        let path = format!("/session/{}{}", session_id, path);
        self.request(method, &path, body).await
    }

    async fn navigate(&self, url: &str) -> Result<(), SourceError> {
        self.session_request(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_element(&self, using: &str, value: &str) -> Result<String, SourceError> {
        let body = json!({ "using": using, "value": value });
        let found = self.session_request(Method::POST, "/element", Some(body)).await?;
        element_id(&found)
    }

    /// Like `find_element`, but "no such element" becomes `Ok(None)`.
    async fn try_find_element(
        &self,
        using: &str,
        value: &str,
    ) -> Result<Option<String>, SourceError> {
        match self.find_element(using, value).await {
            Ok(id) => Ok(Some(id)),
            Err(SourceError::Transient(msg)) if msg.starts_with("no such element") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_from(
        &self,
        element: &str,
        using: &str,
        value: &str,
    ) -> Result<String, SourceError> {
        let body = json!({ "using": using, "value": value });
        let path = format!("/element/{}/element", element);
        let found = self.session_request(Method::POST, &path, Some(body)).await?;
        element_id(&found)
    }

    async fn element_text(&self, element: &str) -> Result<String, SourceError> {
        let path = format!("/element/{}/text", element);
        let value = self.session_request(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn element_attribute(
        &self,
        element: &str,
        name: &str,
    ) -> Result<Option<String>, SourceError> {
        let path = format!("/element/{}/attribute/{}", element, name);
        let value = self.session_request(Method::GET, &path, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &str) -> Result<(), SourceError> {
        let path = format!("/element/{}/click", element);
        self.session_request(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn execute_sync(&self, script: &str, args: Value) -> Result<Value, SourceError> {
        let body = json!({ "script": script, "args": args });
        self.session_request(Method::POST, "/execute/sync", Some(body))
            .await
    }

    async fn execute_async(&self, script: &str, args: Value) -> Result<Value, SourceError> {
        let body = json!({ "script": script, "args": args });
        self.session_request(Method::POST, "/execute/async", Some(body))
            .await
    }

    async fn window_handles(&self) -> Result<Vec<String>, SourceError> {
        let value = self.session_request(Method::GET, "/window/handles", None).await?;
        let handles = value
            .as_array()
            .ok_or_else(|| SourceError::Protocol("window handles not an array".into()))?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        Ok(handles)
    }

    async fn current_handle(&self) -> Result<String, SourceError> {
        let value = self.session_request(Method::GET, "/window", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SourceError::Protocol("window handle not a string".into()))
    }

    async fn switch_window(&self, handle: &str) -> Result<(), SourceError> {
        self.session_request(Method::POST, "/window", Some(json!({ "handle": handle })))
            .await?;
        Ok(())
    }

    async fn close_window(&self) -> Result<(), SourceError> {
        self.session_request(Method::DELETE, "/window", None).await?;
        Ok(())
    }

    fn row_xpath(index: usize) -> String {
        format!("/html/body/div[1]/div/main/div/div[4]/a[{}]", index)
    }

    async fn row_field(&self, row: &str, xpath: &str) -> Result<String, SourceError> {
        let field = self.find_from(row, "xpath", xpath).await?;
        self.element_text(&field).await
    }
}

fn element_id(value: &Value) -> Result<String, SourceError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SourceError::Protocol("response missing element id".into()))
}

fn is_transient(status: StatusCode, code: &str) -> bool {
    matches!(
        code,
        "no such element"
            | "stale element reference"
            | "element not interactable"
            | "element click intercepted"
            | "timeout"
            | "script timeout"
    ) || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl PageSource for WebDriverSource {
    async fn open_listing(&mut self) -> Result<(), SourceError> {
        let url = self.listing_url.clone();
        self.navigate(&url).await?;
        tokio::time::sleep(Duration::from_secs(LISTING_SETTLE_SECS)).await;
        self.listing_handle = Some(self.current_handle().await?);
        Ok(())
    }

    async fn list_item(&mut self, index: usize) -> Result<Option<RawItemFields>, SourceError> {
        let row = match self.try_find_element("xpath", &Self::row_xpath(index)).await? {
            Some(row) => row,
            None => return Ok(None), // end of listing
        };

        let href = self
            .element_attribute(&row, "href")
            .await?
            .ok_or_else(|| SourceError::Transient(format!("row {} missing href", index)))?;

        let mut texts = std::collections::HashMap::new();
        for (field, xpath) in ROW_FIELD_XPATHS {
            texts.insert(field, self.row_field(&row, xpath).await?);
        }
        let mut take = |field: &str| texts.remove(field).unwrap_or_default();

        Ok(Some(RawItemFields {
            href,
            name: take("name"),
            fullname: take("fullname"),
            price: take("price"),
            age: take("age"),
            makers: take("makers"),
            volume: take("volume"),
            buys: take("buys"),
            sells: take("sells"),
            liquidity: take("liquidity"),
            fdv: take("fdv"),
        }))
    }

    async fn open_detail(&mut self, identifier: &str) -> Result<(), SourceError> {
        if self.listing_handle.is_none() {
            self.listing_handle = Some(self.current_handle().await?);
        }

        self.execute_sync("window.open(arguments[0]);", json!([identifier]))
            .await?;

        let handles = self.window_handles().await?;
        let newest = handles
            .last()
            .ok_or_else(|| SourceError::Protocol("no window handles after open".into()))?
            .clone();
        self.switch_window(&newest).await?;

        self.detail_handle = Some(newest);
        self.detail_href = Some(identifier.to_string());
        Ok(())
    }

    async fn detail_age_text(&mut self) -> Result<String, SourceError> {
        let element = self.find_element("xpath", DETAIL_AGE_XPATH).await?;
        self.element_text(&element).await
    }

    async fn extract_contract_address(&mut self) -> Result<Option<String>, SourceError> {
        let button = self.find_element("xpath", COPY_BUTTON_XPATH).await?;

        self.execute_sync(
            "arguments[0].scrollIntoView(true);",
            json!([{ ELEMENT_KEY: button }]),
        )
        .await?;
        self.click(&button).await?;
        // Let the page finish writing to the clipboard.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let value = self.execute_async(CLIPBOARD_SCRIPT, json!([])).await?;
        let address = value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(address)
    }

    async fn detail_locked_liquidity(&mut self) -> Result<bool, SourceError> {
        Ok(self
            .try_find_element("css selector", LOCKED_LIQUIDITY_CSS)
            .await?
            .is_some())
    }

    async fn detail_metrics(&mut self) -> Result<RawItemFields, SourceError> {
        let href = self
            .detail_href
            .clone()
            .ok_or_else(|| SourceError::Protocol("no detail view open".into()))?;

        let mut texts = std::collections::HashMap::new();
        for (field, xpath) in ROW_FIELD_XPATHS {
            if matches!(field, "name" | "fullname") {
                continue; // immutable, kept from the discovery record
            }
            let element = self
                .find_element(
                    "xpath",
                    &format!("{}{}", DETAIL_STATS_XPATH, xpath.trim_start_matches('.')),
                )
                .await?;
            texts.insert(field, self.element_text(&element).await?);
        }
        let mut take = |field: &str| texts.remove(field).unwrap_or_default();

        Ok(RawItemFields {
            href,
            name: String::new(),
            fullname: String::new(),
            price: take("price"),
            age: take("age"),
            makers: take("makers"),
            volume: take("volume"),
            buys: take("buys"),
            sells: take("sells"),
            liquidity: take("liquidity"),
            fdv: take("fdv"),
        })
    }

    async fn close_detail(&mut self) -> Result<(), SourceError> {
        if self.detail_handle.take().is_some() {
            if let Err(e) = self.close_window().await {
                tracing::debug!("closing detail window failed: {}", e);
            }
        }
        self.detail_href = None;

        if let Some(handle) = self.listing_handle.clone() {
            self.switch_window(&handle).await?;
        }
        Ok(())
    }
}
