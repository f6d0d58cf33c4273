//! Minimal W3C WebDriver client over reqwest.
//!
//! Covers the commands the regulation scraper needs against a running
//! chromedriver: session lifecycle, navigation, element lookup, text and
//! property reads, page source and print-to-PDF.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

pub struct WebDriver {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn body(&self) -> Value {
        match self {
            Locator::Css(v) => json!({ "using": "css selector", "value": v }),
            Locator::XPath(v) => json!({ "using": "xpath", "value": v }),
        }
    }
}

impl WebDriver {
    /// Opens a new Chrome session with the given command-line arguments.
    pub async fn start(endpoint: &str, browser_args: &[String], timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = endpoint.trim_end_matches('/').to_string();

        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": browser_args }
                }
            }
        });
        let resp = client
            .post(format!("{}/session", base_url))
            .json(&caps)
            .send()
            .await
            .with_context(|| format!("WebDriver not reachable at {}", base_url))?;
        let value = unwrap_value(resp).await?;
        let session_id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("WebDriver returned no sessionId"))?
            .to_string();

        tracing::debug!(session = %session_id, "webdriver session started");
        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        unwrap_value(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.client.get(self.url(path)).send().await?;
        unwrap_value(resp).await
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn back(&self) -> Result<()> {
        self.post("/back", json!({})).await?;
        Ok(())
    }

    pub async fn find_all(&self, css: &str) -> Result<Vec<ElementId>> {
        let value = self.post("/elements", Locator::Css(css).body()).await?;
        let list = value
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("expected element list"))?;
        list.iter().map(element_id).collect()
    }

    /// First element matching `css`, or `None` when there is none.
    pub async fn find(&self, css: &str) -> Result<Option<ElementId>> {
        self.find_with("/element", Locator::Css(css)).await
    }

    /// Descendant of `parent` matching `xpath`.
    pub async fn find_child(&self, parent: &ElementId, xpath: &str) -> Result<Option<ElementId>> {
        self.find_with(&format!("/element/{}/element", parent.0), Locator::XPath(xpath))
            .await
    }

    async fn find_with(&self, path: &str, locator: Locator<'_>) -> Result<Option<ElementId>> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&locator.body())
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            if body["value"]["error"] == "no such element" {
                return Ok(None);
            }
            bail!("WebDriver error: {}", body["value"]);
        }
        let value = unwrap_value(resp).await?;
        element_id(&value).map(Some)
    }

    pub async fn text(&self, element: &ElementId) -> Result<String> {
        let value = self.get(&format!("/element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn property(&self, element: &ElementId, name: &str) -> Result<Option<String>> {
        let value = self
            .get(&format!("/element/{}/property/{}", element.0, name))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn source(&self) -> Result<String> {
        let value = self.get("/source").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Prints the current page and returns the PDF bytes.
    pub async fn print_pdf(&self) -> Result<Vec<u8>> {
        let value = self.post("/print", json!({})).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("print returned no data"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("print returned invalid base64")
    }

    /// Ends the session. Errors are logged, not returned.
    pub async fn quit(self) {
        let resp = self
            .client
            .delete(format!("{}/session/{}", self.base_url, self.session_id))
            .send()
            .await;
        if let Err(e) = resp {
            tracing::warn!(error = %e, "failed to close webdriver session");
        }
    }
}

async fn unwrap_value(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let mut body: Value = resp.json().await.context("WebDriver returned non-JSON")?;
    if !status.is_success() {
        bail!("WebDriver error {}: {}", status, body["value"]);
    }
    Ok(body["value"].take())
}

fn element_id(value: &Value) -> Result<ElementId> {
    value
        .get(ELEMENT_KEY)
        .and_then(|v| v.as_str())
        .map(|s| ElementId(s.to_string()))
        .ok_or_else(|| anyhow::anyhow!("not an element reference: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn session(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST)
                .path("/session")
                .body_includes("--headless");
            then.status(200)
                .json_body(json!({ "value": { "sessionId": "s1", "capabilities": {} } }));
        });
    }

    #[tokio::test]
    async fn finds_elements_and_reads_them() {
        let server = MockServer::start();
        session(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/session/s1/elements")
                .body_includes("css selector");
            then.status(200).json_body(json!({ "value": [
                { ELEMENT_KEY: "e1" }, { ELEMENT_KEY: "e2" }
            ] }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/session/s1/element/e1/element")
                .body_includes(".//span");
            then.status(200).json_body(json!({ "value": { ELEMENT_KEY: "span1" } }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/session/s1/element/span1/text");
            then.status(200).json_body(json!({ "value": "105 CMR 590" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/session/s1/element/e1/property/href");
            then.status(200).json_body(json!({ "value": "https://www.mass.gov/r" }));
        });
        let quit = server.mock(|when, then| {
            when.method(DELETE).path("/session/s1");
            then.status(200).json_body(json!({ "value": null }));
        });

        let args = vec!["--headless".to_string()];
        let driver = WebDriver::start(&server.base_url(), &args, Duration::from_secs(5))
            .await
            .unwrap();
        let links = driver.find_all("a").await.unwrap();
        assert_eq!(links, vec![ElementId("e1".into()), ElementId("e2".into())]);

        let span = driver.find_child(&links[0], ".//span").await.unwrap().unwrap();
        assert_eq!(driver.text(&span).await.unwrap(), "105 CMR 590");
        assert_eq!(
            driver.property(&links[0], "href").await.unwrap().as_deref(),
            Some("https://www.mass.gov/r")
        );

        driver.quit().await;
        quit.assert();
    }

    #[tokio::test]
    async fn missing_element_is_none_and_print_decodes() {
        let server = MockServer::start();
        session(&server);
        server.mock(|when, then| {
            when.method(POST).path("/session/s1/element");
            then.status(404).json_body(json!({ "value": {
                "error": "no such element", "message": "not found"
            } }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/session/s1/print");
            then.status(200).json_body(json!({ "value": "JVBERi0xLjQ=" }));
        });

        let args = vec!["--headless".to_string()];
        let driver = WebDriver::start(&server.base_url(), &args, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(driver.find("a.download").await.unwrap().is_none());
        assert_eq!(driver.print_pdf().await.unwrap(), b"%PDF-1.4".to_vec());
    }
}
