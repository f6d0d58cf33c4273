//! The `scrape` pipeline step: regulation PDFs from the mass.gov search.
//!
//! Drives a headless Chrome through chromedriver. For each search result the
//! linked regulation page is opened; a downloadable PDF is stored as-is,
//! otherwise the page itself is printed to PDF. Failures on one result are
//! logged and the walk continues.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::ScraperConfig;
use crate::storage::ObjectStore;
use crate::webdriver::WebDriver;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapeStats {
    pub pages: usize,
    pub downloaded: usize,
    pub printed: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum Saved {
    Downloaded,
    Printed,
    Skipped,
}

/// Search page numbers: 1, 1 + increment, … for `total_pages` pages.
pub fn page_numbers(config: &ScraperConfig) -> Vec<u32> {
    (0..config.total_pages)
        .map(|i| 1 + i * config.page_increment)
        .collect()
}

/// Object name for a regulation title: spaces become underscores.
pub fn pdf_file_name(title: &str, printed: bool) -> String {
    let stem = title.replace(' ', "_");
    if printed {
        format!("{}_print.pdf", stem)
    } else {
        format!("{}.pdf", stem)
    }
}

pub struct RegulationScraper<'a> {
    pub config: &'a ScraperConfig,
    pub store: &'a dyn ObjectStore,
    pub http: reqwest::Client,
    /// Key prefix for uploads, e.g. `regulations/`.
    pub prefix: &'a str,
}

impl RegulationScraper<'_> {
    /// Opens a browser session, walks every search page and closes the
    /// session whatever the outcome.
    pub async fn run(&self, webdriver_url: &str, timeout: Duration) -> Result<ScrapeStats> {
        let driver = WebDriver::start(webdriver_url, &self.config.browser_args, timeout).await?;
        let result = self.walk(&driver).await;
        driver.quit().await;
        result
    }

    async fn walk(&self, driver: &WebDriver) -> Result<ScrapeStats> {
        let mut stats = ScrapeStats::default();
        for page in page_numbers(self.config) {
            let url = self.config.search_url.replace("{}", &page.to_string());
            tracing::info!(page, url = %url, "processing search page");
            if let Err(e) = self.scrape_page(driver, &url, &mut stats).await {
                tracing::warn!(page, error = %e, "search page failed");
            }
            stats.pages += 1;
        }
        Ok(stats)
    }

    async fn scrape_page(&self, driver: &WebDriver, url: &str, stats: &mut ScrapeStats) -> Result<()> {
        driver.goto(url).await?;
        sleep_ms(self.config.page_load_ms).await;

        let count = driver.find_all(&self.config.result_selector).await?.len();
        tracing::info!(count, "regulations found on page");

        for index in 0..count {
            match self.scrape_result(driver, index).await {
                Ok(Saved::Downloaded) => stats.downloaded += 1,
                Ok(Saved::Printed) => stats.printed += 1,
                Ok(Saved::Skipped) => {}
                Err(e) => {
                    tracing::warn!(index, error = %e, "error processing regulation");
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn scrape_result(&self, driver: &WebDriver, index: usize) -> Result<Saved> {
        // Handles go stale after navigating back, so look the list up again.
        let links = driver.find_all(&self.config.result_selector).await?;
        let link = links
            .get(index)
            .with_context(|| format!("result {} disappeared", index))?;
        let span = driver
            .find_child(link, ".//span")
            .await?
            .context("result has no title span")?;
        let title = driver.text(&span).await?.trim().to_string();
        let href = driver
            .property(link, "href")
            .await?
            .context("result has no href")?;

        tracing::info!(title = %title, "processing regulation");
        driver.goto(&href).await?;
        sleep_ms(self.config.detail_load_ms).await;

        // Return to the result list even when saving fails.
        let saved = self.save_regulation(driver, &title).await;

        driver.back().await?;
        sleep_ms(self.config.back_ms).await;
        saved
    }

    async fn save_regulation(&self, driver: &WebDriver, title: &str) -> Result<Saved> {
        let pdf_link = match driver.find(&self.config.download_selector).await? {
            Some(el) => driver.property(&el, "href").await?,
            None => None,
        };

        if let Some(pdf_link) = pdf_link {
            match self.download(&pdf_link).await {
                Ok(Some(bytes)) => {
                    self.upload(&pdf_file_name(title, false), bytes).await?;
                    return Ok(Saved::Downloaded);
                }
                Ok(None) => return Ok(Saved::Skipped),
                Err(e) => tracing::warn!(title = %title, error = %e, "PDF download failed"),
            }
        } else {
            tracing::info!(title = %title, "no downloadable PDF, printing page");
        }

        let bytes = driver.print_pdf().await?;
        self.upload(&pdf_file_name(title, true), bytes).await?;
        Ok(Saved::Printed)
    }

    /// PDF bytes on 200; `None` for any other status.
    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.http.get(url).send().await?;
        if resp.status().as_u16() != 200 {
            tracing::warn!(url = %url, status = resp.status().as_u16(), "PDF not downloaded");
            return Ok(None);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let key = format!("{}{}", self.prefix, file_name);
        self.store.put_object(&key, bytes, "application/pdf").await?;
        tracing::info!(key = %key, "uploaded");
        Ok(())
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
