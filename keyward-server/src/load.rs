use anyhow::Context;
use futures_util::{StreamExt, stream};
use std::collections::BTreeMap;
use ulid::Ulid;

const NAME_CHARACTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const NAME_LENGTH: usize = 5;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub target: String,
    pub requests: usize,
    pub concurrency: usize,
    /// Fixed username for every request; random names when unset.
    pub username: Option<String>,
}

/// Count of responses per HTTP status.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub statuses: BTreeMap<u16, usize>,
    pub failures: usize,
}

impl LoadReport {
    pub fn count(&self, status: u16) -> usize {
        self.statuses.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.statuses.values().sum::<usize>() + self.failures
    }
}

pub fn random_username() -> String {
    let mut bits = Ulid::new().random();
    let mut name = String::with_capacity(NAME_LENGTH);
    for _ in 0..NAME_LENGTH {
        let index = (bits % NAME_CHARACTERS.len() as u128) as usize;
        name.push(NAME_CHARACTERS[index] as char);
        bits /= NAME_CHARACTERS.len() as u128;
    }
    name
}

/// Fires `requests` create calls at `target` with at most `concurrency` in
/// flight, printing `<status> <body> - <name>` for each response.
pub async fn run_load(options: LoadOptions) -> anyhow::Result<LoadReport> {
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build http client")?;
    let url = format!("{}/users", options.target.trim_end_matches('/'));
    let concurrency = options.concurrency.max(1);

    tracing::info!(
        "Sending {} create requests to {} ({} concurrent)",
        options.requests,
        url,
        concurrency
    );

    let mut responses = stream::iter(0..options.requests)
        .map(|_| {
            let client = client.clone();
            let url = url.clone();
            let name = options.username.clone().unwrap_or_else(random_username);
            async move {
                let result = send_create(&client, &url, &name).await;
                (name, result)
            }
        })
        .buffer_unordered(concurrency);

    let mut report = LoadReport::default();
    while let Some((name, result)) = responses.next().await {
        match result {
            Ok((status, body)) => {
                println!("{} {} - {}", status, body, name);
                *report.statuses.entry(status).or_default() += 1;
            }
            Err(error) => {
                tracing::warn!("Request for {} failed: {:#}", name, error);
                report.failures += 1;
            }
        }
    }

    for (status, count) in &report.statuses {
        tracing::info!("status {}: {}", status, count);
    }
    if report.failures > 0 {
        tracing::info!("transport failures: {}", report.failures);
    }

    Ok(report)
}

async fn send_create(
    client: &reqwest::Client,
    url: &str,
    username: &str,
) -> anyhow::Result<(u16, String)> {
    let response = client
        .post(url)
        .json(&serde_json::json!({ "username": username }))
        .send()
        .await
        .with_context(|| format!("POST {}", url))?;

    let status = response.status().as_u16();
    let body = response.text().await.context("failed to read body")?;
    Ok((status, body))
}
