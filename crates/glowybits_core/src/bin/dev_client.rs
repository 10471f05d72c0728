/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use glowybits_core::debounce::Debouncer;
use glowybits_core::feed::InfiniteFeed;
use glowybits_core::title::display_title;
use glowybits_protocol::{FeedPage, FeedState, Image, StatusMessage, ToggleOutcome};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

struct Client {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Client {
    fn from_env() -> Result<Self> {
        let base_url = std::env::var("GLOWYBITS_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string();
        let token = std::env::var("GLOWYBITS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn page(&self, cursor: u64, query: Option<&str>) -> Result<FeedPage> {
        let mut params = vec![("cursor", cursor.to_string())];
        if let Some(q) = query {
            params.push(("query", q.to_string()));
        }
        let resp = self
            .authed(self.http.get(format!("{}/api/images", self.base_url)))
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn toggle(&self, image_id: &str, kind: &str) -> Result<ToggleOutcome> {
        let url = format!(
            "{}/api/images/{}/interactions",
            self.base_url,
            urlencoding::encode(image_id)
        );
        let resp = self
            .authed(self.http.post(url))
            .json(&serde_json::json!({ "kind": kind }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let msg: StatusMessage = resp.json().await?;
            anyhow::bail!("{} {}", msg.status, msg.message);
        }
        Ok(resp.json().await?)
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<(StatusMessage, Option<String>)> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await?;
        let token = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|c| c.split(';').next())
            .and_then(|kv| kv.split_once('='))
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty());
        Ok((resp.json().await?, token))
    }
}

fn print_images<'a>(images: impl Iterator<Item = &'a Image>) {
    for image in images {
        let title = display_title(&image.title).unwrap_or_else(|| image.title.clone());
        println!("{}  {}  {}", image.id, title, image.url);
    }
}

fn describe(state: Option<&FeedState>) -> &'static str {
    match state {
        Some(FeedState::NoResults { .. }) => "no images match this search",
        Some(FeedState::Empty) => "the feed is empty",
        _ => "",
    }
}

async fn run_feed(client: &Client, query: Option<&str>, max_pages: usize) -> Result<()> {
    let mut feed = InfiniteFeed::new(query);
    for _ in 0..max_pages {
        let Some(cursor) = feed.next_cursor() else {
            break;
        };
        let Some(ticket) = feed.begin(cursor) else {
            break;
        };
        match client.page(cursor, feed.query()).await {
            Ok(page) => {
                feed.complete(ticket, page);
            }
            Err(e) => {
                feed.abandon(ticket);
                return Err(e);
            }
        }
    }
    print_images(feed.images());
    let note = describe(feed.state());
    if !note.is_empty() {
        println!("{note}");
    } else if feed.is_exhausted() {
        println!("-- end of feed --");
    }
    Ok(())
}

async fn run_search(client: &Client, quiet: Duration) -> Result<()> {
    let (debouncer, mut settled) = Debouncer::<String>::spawn(quiet);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    debouncer.push(line);
                }
                None => input_open = false,
            },
            query = settled.recv() => {
                let Some(query) = query else { break };
                info!(query = %query, "search settled");
                match client.page(0, Some(&query)).await {
                    Ok(page) => {
                        println!("== {query}");
                        print_images(page.images.iter());
                        let note = describe(Some(&page.state));
                        if !note.is_empty() {
                            println!("{note}");
                        }
                    }
                    Err(e) => warn!("search failed: {e:#}"),
                }
            }
        }
        if !input_open {
            break;
        }
    }
    debouncer.finish().await;
    while let Some(query) = settled.recv().await {
        let page = client.page(0, Some(&query)).await?;
        println!("== {query}");
        print_images(page.images.iter());
    }
    Ok(())
}

fn usage() -> ! {
    eprintln!(
        "usage: dev_client <feed [query] | search | register <email> <password> <username> <full name> | login <email> <password> | logout | like <image_id> | favorite <image_id>>"
    );
    std::process::exit(2)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let client = Client::from_env()?;
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(cmd) = args.first() else { usage() };
    let arg = |i: usize| args.get(i).cloned().unwrap_or_else(|| usage());

    match cmd.as_str() {
        "feed" => {
            let max_pages = std::env::var("GLOWYBITS_MAX_PAGES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(5)
                .clamp(1, 100);
            run_feed(&client, args.get(1).map(String::as_str), max_pages).await?;
        }
        "search" => {
            let quiet = std::env::var("GLOWYBITS_SEARCH_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(glowybits_core::debounce::DEFAULT_QUIET);
            run_search(&client, quiet).await?;
        }
        "register" => {
            let body = serde_json::json!({
                "email": arg(1),
                "password": arg(2),
                "username": arg(3),
                "full_name": arg(4),
            });
            let (msg, _) = client.post_json("/api/auth/register", body).await?;
            println!("{} {}", msg.status, msg.message);
        }
        "login" => {
            let body = serde_json::json!({ "email": arg(1), "password": arg(2) });
            let (msg, token) = client.post_json("/api/auth/login", body).await?;
            println!("{} {}", msg.status, msg.message);
            if let Some(token) = token {
                println!("export GLOWYBITS_TOKEN={token}");
            }
        }
        "logout" => {
            let resp = client
                .authed(client.http.post(format!("{}/api/auth/logout", client.base_url)))
                .send()
                .await?;
            let msg: StatusMessage = resp.json().await?;
            println!("{} {}", msg.status, msg.message);
        }
        "like" | "favorite" => {
            let outcome = client.toggle(&arg(1), cmd).await?;
            println!(
                "liked={} favorited={} ({:?})",
                outcome.state.liked, outcome.state.favorited, outcome.action
            );
        }
        _ => usage(),
    }
    Ok(())
}
