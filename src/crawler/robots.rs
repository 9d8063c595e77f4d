//! robots.txt loading and evaluation.
//!
//! A missing, unreachable, or malformed robots.txt yields the permissive
//! policy: everything allowed, no crawl-delay, no sitemaps.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::config::ROBOTS_TIMEOUT;

/// AI bot user agents audited against the site's rules. Any that are blocked
/// are surfaced as a crawl warning; they never affect crawl behavior.
pub const AI_BOT_USER_AGENTS: &[&str] = &["GPTBot", "ClaudeBot", "PerplexityBot", "GoogleOther"];

/// Parsed robots.txt rules for a single origin.
#[derive(Debug, Default)]
pub struct RobotsPolicy {
    /// Lowercase user-agent to disallowed path prefixes.
    rules: HashMap<String, Vec<String>>,
    /// Lowercase user-agent to crawl-delay in seconds.
    delays: HashMap<String, f64>,
    /// Sitemap URLs declared anywhere in the file.
    sitemaps: Vec<String>,
    pub loaded: bool,
}

impl RobotsPolicy {
    /// Everything allowed; used when the file cannot be fetched.
    pub fn permissive() -> Self {
        RobotsPolicy::default()
    }

    /// Fetch and parse `<origin>/robots.txt`. Any failure is permissive.
    pub async fn load(origin: &Url, client: &reqwest::Client) -> Self {
        let robots_url = match origin.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return RobotsPolicy::permissive(),
        };

        let response = match client
            .get(robots_url.clone())
            .timeout(ROBOTS_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(_) => {
                tracing::debug!(url = %robots_url, "no robots.txt, crawling permissively");
                return RobotsPolicy::permissive();
            }
            Err(e) => {
                tracing::debug!(url = %robots_url, error = %e, "robots.txt unreachable");
                return RobotsPolicy::permissive();
            }
        };

        let body = response.text().await.unwrap_or_default();
        Self::from_content(&body)
    }

    /// Parse raw robots.txt content.
    pub fn from_content(content: &str) -> Self {
        let mut policy = RobotsPolicy {
            loaded: true,
            ..RobotsPolicy::default()
        };
        let mut current_agents: Vec<String> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            let line = match line.find('#') {
                Some(idx) => line[..idx].trim(),
                None => line,
            };

            if line.is_empty() {
                current_agents.clear();
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    for agent in &current_agents {
                        policy
                            .rules
                            .entry(agent.clone())
                            .or_default()
                            .push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    if let Ok(seconds) = value.parse::<f64>() {
                        for agent in &current_agents {
                            policy.delays.insert(agent.clone(), seconds);
                        }
                    }
                }
                // Sitemap lines are global, not scoped to a user-agent.
                "sitemap" => {
                    if !value.is_empty() {
                        policy.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        policy
    }

    /// Check whether the URL's path is allowed for the given user agent.
    /// Specific user-agent rules are consulted first, then the wildcard.
    pub fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let path = url.path();
        let ua_lower = user_agent.to_lowercase();

        for agent in [ua_lower.as_str(), "*"] {
            if let Some(disallowed) = self.rules.get(agent) {
                for pattern in disallowed {
                    // "Disallow:" with an empty value allows everything.
                    if pattern.is_empty() {
                        continue;
                    }
                    if path.starts_with(pattern.as_str()) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Declared crawl-delay for the agent, falling back to the wildcard.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let ua_lower = user_agent.to_lowercase();
        [ua_lower.as_str(), "*"]
            .iter()
            .find_map(|agent| self.delays.get(*agent))
            .map(|seconds| Duration::from_secs_f64(seconds.max(0.0)))
    }

    pub fn sitemap_urls(&self) -> &[String] {
        &self.sitemaps
    }

    /// Which of the known AI bots are blocked for the given URL.
    pub fn blocked_ai_bots(&self, url: &Url) -> Vec<String> {
        AI_BOT_USER_AGENTS
            .iter()
            .filter(|ua| !self.is_allowed(url, ua))
            .map(|ua| ua.to_string())
            .collect()
    }
}
