//! Crawl engine.
//!
//! Breadth-first expansion from a set of seeds. A single coordinator loop owns
//! the frontier, the visited set and the result map; analyses run
//! concurrently (up to [`CrawlConfig::concurrency`]) and report back to it.
//!
//! ```text
//!   seeds ──► Frontier ──claim──► analyze ──► relatives ──offer──┐
//!                ▲                                                │
//!                └────────────────────────────────────────────────┘
//! ```

mod frontier;
mod output;

use std::sync::Arc;

use alloy_primitives::Address;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use output::{DiscoveryOutput, SkipReason};

use crate::analysis::AddressAnalyzer;
use crate::config::{CrawlConfig, DiscoveryOverrides, Seed};
use crate::error::DiscoveryError;
use crate::logger::DiscoveryLogger;
use crate::types::Analysis;
use frontier::{Frontier, PendingItem};

pub struct DiscoveryEngine {
    analyzer: Arc<AddressAnalyzer>,
    overrides: Arc<DiscoveryOverrides>,
    config: CrawlConfig,
    logger: DiscoveryLogger,
}

impl DiscoveryEngine {
    /// Chain reads made by `analyzer` follow `config.retry_policy`.
    pub fn new(
        analyzer: AddressAnalyzer,
        overrides: DiscoveryOverrides,
        config: CrawlConfig,
        logger: DiscoveryLogger,
    ) -> Self {
        Self {
            analyzer: Arc::new(analyzer.with_retry_policy(config.retry_policy.clone())),
            overrides: Arc::new(overrides),
            config,
            logger,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawls from `seeds` until no unvisited relative is left.
    pub async fn crawl(
        &self,
        seeds: Vec<Seed>,
        block_number: u64,
    ) -> Result<DiscoveryOutput, DiscoveryError> {
        self.crawl_with_cancellation(seeds, block_number, CancellationToken::new())
            .await
    }

    /// Like [`crawl`](Self::crawl), stopping early when `cancel` fires or the
    /// time budget runs out.
    ///
    /// Stopping early drops in-flight analyses and returns everything
    /// committed so far with `completed = false`. Only a systemic
    /// collaborator failure makes the crawl itself fail.
    pub async fn crawl_with_cancellation(
        &self,
        seeds: Vec<Seed>,
        block_number: u64,
        cancel: CancellationToken,
    ) -> Result<DiscoveryOutput, DiscoveryError> {
        let started = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        let deadline = self.config.time_budget.map(|budget| started + budget);

        tracing::info!(
            target: "discovery::engine",
            crawl = %self.logger.label(),
            seeds = seeds.len(),
            block_number,
            concurrency,
            "Starting discovery"
        );

        let mut frontier = Frontier::new();
        for seed in seeds {
            frontier.push_seed(seed.address, seed.overrides);
        }

        let mut output = DiscoveryOutput {
            completed: true,
            ..Default::default()
        };
        let mut claimed = 0usize;
        let mut in_flight = FuturesUnordered::new();

        let time_budget = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(time_budget);

        loop {
            while in_flight.len() < concurrency && claimed < self.config.max_addresses {
                let Some((address, item)) = frontier.claim() else {
                    break;
                };
                let PendingItem {
                    templates,
                    overrides,
                    depth,
                } = item;

                let overrides = overrides.or_else(|| self.overrides.get(&address).cloned());
                if overrides.as_ref().is_some_and(|o| o.ignore_discovery) {
                    self.skip(&mut output, address, SkipReason::IgnoredByConfig);
                    continue;
                }

                claimed += 1;
                output.skipped.remove(&address);
                self.logger.log_analyzing(address, depth);

                let analyzer = self.analyzer.clone();
                let logger = self.logger.clone();
                in_flight.push(async move {
                    let result = analyzer
                        .analyze(address, overrides.as_ref(), block_number, &logger, &templates)
                        .await;
                    (address, depth, result)
                });
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!(
                        target: "discovery::engine",
                        crawl = %self.logger.label(),
                        in_flight = in_flight.len(),
                        "Discovery cancelled"
                    );
                    output.completed = false;
                    break;
                }
                () = &mut time_budget => {
                    tracing::warn!(
                        target: "discovery::engine",
                        crawl = %self.logger.label(),
                        in_flight = in_flight.len(),
                        "Time budget exhausted, stopping discovery"
                    );
                    output.completed = false;
                    break;
                }
                Some((address, depth, result)) = in_flight.next() => {
                    match result {
                        Ok(analysis) => self.commit(&mut output, &mut frontier, analysis, depth),
                        Err(e) if e.is_systemic() => {
                            tracing::error!(
                                target: "discovery::engine",
                                crawl = %self.logger.label(),
                                address = %address,
                                error = %e,
                                "Systemic failure, aborting discovery"
                            );
                            return Err(e);
                        }
                        Err(e) => {
                            self.logger.log_failure(address, &e);
                            output.failures.insert(address, e.to_string());
                        }
                    }
                }
            }
        }

        // The loop only drains with pending items left when the address limit is hit.
        if output.completed && !frontier.is_empty() {
            tracing::warn!(
                target: "discovery::engine",
                crawl = %self.logger.label(),
                max_addresses = self.config.max_addresses,
                "Address limit reached"
            );
            for (address, item) in frontier.drain() {
                let ignored = match &item.overrides {
                    Some(overrides) => overrides.ignore_discovery,
                    None => self.overrides.is_ignored(&address),
                };
                let reason = if ignored {
                    SkipReason::IgnoredByConfig
                } else {
                    SkipReason::AddressLimit
                };
                self.skip(&mut output, address, reason);
            }
            output.completed = false;
        }

        tracing::info!(
            target: "discovery::engine",
            crawl = %self.logger.label(),
            analyzed = output.analyses.len(),
            failures = output.failures.len(),
            skipped = output.skipped.len(),
            completed = output.completed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Discovery finished"
        );

        Ok(output)
    }

    fn commit(
        &self,
        output: &mut DiscoveryOutput,
        frontier: &mut Frontier,
        analysis: Analysis,
        depth: usize,
    ) {
        if let Some(relatives) = analysis.relatives() {
            let next_depth = depth + 1;
            for (relative, templates) in relatives {
                if frontier.is_visited(relative) {
                    continue;
                }
                if next_depth > self.config.max_depth {
                    // A pending entry still takes the suggestions of deeper referrers.
                    if !frontier.merge_if_pending(*relative, templates) {
                        output
                            .skipped
                            .entry(*relative)
                            .or_insert(SkipReason::DepthExceeded);
                    }
                    continue;
                }
                if frontier.offer(*relative, templates, next_depth) {
                    output.skipped.remove(relative);
                }
            }
        }
        output.analyses.insert(analysis.address(), analysis);
    }

    fn skip(&self, output: &mut DiscoveryOutput, address: Address, reason: SkipReason) {
        self.logger.log_skip(address, &reason.to_string());
        output.skipped.insert(address, reason);
    }
}
