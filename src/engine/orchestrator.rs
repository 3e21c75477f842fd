//! Single-flight batch scan orchestration.
//!
//! Coordinates one full scan at a time: classify the regime, derive the
//! symbol list, scan each symbol sequentially with a fixed pacing delay
//! (the sole upstream rate limiter), then replace the stored result
//! wholesale. The in-progress flag is claimed with an atomic
//! compare-and-swap and released by a drop guard, so it clears on every
//! exit path including panics. A second start request while a scan is
//! running is rejected, not queued.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use super::regime::RegimeClassifier;
use super::spreads::{sort_by_score, SpreadScanner};
use crate::types::{RegimeSnapshot, ScanResult, SpreadCandidate, SpreadStrategy};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Outcome of a scan start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    Started,
    AlreadyRunning,
}

/// Summary of the most recent completed scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub total_opportunities: usize,
    pub symbols_scanned: usize,
    pub put_spreads_found: usize,
    pub call_spreads_found: usize,
}

/// Poll-friendly status of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub scan_in_progress: bool,
    pub latest_regime: Option<RegimeSnapshot>,
    pub latest_scan_summary: Option<ScanSummary>,
}

/// A filtered, capped page of opportunities.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunitiesPage {
    pub regime: RegimeSnapshot,
    pub opportunities: Vec<SpreadCandidate>,
    pub total_available: usize,
}

/// Clears the in-progress flag when the scan task ends, however it ends.
struct InProgressGuard(Arc<AtomicBool>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the process-wide scan state: the in-progress flag and the most
/// recent [`ScanResult`].
pub struct ScanOrchestrator {
    classifier: Arc<RegimeClassifier>,
    scanner: Arc<SpreadScanner>,
    in_progress: Arc<AtomicBool>,
    latest: Arc<RwLock<Option<ScanResult>>>,
    pacing: Duration,
    overall_limit: usize,
}

impl ScanOrchestrator {
    pub fn new(
        classifier: Arc<RegimeClassifier>,
        scanner: Arc<SpreadScanner>,
        pacing: Duration,
        overall_limit: usize,
    ) -> Self {
        Self {
            classifier,
            scanner,
            in_progress: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(RwLock::new(None)),
            pacing,
            overall_limit,
        }
    }

    /// Start a full scan in the background.
    ///
    /// Returns immediately. When a scan is already in flight the request
    /// is rejected — the compare-and-swap closes the race where two
    /// near-simultaneous starts both observe "not in progress".
    pub fn start_full_scan(self: &Arc<Self>, symbols: Option<Vec<String>>) -> ScanStart {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Scan already in progress, rejecting start request");
            return ScanStart::AlreadyRunning;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = InProgressGuard(Arc::clone(&this.in_progress));
            this.run_full_scan(symbols).await;
        });

        ScanStart::Started
    }

    /// Whether a scan is currently in flight.
    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Current status with a summary of the latest completed scan.
    pub async fn status(&self) -> ScanStatus {
        let latest = self.latest.read().await;
        ScanStatus {
            scan_in_progress: self.is_scanning(),
            latest_regime: latest.as_ref().map(|r| r.regime.clone()),
            latest_scan_summary: latest.as_ref().map(|r| ScanSummary {
                total_opportunities: r.total_opportunities,
                symbols_scanned: r.symbols_scanned.len(),
                put_spreads_found: r.put_spreads.len(),
                call_spreads_found: r.call_spreads.len(),
            }),
        }
    }

    /// The latest completed scan result, if any.
    pub async fn latest(&self) -> Option<ScanResult> {
        self.latest.read().await.clone()
    }

    /// Filter the stored result by strategy and minimum score, re-sort
    /// descending, and return a capped page. None until a scan completes.
    pub async fn opportunities(
        &self,
        strategy: Option<SpreadStrategy>,
        min_score: f64,
        limit: usize,
    ) -> Option<OpportunitiesPage> {
        let latest = self.latest.read().await;
        let result = latest.as_ref()?;

        let mut opportunities: Vec<SpreadCandidate> = Vec::new();
        if strategy.map_or(true, |s| s == SpreadStrategy::PutCredit) {
            opportunities.extend(result.put_spreads.iter().cloned());
        }
        if strategy.map_or(true, |s| s == SpreadStrategy::CallCredit) {
            opportunities.extend(result.call_spreads.iter().cloned());
        }

        opportunities.retain(|c| c.score >= min_score);
        sort_by_score(&mut opportunities);

        let total_available = opportunities.len();
        opportunities.truncate(limit);

        Some(OpportunitiesPage {
            regime: result.regime.clone(),
            opportunities,
            total_available,
        })
    }

    /// The scan body. Per-symbol scans are strictly sequential; a symbol
    /// that yields nothing (including on upstream failure, which the
    /// scanner logs and absorbs) is skipped and the scan continues.
    async fn run_full_scan(&self, symbols: Option<Vec<String>>) {
        info!("Starting full opportunity scan");

        let regime = self.classifier.detect_regime().await;

        let symbols = match symbols {
            Some(list) if !list.is_empty() => list,
            _ => self.classifier.scan_symbols(Some(&regime)).await,
        };
        info!(count = symbols.len(), ?symbols, "Scanning symbols");

        let mut symbols_scanned = Vec::new();
        let mut put_spreads = Vec::new();
        let mut call_spreads = Vec::new();
        let mut total_opportunities = 0usize;

        for (i, symbol) in symbols.iter().enumerate() {
            let result = self.scanner.scan_symbol(symbol).await;
            info!(
                symbol = %symbol,
                opportunities = result.total_opportunities,
                "Symbol scanned"
            );

            symbols_scanned.push(symbol.clone());
            total_opportunities += result.total_opportunities;
            put_spreads.extend(result.put_spreads);
            call_spreads.extend(result.call_spreads);

            // Pacing delay between symbols to respect upstream rate limits.
            if i + 1 < symbols.len() && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        sort_by_score(&mut put_spreads);
        sort_by_score(&mut call_spreads);
        put_spreads.truncate(self.overall_limit);
        call_spreads.truncate(self.overall_limit);

        let result = ScanResult {
            regime,
            symbols_scanned,
            put_spreads,
            call_spreads,
            total_opportunities,
        };

        info!(
            total = result.total_opportunities,
            symbols = result.symbols_scanned.len(),
            "Full scan complete"
        );

        *self.latest.write().await = Some(result);
    }

    /// Inject a result directly (test hook).
    #[cfg(test)]
    pub(crate) async fn set_latest(&self, result: ScanResult) {
        *self.latest.write().await = Some(result);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
