// =============================================================================
// PivotRefresher — periodic recompute of level tables, disk cache, freshness
// =============================================================================
//
// The refresher owns two independent scheduler loops (daily, weekly) running
// in a fixed wall-clock time zone (default UTC+8), because the upstream
// data provider's daily/weekly candles close at 00:00 UTC. Between scheduled
// fires the loop also performs an immediate refresh if the current snapshot
// is stale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::pivot::levels::{camarilla, LevelTable};
use crate::pivot::store::{min_acceptable_symbol_count, PivotStore, Snapshot};
use crate::types::Period;

/// Previous period's High/Low/Close for one symbol, fetched out-of-band.
/// The REST mechanics behind this are treated as a black box (spec §1); only
/// the trait boundary is part of the engine's contract.
#[derive(Debug, Clone, Copy)]
pub struct PreviousOhlc {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Pluggable source of "previous period OHLC for a symbol" and "the tracked
/// symbol universe". A concrete `reqwest`-backed implementation is provided
/// below; tests use an in-memory fake.
#[async_trait]
pub trait PreviousOhlcSource: Send + Sync {
    async fn list_symbols(&self) -> Result<Vec<String>>;
    async fn fetch(&self, symbol: &str, period: Period) -> Result<PreviousOhlc>;
}

/// Unauthenticated REST client hitting a configurable exchange-info and
/// previous-OHLC endpoint. Mirrors the teacher's `binance::client` style of
/// `reqwest::Client` + `anyhow::Context` at every I/O boundary, but carries no
/// signing material since these are all public endpoints.
pub struct RestPreviousOhlcSource {
    client: reqwest::Client,
    exchange_info_url: String,
    previous_ohlc_url_template: String,
}

impl RestPreviousOhlcSource {
    pub fn new(exchange_info_url: impl Into<String>, previous_ohlc_url_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            exchange_info_url: exchange_info_url.into(),
            previous_ohlc_url_template: previous_ohlc_url_template.into(),
        }
    }
}

#[async_trait]
impl PreviousOhlcSource for RestPreviousOhlcSource {
    async fn list_symbols(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(&self.exchange_info_url)
            .send()
            .await
            .context("failed to fetch exchange info")?;

        if !resp.status().is_success() {
            anyhow::bail!("exchange info request failed: {}", resp.status());
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse exchange info JSON")?;

        let symbols = body
            .get("symbols")
            .and_then(|v| v.as_array())
            .context("missing symbols array in exchange info")?;

        let mut out = Vec::new();
        for entry in symbols {
            let symbol = entry.get("symbol").and_then(|v| v.as_str()).unwrap_or("");
            let contract_type = entry.get("contractType").and_then(|v| v.as_str()).unwrap_or("");
            let status = entry.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if symbol.ends_with("USDT")
                && symbol.len() > 4
                && (contract_type.is_empty() || contract_type == "PERPETUAL")
                && (status.is_empty() || status == "TRADING")
            {
                out.push(symbol.to_string());
            }
        }
        Ok(out)
    }

    async fn fetch(&self, symbol: &str, period: Period) -> Result<PreviousOhlc> {
        let interval = match period {
            Period::Daily => "1d",
            Period::Weekly => "1w",
        };
        let url = self
            .previous_ohlc_url_template
            .replace("{symbol}", symbol)
            .replace("{interval}", interval);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch previous OHLC for {symbol}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("previous OHLC request for {symbol} failed: {}", resp.status());
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse previous OHLC JSON for {symbol}"))?;

        let bar = body
            .as_array()
            .and_then(|arr| arr.first())
            .context("previous OHLC response had no bars")?;

        let high = parse_numeric(&bar[2]).context("bar.high")?;
        let low = parse_numeric(&bar[3]).context("bar.low")?;
        let close = parse_numeric(&bar[4]).context("bar.close")?;

        Ok(PreviousOhlc { high, low, close })
    }
}

fn parse_numeric(val: &serde_json::Value) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().context("failed to parse numeric string"),
        serde_json::Value::Number(n) => n.as_f64().context("not a valid f64"),
        _ => anyhow::bail!("unexpected JSON type for numeric field"),
    }
}

/// HTTP-facing freshness/status summary for one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodStatus {
    pub updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub next_refresh_at: DateTime<Utc>,
    pub seconds_until: i64,
    pub symbol_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefresherStatus {
    pub daily: PeriodStatus,
    pub weekly: PeriodStatus,
}

/// "This week's Monday" under the ISO-week definition: the Monday of the ISO
/// week containing `date`, on every weekday including Sunday. This
/// deliberately ignores any inline arithmetic the original codebase used
/// (spec §9's documented open question) in favor of `chrono`'s ISO week.
pub fn this_week_monday(date: NaiveDate) -> NaiveDate {
    let iso = date.iso_week();
    NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
        .expect("ISO week always has a Monday")
}

pub struct PivotRefresher {
    store: Arc<PivotStore>,
    source: Arc<dyn PreviousOhlcSource>,
    data_dir: PathBuf,
    tz_offset: FixedOffset,
    worker_pool_size: usize,
    symbols_override: Vec<String>,
}

impl PivotRefresher {
    pub fn new(
        store: Arc<PivotStore>,
        source: Arc<dyn PreviousOhlcSource>,
        data_dir: impl Into<PathBuf>,
        tz_offset_hours: i32,
        worker_pool_size: usize,
        symbols_override: Vec<String>,
    ) -> Self {
        Self {
            store,
            source,
            data_dir: data_dir.into(),
            tz_offset: FixedOffset::east_opt(tz_offset_hours * 3600)
                .unwrap_or_else(|| FixedOffset::east_opt(8 * 3600).unwrap()),
            worker_pool_size: worker_pool_size.max(1),
            symbols_override,
        }
    }

    fn cache_path(&self, period: Period) -> PathBuf {
        let name = match period {
            Period::Daily => "daily.json",
            Period::Weekly => "weekly.json",
        };
        self.data_dir.join("pivots").join(name)
    }

    /// Load cached snapshots from disk and swap them in, tolerating missing
    /// or corrupt files (spec §4.4: "tolerating missing/corrupt files").
    pub fn load_from_disk(&self) {
        for period in Period::ALL {
            let path = self.cache_path(period);
            match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<Snapshot>(&content) {
                    Ok(snapshot) => {
                        info!(period = %period, path = %path.display(), "loaded pivot snapshot from disk");
                        self.store.swap(period, snapshot);
                    }
                    Err(e) => warn!(period = %period, error = %e, "corrupt pivot cache, ignoring"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(period = %period, "no pivot cache on disk yet");
                }
                Err(e) => warn!(period = %period, error = %e, "failed to read pivot cache"),
            }
        }
    }

    fn save_to_disk(&self, period: Period, snapshot: &Snapshot) -> Result<()> {
        let path = self.cache_path(period);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let content = serde_json::to_string_pretty(snapshot).context("failed to serialise snapshot")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp snapshot to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp snapshot to {}", path.display()))?;
        Ok(())
    }

    /// Compute a candidate snapshot for `period`, bounding fetch concurrency
    /// to `worker_pool_size`. Returns `None` if too few symbols succeeded.
    async fn build_candidate(&self, period: Period) -> Option<Snapshot> {
        let symbols = if !self.symbols_override.is_empty() {
            self.symbols_override.clone()
        } else {
            match self.source.list_symbols().await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to enumerate symbol universe");
                    return None;
                }
            }
        };

        if symbols.is_empty() {
            warn!("empty symbol universe, skipping pivot refresh");
            return None;
        }

        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut tasks = Vec::with_capacity(symbols.len());
        for symbol in symbols.iter().cloned() {
            let sem = semaphore.clone();
            let source = self.source.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                match source.fetch(&symbol, period).await {
                    Ok(ohlc) => Some((symbol, camarilla(ohlc.high, ohlc.low, ohlc.close))),
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "previous OHLC fetch failed");
                        None
                    }
                }
            }));
        }

        let mut levels = HashMap::with_capacity(symbols.len());
        for task in tasks {
            if let Ok(Some((symbol, table))) = task.await {
                levels.insert(symbol, table);
            }
        }

        let prior_count = self.store.snapshot(period).map(|s| s.symbol_count());
        let min_acceptable = min_acceptable_symbol_count(symbols.len(), prior_count);
        if levels.len() < min_acceptable {
            warn!(
                period = %period,
                got = levels.len(),
                min_acceptable,
                "candidate pivot snapshot rejected: too few symbols"
            );
            return None;
        }

        Some(Snapshot::new(period, Utc::now(), levels))
    }

    /// Recompute and publish a snapshot for `period`, persisting to disk on
    /// success.
    pub async fn refresh(&self, period: Period) {
        if let Some(candidate) = self.build_candidate(period).await {
            if let Err(e) = self.save_to_disk(period, &candidate) {
                warn!(period = %period, error = %e, "failed to persist pivot snapshot (continuing in-memory)");
            }
            info!(period = %period, symbols = candidate.symbol_count(), "pivot snapshot refreshed");
            self.store.swap(period, candidate);
        }
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz_offset)
    }

    /// Daily fires at 08:02 local; stale if today's 08:02 has passed and
    /// `updated_at` predates it.
    fn daily_fire_time(&self, local_now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        local_now
            .date_naive()
            .and_hms_opt(8, 2, 0)
            .unwrap()
            .and_local_timezone(self.tz_offset)
            .unwrap()
    }

    /// Weekly fires Monday 08:02 local; "this week's Monday" uses the ISO
    /// week definition on every weekday including Sunday.
    fn weekly_fire_time(&self, local_now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let monday = this_week_monday(local_now.date_naive());
        monday
            .and_hms_opt(8, 2, 0)
            .unwrap()
            .and_local_timezone(self.tz_offset)
            .unwrap()
    }

    fn is_stale(&self, period: Period, local_now: DateTime<FixedOffset>) -> bool {
        let fire_time = match period {
            Period::Daily => self.daily_fire_time(local_now),
            Period::Weekly => self.weekly_fire_time(local_now),
        };
        if local_now < fire_time {
            return false;
        }
        match self.store.snapshot(period) {
            None => true,
            Some(snap) => snap.updated_at.with_timezone(&self.tz_offset) < fire_time,
        }
    }

    fn next_fire_time(&self, period: Period, local_now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let today_fire = match period {
            Period::Daily => self.daily_fire_time(local_now),
            Period::Weekly => self.weekly_fire_time(local_now),
        };
        if local_now < today_fire {
            return today_fire;
        }
        match period {
            Period::Daily => today_fire + chrono::Duration::days(1),
            Period::Weekly => today_fire + chrono::Duration::weeks(1),
        }
    }

    /// HTTP-facing status for both periods.
    pub fn status(&self) -> RefresherStatus {
        let local_now = self.local_now();
        RefresherStatus {
            daily: self.period_status(Period::Daily, local_now),
            weekly: self.period_status(Period::Weekly, local_now),
        }
    }

    fn period_status(&self, period: Period, local_now: DateTime<FixedOffset>) -> PeriodStatus {
        let snap = self.store.snapshot(period);
        let next_refresh_at = self.next_fire_time(period, local_now).with_timezone(&Utc);
        let seconds_until = (next_refresh_at - Utc::now()).num_seconds().max(0);
        PeriodStatus {
            updated_at: snap.as_ref().map(|s| s.updated_at),
            is_stale: self.is_stale(period, local_now),
            next_refresh_at,
            seconds_until,
            symbol_count: snap.map(|s| s.symbol_count()).unwrap_or(0),
        }
    }

    /// Run the scheduler loop for one period forever. Between scheduled
    /// fires the loop also refreshes immediately if the snapshot is stale.
    pub async fn run_scheduler(self: Arc<Self>, period: Period) {
        loop {
            let local_now = self.local_now();
            if self.is_stale(period, local_now) {
                self.refresh(period).await;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct FakeSource {
        ohlc: HashMap<String, PreviousOhlc>,
        symbols: Vec<String>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl PreviousOhlcSource for FakeSource {
        async fn list_symbols(&self) -> Result<Vec<String>> {
            Ok(self.symbols.clone())
        }

        async fn fetch(&self, symbol: &str, _period: Period) -> Result<PreviousOhlc> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("simulated failure");
            }
            self.ohlc
                .get(symbol)
                .copied()
                .context("no fixture for symbol")
        }
    }

    fn fixture() -> Arc<FakeSource> {
        let mut ohlc = HashMap::new();
        ohlc.insert(
            "BTCUSDT".to_string(),
            PreviousOhlc {
                high: 105.0,
                low: 95.0,
                close: 100.0,
            },
        );
        ohlc.insert(
            "ETHUSDT".to_string(),
            PreviousOhlc {
                high: 12.0,
                low: 8.0,
                close: 10.0,
            },
        );
        Arc::new(FakeSource {
            ohlc,
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            fail: Mutex::new(false),
        })
    }

    #[test]
    fn this_week_monday_matches_iso_week_every_weekday() {
        // 2024-01-01 is a Monday.
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for offset in 0..7 {
            let day = monday + chrono::Duration::days(offset);
            assert_eq!(this_week_monday(day), monday, "offset {offset}");
        }
        // Sunday 2024-01-07 must still resolve to the Monday that started its
        // ISO week, not the *next* Monday.
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(this_week_monday(sunday), monday);
        assert!(this_week_monday(sunday) <= sunday);
    }

    #[tokio::test]
    async fn build_candidate_succeeds_with_all_symbols() {
        let store = Arc::new(PivotStore::new());
        let refresher = PivotRefresher::new(store.clone(), fixture(), "/tmp/pivot-nexus-test", 8, 4, vec![]);
        let candidate = refresher.build_candidate(Period::Daily).await;
        assert!(candidate.is_some());
        assert_eq!(candidate.unwrap().symbol_count(), 2);
    }

    #[tokio::test]
    async fn build_candidate_rejects_when_all_fetches_fail() {
        let store = Arc::new(PivotStore::new());
        let source = fixture();
        *source.fail.lock().unwrap() = true;
        let refresher = PivotRefresher::new(store, source, "/tmp/pivot-nexus-test", 8, 4, vec![]);
        let candidate = refresher.build_candidate(Period::Daily).await;
        assert!(candidate.is_none());
    }
}
