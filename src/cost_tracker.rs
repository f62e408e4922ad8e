//! Persisted, session-wide ledger of generation costs.
//!
//! The ledger is loaded from storage once, before the first mutation. All
//! mutations go through the ledger mutex, so concurrent `add` calls apply in
//! some serial order. The latest total/count is published on a watch channel
//! for synchronous reads and change notification.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OnceCell};

use crate::cost::CostBreakdown;
use crate::store::{Database, KvTable, StoreError};

const LEDGER_KEY: &str = "ledger";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    /// Generation id the cost belongs to.
    pub label: String,
    pub cost: CostBreakdown,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredLedger {
    entries: Vec<CostEntry>,
}

/// Running total plus the number of recorded costs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostSnapshot {
    pub total: CostBreakdown,
    pub count: usize,
}

impl CostSnapshot {
    fn of(entries: &[CostEntry]) -> Self {
        Self {
            total: entries.iter().map(|e| &e.cost).sum(),
            count: entries.len(),
        }
    }
}

pub struct CostTracker {
    db: Database,
    ledger: Mutex<Vec<CostEntry>>,
    ready: OnceCell<()>,
    snapshot: watch::Sender<CostSnapshot>,
}

impl CostTracker {
    pub fn new(db: Database) -> Self {
        let (snapshot, _) = watch::channel(CostSnapshot::default());
        Self {
            db,
            ledger: Mutex::new(Vec::new()),
            ready: OnceCell::new(),
            snapshot,
        }
    }

    /// Current total and count. Reflects storage only after the first async call.
    pub fn snapshot(&self) -> CostSnapshot {
        *self.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CostSnapshot> {
        self.snapshot.subscribe()
    }

    async fn ensure_ready(&self) {
        self.ready
            .get_or_init(|| async {
                let entries = match self.load().await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load cost ledger; starting empty");
                        Vec::new()
                    }
                };
                let mut ledger = self.ledger.lock().await;
                *ledger = entries;
                self.snapshot.send_replace(CostSnapshot::of(&ledger));
            })
            .await;
    }

    async fn load(&self) -> Result<Vec<CostEntry>, StoreError> {
        let Some(raw) = self.db.get_kv(KvTable::Costs, LEDGER_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<StoredLedger>(&raw) {
            Ok(stored) => Ok(stored.entries),
            Err(e) => {
                tracing::warn!(error = %e, "dropping invalid cost ledger");
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, entries: &[CostEntry]) {
        let stored = StoredLedger {
            entries: entries.to_vec(),
        };
        let result = match serde_json::to_string(&stored) {
            Ok(payload) => self.db.put_kv(KvTable::Costs, LEDGER_KEY, payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist cost ledger");
        }
    }

    pub async fn load_snapshot(&self) -> CostSnapshot {
        self.ensure_ready().await;
        self.snapshot()
    }

    pub async fn add(&self, label: impl Into<String>, cost: CostBreakdown) {
        self.ensure_ready().await;
        let mut ledger = self.ledger.lock().await;
        ledger.push(CostEntry {
            timestamp: Utc::now(),
            label: label.into(),
            cost,
        });
        self.persist(&ledger).await;
        self.snapshot.send_replace(CostSnapshot::of(&ledger));
    }

    pub async fn clear(&self) {
        self.ensure_ready().await;
        let mut ledger = self.ledger.lock().await;
        ledger.clear();
        if let Err(e) = self.db.delete_kv(KvTable::Costs, LEDGER_KEY).await {
            tracing::warn!(error = %e, "failed to clear cost ledger");
        }
        self.snapshot.send_replace(CostSnapshot::default());
    }

    pub async fn entries(&self) -> Vec<CostEntry> {
        self.ensure_ready().await;
        self.ledger.lock().await.clone()
    }

    /// Human-readable report: header, category totals, then one line per
    /// entry in insertion order. Same ledger, same text.
    pub async fn export(&self) -> String {
        self.ensure_ready().await;
        let ledger = self.ledger.lock().await;
        render_report(&ledger)
    }
}

fn usd(v: f64) -> String {
    format!("${v:.6}")
}

fn render_report(entries: &[CostEntry]) -> String {
    let snap = CostSnapshot::of(entries);
    let mut out = String::new();
    out.push_str("Review generation costs\n");
    out.push_str(&format!("Generations: {}\n\n", snap.count));
    out.push_str("Totals\n");
    out.push_str(&format!("  Text input:  {}\n", usd(snap.total.text_input_cost())));
    out.push_str(&format!("  Text output: {}\n", usd(snap.total.text_output_cost())));
    out.push_str(&format!("  Images:      {}\n", usd(snap.total.image_cost())));
    out.push_str(&format!("  Total:       {}\n", usd(snap.total.total_cost())));
    out.push_str("\nEntries\n");
    for (i, e) in entries.iter().enumerate() {
        out.push_str(&format!(
            "  {:>3}. {}  {}  {} (input {}, output {}, image {})\n",
            i + 1,
            e.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            e.label,
            usd(e.cost.total_cost()),
            usd(e.cost.text_input_cost()),
            usd(e.cost.text_output_cost()),
            usd(e.cost.image_cost()),
        ));
    }
    out
}
