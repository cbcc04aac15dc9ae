//! JSON-file-backed repositories (DESIGN.md Open Question 4): one
//! `RwLock<HashMap<Uuid, T>>` per entity, persisted to a single JSON file
//! under the worker's state directory, in the teacher's
//! `ScheduleStore`/`DeliveryStore` manner (`runtime/schedules/store.rs`,
//! `runtime/deliveries.rs`). `RuleStore` additionally carries the
//! `RuleState` map and implements the `compare_and_swap_state` CAS used by
//! the anti-flap state machine (spec §4.7/§5).

mod alert;
mod fetch_attempt;
mod fetch_profile;
mod rule;
mod run;
mod source;
mod workspace;

pub use alert::JsonAlertRepo;
pub use fetch_attempt::JsonFetchAttemptRepo;
pub use fetch_profile::JsonFetchProfileRepo;
pub use rule::JsonRuleRepo;
pub use run::JsonRunRepo;
pub use source::{JsonChannelRepo, JsonSourceRepo};
pub use workspace::JsonWorkspaceRepo;

use std::path::{Path, PathBuf};

/// Resolve `<state_dir>/<name>.json`, creating `state_dir` if missing.
fn file_path(state_dir: &Path, name: &str) -> PathBuf {
    let _ = std::fs::create_dir_all(state_dir);
    state_dir.join(format!("{name}.json"))
}

/// Load a `Vec<T>` from a JSON file, defaulting to empty on any error
/// (missing file, corrupt JSON) — the teacher's `ScheduleStore::load`
/// idiom: best-effort load, never a hard failure at boot.
fn load_vec<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok())
        .unwrap_or_default()
}

/// Persist a slice to `path` as pretty JSON. Logged, not propagated — a
/// failed write shouldn't abort the run that triggered it (teacher's
/// `ScheduleStore::persist`).
async fn persist_vec<T: serde::Serialize + Send + 'static>(path: PathBuf, items: Vec<T>) {
    let json = match serde_json::to_string_pretty(&items) {
        Ok(j) => j,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to serialize store");
            return;
        }
    };
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, json) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist store");
        }
    })
    .await;
}
