use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::cache::fingerprint_container;
use crate::extractor::extract_container;
use crate::model::{AssetRecord, ContainerFingerprint, ScanContainer};
use crate::reader::ContainerReader;

/// Shared cancellation flag. Workers check it between containers and before
/// every entry; in-flight entry extraction is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of scanning one container. `ordinal` is the container's position
/// in the discovery order so the final index can be frozen deterministically
/// even though workers complete out of order.
pub(crate) struct ContainerScanOutcome {
    pub ordinal: usize,
    pub container: ScanContainer,
    pub fingerprint: Option<ContainerFingerprint>,
    pub records: Vec<AssetRecord>,
    pub malformed_entries: usize,
    pub error: Option<String>,
}

/// Drains the container list with a bounded worker pool and streams
/// per-container outcomes to `on_outcome` in completion order.
///
/// Returns `true` when every container was processed; `false` when the scan
/// was cancelled first. Per-container failures come back as outcomes with
/// `error` set — they never abort the sweep.
pub(crate) fn scan_containers_parallel<F>(
    containers: Vec<ScanContainer>,
    cancel: &CancellationToken,
    max_workers: usize,
    mut on_outcome: F,
) -> bool
where
    F: FnMut(ContainerScanOutcome),
{
    let total = containers.len();
    if total == 0 {
        return !cancel.is_cancelled();
    }

    let workers = thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(1)
        .clamp(1, max_workers.max(1))
        .min(total);

    let next_index = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel::<ContainerScanOutcome>();
    let containers = &containers;
    let next_index = &next_index;

    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }

                let index = next_index.fetch_add(1, Ordering::Relaxed);
                if index >= containers.len() {
                    break;
                }

                match scan_one_container(index, &containers[index], cancel) {
                    Some(outcome) => {
                        if sender.send(outcome).is_err() {
                            break;
                        }
                    }
                    // Cancelled mid-extraction; partial results are dropped.
                    None => break,
                }
            });
        }

        drop(sender);

        let mut received = 0usize;
        while received < total {
            if cancel.is_cancelled() {
                return false;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(outcome) => {
                    received += 1;
                    on_outcome(outcome);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        received == total && !cancel.is_cancelled()
    })
}

fn scan_one_container(
    ordinal: usize,
    container: &ScanContainer,
    cancel: &CancellationToken,
) -> Option<ContainerScanOutcome> {
    let failed = |message: String| ContainerScanOutcome {
        ordinal,
        container: container.clone(),
        fingerprint: None,
        records: Vec::new(),
        malformed_entries: 0,
        error: Some(message),
    };

    let fingerprint =
        match fingerprint_container(&container.container_path, container.container_type) {
            Ok(fingerprint) => fingerprint,
            Err(error) => return Some(failed(error.to_string())),
        };

    let mut reader =
        match ContainerReader::open(&container.container_path, container.container_type) {
            Ok(reader) => reader,
            Err(error) => return Some(failed(error.to_string())),
        };

    match extract_container(container, &mut reader, cancel) {
        Ok(extraction) if extraction.cancelled => None,
        Ok(extraction) => Some(ContainerScanOutcome {
            ordinal,
            container: container.clone(),
            fingerprint: Some(fingerprint),
            records: extraction.records,
            malformed_entries: extraction.malformed_entries,
            error: None,
        }),
        Err(error) => Some(failed(error.to_string())),
    }
}

/// Refresh plan over a cached fingerprint map: which containers can keep
/// their cached records, which need (re-)extraction, and which disappeared.
pub(crate) struct RefreshPlan {
    pub unchanged: Vec<ScanContainer>,
    pub changed_or_new: Vec<ScanContainer>,
    pub removed_paths: Vec<String>,
    pub fingerprints: HashMap<String, ContainerFingerprint>,
}

pub(crate) fn build_refresh_plan(
    cached_fingerprints: &HashMap<String, ContainerFingerprint>,
    current_containers: &[ScanContainer],
) -> RefreshPlan {
    let mut unchanged = Vec::new();
    let mut changed_or_new = Vec::new();
    let mut fingerprints = HashMap::new();
    let mut current_paths = HashSet::new();

    for container in current_containers {
        let path_key = container.path_key();
        current_paths.insert(path_key.clone());

        let fingerprint =
            match fingerprint_container(&container.container_path, container.container_type) {
                Ok(fingerprint) => fingerprint,
                Err(error) => {
                    // Unreadable right now; re-extraction will surface the
                    // failure through the normal per-container path.
                    warn!(container = %path_key, error = %error, "fingerprint failed during refresh");
                    changed_or_new.push(container.clone());
                    continue;
                }
            };

        let is_unchanged = cached_fingerprints
            .get(&path_key)
            .map(|cached| cached == &fingerprint)
            .unwrap_or(false);

        if is_unchanged {
            unchanged.push(container.clone());
        } else {
            changed_or_new.push(container.clone());
        }
        fingerprints.insert(path_key, fingerprint);
    }

    let mut removed_paths: Vec<String> = cached_fingerprints
        .keys()
        .filter(|path| !current_paths.contains(*path))
        .cloned()
        .collect();
    removed_paths.sort();

    RefreshPlan {
        unchanged,
        changed_or_new,
        removed_paths,
        fingerprints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetContainerType, AssetSourceType};
    use std::fs;
    use std::path::Path;

    fn jar_container(path: &Path, name: &str) -> ScanContainer {
        ScanContainer {
            source_type: AssetSourceType::Mod,
            source_name: name.to_string(),
            container_type: AssetContainerType::Jar,
            container_path: path.to_path_buf(),
        }
    }

    #[test]
    fn refresh_plan_detects_changed_new_and_removed_containers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path_a = dir.path().join("a.jar");
        let path_b = dir.path().join("b.jar");
        let path_c = dir.path().join("c.jar");
        fs::write(&path_a, b"a").expect("a");
        fs::write(&path_b, b"b").expect("b");

        let mut cached = HashMap::new();
        for path in [&path_a, &path_b] {
            let fingerprint =
                fingerprint_container(path, AssetContainerType::Jar).expect("fingerprint");
            cached.insert(fingerprint.path.clone(), fingerprint);
        }

        fs::write(&path_c, b"c").expect("c");
        let current = vec![jar_container(&path_a, "a"), jar_container(&path_c, "c")];

        let plan = build_refresh_plan(&cached, &current);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.unchanged[0].source_name, "a");
        assert_eq!(plan.changed_or_new.len(), 1);
        assert_eq!(plan.changed_or_new[0].source_name, "c");
        assert_eq!(plan.removed_paths, vec![path_b.to_string_lossy().to_string()]);
        assert_eq!(plan.fingerprints.len(), 2);
    }

    #[test]
    fn cancelled_sweep_reports_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.jar");
        fs::write(&path, b"not a zip").expect("a");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut outcomes = 0;
        let completed = scan_containers_parallel(
            vec![jar_container(&path, "a")],
            &cancel,
            4,
            |_| outcomes += 1,
        );
        assert!(!completed);
        assert_eq!(outcomes, 0);
    }

    #[test]
    fn container_failures_surface_as_outcomes_not_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = dir.path().join("bad.jar");
        fs::write(&bad, b"not a zip archive").expect("bad");

        let cancel = CancellationToken::new();
        let mut outcomes = Vec::new();
        let completed = scan_containers_parallel(
            vec![jar_container(&bad, "bad")],
            &cancel,
            4,
            |outcome| outcomes.push(outcome),
        );

        assert!(completed);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].error.is_some());
        assert!(outcomes[0].records.is_empty());
    }
}
