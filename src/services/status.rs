use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;

const SPEED_SAMPLE_LIFETIME: Duration = Duration::from_secs(10);
const SPEED_MIN_SAMPLE_GAP: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverallStatus {
    /// Weighted progress of the whole run, `0.0..=1.0`.
    pub progress: f64,
    pub is_downloading: bool,
    /// Bytes per second.
    pub download_speed: f64,
    pub download_bytes: u64,
    pub download_total_bytes: u64,
    pub description: String,
}

/// Rolling download speed over the last ten seconds.
#[derive(Debug, Default)]
pub struct DownloadSpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
}

impl DownloadSpeedCalculator {
    pub fn add_sample(&mut self, total_bytes: u64) {
        self.add_sample_at(total_bytes, Instant::now());
    }

    pub fn add_sample_at(&mut self, total_bytes: u64, at: Instant) {
        if let Some((last_at, _)) = self.samples.back() {
            if at.saturating_duration_since(*last_at) < SPEED_MIN_SAMPLE_GAP {
                return;
            }
        }
        self.samples.push_back((at, total_bytes));
        while let Some((first_at, _)) = self.samples.front() {
            if at.saturating_duration_since(*first_at) > SPEED_SAMPLE_LIFETIME {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn restart(&mut self) {
        self.samples.clear();
    }

    pub fn bytes_per_second(&self) -> f64 {
        let (Some((first_at, first_bytes)), Some((last_at, last_bytes))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = last_at.saturating_duration_since(*first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        last_bytes.saturating_sub(*first_bytes) as f64 / elapsed
    }
}

/// Relative weights of the phases of a patch run, proportional to the bytes involved.
pub struct StatusWeights;

impl StatusWeights {
    fn megabytes(bytes: u64) -> f64 {
        bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn download(bytes: u64) -> f64 {
        Self::megabytes(bytes)
    }

    pub fn unarchive(bytes: u64) -> f64 {
        Self::megabytes(bytes) * 0.1
    }

    pub fn integrity_check(bytes: u64) -> f64 {
        Self::megabytes(bytes) * 0.05
    }

    pub fn copy_files(bytes: u64) -> f64 {
        Self::megabytes(bytes) * 0.01
    }

    pub fn install_diff(bytes: u64) -> f64 {
        Self::megabytes(bytes) * 0.2
    }
}

#[derive(Debug)]
struct ReporterEntry {
    weight: f64,
    progress: f64,
    download: Option<DownloadEntry>,
}

#[derive(Debug, Default)]
struct DownloadEntry {
    active: bool,
    bytes: u64,
    total: u64,
    speed: DownloadSpeedCalculator,
}

#[derive(Debug, Default)]
struct MonitorState {
    reporters: Vec<ReporterEntry>,
    description: String,
}

impl MonitorState {
    fn overall(&self) -> OverallStatus {
        let total_weight: f64 = self.reporters.iter().map(|entry| entry.weight).sum();
        let progress = if total_weight > 0.0 {
            self.reporters
                .iter()
                .map(|entry| entry.progress * entry.weight)
                .sum::<f64>()
                / total_weight
        } else {
            0.0
        };
        let mut status = OverallStatus {
            progress: progress.clamp(0.0, 1.0),
            description: self.description.clone(),
            ..Default::default()
        };
        if let Some(download) = self
            .reporters
            .iter()
            .rev()
            .filter_map(|entry| entry.download.as_ref())
            .find(|download| download.active)
        {
            status.is_downloading = true;
            status.download_bytes = download.bytes;
            status.download_total_bytes = download.total;
            status.download_speed = download.speed.bytes_per_second();
        }
        status
    }
}

/// Aggregates weighted reporters into one observable status. Purely observational.
#[derive(Clone)]
pub struct StatusMonitor {
    state: Arc<Mutex<MonitorState>>,
    sender: Arc<watch::Sender<OverallStatus>>,
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMonitor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(OverallStatus::default());
        Self {
            state: Arc::new(Mutex::new(MonitorState::default())),
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OverallStatus> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> OverallStatus {
        self.sender.borrow().clone()
    }

    pub fn set_description(&self, description: &str) {
        self.update(|state| state.description = description.to_string());
    }

    pub fn create_general_reporter(&self, weight: f64) -> GeneralStatusReporter {
        let id = self.register(weight, None);
        GeneralStatusReporter {
            monitor: self.clone(),
            id,
        }
    }

    pub fn create_download_reporter(&self, weight: f64) -> DownloadStatusReporter {
        let id = self.register(weight, Some(DownloadEntry::default()));
        DownloadStatusReporter {
            monitor: self.clone(),
            id,
        }
    }

    fn register(&self, weight: f64, download: Option<DownloadEntry>) -> usize {
        let mut id = 0;
        self.update(|state| {
            id = state.reporters.len();
            state.reporters.push(ReporterEntry {
                weight: weight.max(0.0),
                progress: 0.0,
                download,
            });
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MonitorState)) {
        let overall = {
            let mut state = self.lock();
            apply(&mut state);
            state.overall()
        };
        self.sender.send_replace(overall);
    }

    fn update_entry(&self, id: usize, apply: impl FnOnce(&mut ReporterEntry)) {
        self.update(|state| {
            if let Some(entry) = state.reporters.get_mut(id) {
                apply(entry);
            }
        });
    }
}

#[derive(Clone)]
pub struct GeneralStatusReporter {
    monitor: StatusMonitor,
    id: usize,
}

impl GeneralStatusReporter {
    pub fn set_progress(&self, progress: f64) {
        self.monitor
            .update_entry(self.id, |entry| entry.progress = progress.clamp(0.0, 1.0));
    }

    pub fn set_fraction(&self, done: u64, total: u64) {
        let progress = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        self.set_progress(progress);
    }
}

#[derive(Clone)]
pub struct DownloadStatusReporter {
    monitor: StatusMonitor,
    id: usize,
}

impl DownloadStatusReporter {
    pub fn on_download_started(&self) {
        self.monitor.update_entry(self.id, |entry| {
            if let Some(download) = entry.download.as_mut() {
                download.active = true;
                download.speed.restart();
            }
        });
    }

    pub fn on_download_progress(&self, bytes: u64, total: u64) {
        self.monitor.update_entry(self.id, |entry| {
            if total > 0 {
                entry.progress = (bytes as f64 / total as f64).clamp(0.0, 1.0);
            }
            if let Some(download) = entry.download.as_mut() {
                download.bytes = bytes;
                download.total = total;
                download.speed.add_sample(bytes);
            }
        });
    }

    pub fn on_download_ended(&self) {
        self.monitor.update_entry(self.id, |entry| {
            entry.progress = 1.0;
            if let Some(download) = entry.download.as_mut() {
                download.active = false;
            }
        });
    }
}
