//! Register-access timing profiler.
//!
//! Samples configuration-space reads at a fixed cadence for a bounded
//! duration and aggregates per-offset counts plus a bucketed latency
//! histogram. The output only refines advisory fields in the render
//! context; a build without a profile is still fully specified.

use crate::reader::SysfsReader;
use pciforge_core::profile::{
    BehaviorProfile, DeviceIdentity, RegisterAccess, LATENCY_BUCKET_BOUNDS_NS,
};
use pciforge_core::Bdf;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registers sampled on every tick: vendor/device, status/command, BAR0.
const SAMPLED_OFFSETS: [u16; 3] = [0x00, 0x04, 0x10];

const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Cooperative cancellation handle. Cancelling makes the profiler return
/// partial results at the next sample boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct BehaviorProfiler<'a> {
    reader: &'a SysfsReader,
    bdf: Bdf,
    enable_variance: bool,
}

impl<'a> BehaviorProfiler<'a> {
    pub fn new(reader: &'a SysfsReader, bdf: Bdf, enable_variance: bool) -> Self {
        Self {
            reader,
            bdf,
            enable_variance,
        }
    }

    /// Sample for up to `duration_s` seconds. Never fails: when the device
    /// cannot be read the result is an empty (all-zero) profile.
    pub fn capture(
        &self,
        duration_s: f32,
        identity: &DeviceIdentity,
        cancel: &CancelToken,
    ) -> BehaviorProfile {
        let mut accesses: Vec<RegisterAccess> = SAMPLED_OFFSETS
            .iter()
            .map(|&offset| RegisterAccess {
                offset,
                read_count: 0,
                write_count: 0,
                latency_ns_histogram: vec![0; LATENCY_BUCKET_BOUNDS_NS.len() + 1],
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs_f32(duration_s.max(0.0));
        let mut samples: u64 = 0;

        while Instant::now() < deadline && !cancel.is_cancelled() {
            let started = Instant::now();
            match self.reader.read_config(self.bdf) {
                Ok(_) => {
                    let latency_ns = started.elapsed().as_nanos() as u64;
                    let bucket = latency_bucket(latency_ns);
                    for access in &mut accesses {
                        access.read_count += 1;
                        access.latency_ns_histogram[bucket] += 1;
                    }
                    samples += 1;
                }
                Err(e) => {
                    tracing::debug!("profiler sample failed: {e}");
                    break;
                }
            }
            std::thread::sleep(SAMPLE_INTERVAL);
        }

        if cancel.is_cancelled() {
            tracing::info!(samples, "behavior profiling cancelled, returning partial results");
        } else {
            tracing::debug!(samples, "behavior profiling complete");
        }

        BehaviorProfile {
            register_accesses: accesses,
            interrupt_rate_hz: None,
            dma_burst_size_distribution: None,
            variance_seed: self.enable_variance.then(|| variance_seed(identity)),
        }
    }
}

fn latency_bucket(latency_ns: u64) -> usize {
    LATENCY_BUCKET_BOUNDS_NS
        .iter()
        .position(|&bound| latency_ns < bound)
        .unwrap_or(LATENCY_BUCKET_BOUNDS_NS.len())
}

/// Deterministic per-donor seed for manufacturing-variance scaling.
pub fn variance_seed(identity: &DeviceIdentity) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(identity.vendor_id.to_le_bytes());
    hasher.update(identity.device_id.to_le_bytes());
    hasher.update(identity.class_code.to_le_bytes());
    hasher.update([identity.revision_id]);
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x8086,
            device_id: 0x1533,
            subsystem_vendor_id: 0x8086,
            subsystem_device_id: 0x0001,
            class_code: 0x020000,
            revision_id: 3,
        }
    }

    #[test]
    fn absent_device_yields_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let reader = SysfsReader::new(dir.path());
        let bdf: Bdf = "0000:03:00.0".parse().unwrap();

        let profiler = BehaviorProfiler::new(&reader, bdf, false);
        let profile = profiler.capture(0.05, &identity(), &CancelToken::new());
        assert!(profile.register_accesses.iter().all(|a| a.read_count == 0));
        assert!(profile.variance_seed.is_none());
    }

    #[test]
    fn cancelled_token_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("0000:03:00.0");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(dev.join("config"), vec![0u8; 256]).unwrap();

        let reader = SysfsReader::new(dir.path());
        let bdf: Bdf = "0000:03:00.0".parse().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let profiler = BehaviorProfiler::new(&reader, bdf, false);
        let started = Instant::now();
        let profile = profiler.capture(10.0, &identity(), &cancel);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(profile.register_accesses.iter().all(|a| a.read_count == 0));
    }

    #[test]
    fn variance_seed_is_deterministic() {
        assert_eq!(variance_seed(&identity()), variance_seed(&identity()));
        let mut other = identity();
        other.device_id = 0x1534;
        assert_ne!(variance_seed(&identity()), variance_seed(&other));
    }

    #[test]
    fn latency_buckets_cover_full_range() {
        assert_eq!(latency_bucket(0), 0);
        assert_eq!(latency_bucket(999), 0);
        assert_eq!(latency_bucket(1_000), 1);
        assert_eq!(latency_bucket(u64::MAX), LATENCY_BUCKET_BOUNDS_NS.len());
    }
}
