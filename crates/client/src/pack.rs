//! Header-pack reconstruction and PoW verification.
//!
//! Packs arrive as a shared prefix plus per-header elements, newest first.
//! After reconstruction every header's PoW is checked; the work is
//! embarrassingly parallel, so an injected executor may shard it.

use std::sync::atomic::{AtomicBool, Ordering};

use chain::{Header, HeaderElement, HeaderPrefix};

/// Sharded runner for CPU-bound verification.
pub trait Executor: Send + Sync {
    /// Partition `[0, count)` and call `task(start, len)` per shard. All
    /// shards complete before this returns.
    fn exec(&self, count: u32, task: &(dyn Fn(u32, u32) + Sync));
}

/// Runs the whole range inline.
pub struct Sequential;

impl Executor for Sequential {
    fn exec(&self, count: u32, task: &(dyn Fn(u32, u32) + Sync)) {
        if count > 0 {
            task(0, count);
        }
    }
}

/// Shards across scoped OS threads.
pub struct Threads {
    workers: usize,
}

impl Default for Threads {
    fn default() -> Self {
        Self::new()
    }
}

impl Threads {
    pub fn new() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

impl Executor for Threads {
    fn exec(&self, count: u32, task: &(dyn Fn(u32, u32) + Sync)) {
        let workers = self.workers.min(count as usize);
        if workers <= 1 {
            if count > 0 {
                task(0, count);
            }
            return;
        }

        let per = count / workers as u32;
        let rem = count % workers as u32;
        std::thread::scope(|s| {
            let mut start = 0u32;
            for w in 0..workers as u32 {
                let len = per + u32::from(w < rem);
                if len == 0 {
                    continue;
                }
                s.spawn(move || task(start, len));
                start += len;
            }
        });
    }
}

/// Rebuild the explicit header run from a pack.
///
/// The first header takes the prefix verbatim; each following one chains the
/// hash, bumps the height and accumulates difficulty into chainwork.
pub fn unpack(prefix: &HeaderPrefix, elements: &[HeaderElement]) -> Vec<Header> {
    let Some(last) = elements.last() else {
        return Vec::new();
    };

    let mut states = Vec::with_capacity(elements.len());
    states.push(Header::from_parts(prefix, last));

    for i in 1..elements.len() {
        let prev = &states[i - 1];
        let element = &elements[elements.len() - 1 - i];
        let s = Header::from_parts(
            &HeaderPrefix {
                height: prev.height + 1,
                prev: prev.hash(),
                chainwork: prev.chainwork + element.pow.difficulty,
            },
            element,
        );
        states.push(s);
    }
    states
}

/// Check every header's PoW; a single failure taints the whole pack.
pub fn verify(states: &[Header], exec: &dyn Executor) -> bool {
    let valid = AtomicBool::new(true);
    exec.exec(states.len() as u32, &|start, len| {
        for s in &states[start as usize..(start + len) as usize] {
            if !s.is_valid() {
                valid.store(false, Ordering::Relaxed);
            }
        }
    });
    valid.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use chain::Pow;

    fn mine(header: &mut Header) {
        while !header.is_valid() {
            header.pow.nonce += 1;
        }
    }

    fn test_run(n: u64) -> Vec<Header> {
        let mut out: Vec<Header> = Vec::new();
        for height in 1..=n {
            let prev = out.last().map(|s| s.hash()).unwrap_or(B256::ZERO);
            let chainwork = out.last().map(|s| s.chainwork).unwrap_or_default() + U256::from(10);
            let mut s = Header {
                height,
                prev,
                chainwork,
                kernels_root: B256::repeat_byte(height as u8),
                utxo_root: B256::ZERO,
                history_root: B256::ZERO,
                timestamp: 1_600_000_000 + height,
                pow: Pow {
                    difficulty: U256::from(10),
                    nonce: 0,
                },
            };
            mine(&mut s);
            out.push(s);
        }
        out
    }

    fn pack_of(states: &[Header]) -> (HeaderPrefix, Vec<HeaderElement>) {
        // Elements travel newest-first.
        let prefix = states[0].prefix();
        let elements = states.iter().rev().map(Header::element).collect();
        (prefix, elements)
    }

    #[test]
    fn unpack_rebuilds_the_run() {
        let run = test_run(12);
        let (prefix, elements) = pack_of(&run);
        assert_eq!(unpack(&prefix, &elements), run);
    }

    #[test]
    fn empty_pack_unpacks_empty() {
        let prefix = HeaderPrefix::default();
        assert!(unpack(&prefix, &[]).is_empty());
    }

    #[test]
    fn verify_accepts_mined_run() {
        let run = test_run(12);
        assert!(verify(&run, &Sequential));
        assert!(verify(&run, &Threads::with_workers(4)));
    }

    #[test]
    fn single_bad_header_taints_pack() {
        let mut run = test_run(12);
        // Raising the difficulty retroactively breaks exactly one PoW.
        run[7].pow.difficulty = U256::MAX;
        assert!(!verify(&run, &Sequential));
        assert!(!verify(&run, &Threads::with_workers(4)));
    }

    #[test]
    fn executors_agree_on_odd_shard_sizes() {
        let run = test_run(7);
        assert_eq!(
            verify(&run, &Sequential),
            verify(&run, &Threads::with_workers(3))
        );
    }
}
