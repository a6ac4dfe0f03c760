//! Source distribution across video worker processes
//!
//! Pure sharding: N sources are split into at most `max_processes`
//! contiguous shards whose sizes differ by at most one, preserving the
//! configured source order.

use crate::config::SourceConfig;

/// A contiguous slice of sources assigned to one worker process
#[derive(Debug, Clone)]
pub struct Shard {
    pub index: usize,
    pub sources: Vec<SourceConfig>,
}

/// Partition `sources` into `min(max_processes, N)` shards.
///
/// The first `N mod P` shards receive one extra source. Zero sources or
/// zero processes yield no shards.
pub fn distribute(sources: &[SourceConfig], max_processes: usize) -> Vec<Shard> {
    let n = sources.len();
    let p = max_processes.min(n);
    if p == 0 {
        return Vec::new();
    }

    let base = n / p;
    let remainder = n % p;

    let mut shards = Vec::with_capacity(p);
    let mut offset = 0;
    for index in 0..p {
        let size = if index < remainder { base + 1 } else { base };
        shards.push(Shard {
            index,
            sources: sources[offset..offset + size].to_vec(),
        });
        offset += size;
    }
    shards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyPolicy;

    fn sources(n: usize) -> Vec<SourceConfig> {
        (0..n)
            .map(|i| SourceConfig {
                id: format!("cam{i}"),
                name: format!("Camera {i}"),
                url: format!("rtsp://cam/{i}"),
                tags: vec![],
                notify: NotifyPolicy::default(),
            })
            .collect()
    }

    fn sizes(shards: &[Shard]) -> Vec<usize> {
        shards.iter().map(|s| s.sources.len()).collect()
    }

    #[test]
    fn test_five_sources_two_processes() {
        let shards = distribute(&sources(5), 2);
        assert_eq!(sizes(&shards), vec![3, 2]);
        let order: Vec<&str> = shards
            .iter()
            .flat_map(|s| s.sources.iter().map(|src| src.id.as_str()))
            .collect();
        assert_eq!(order, vec!["cam0", "cam1", "cam2", "cam3", "cam4"]);
    }

    #[test]
    fn test_empty_sources_yield_no_shards() {
        assert!(distribute(&sources(0), 3).is_empty());
    }

    #[test]
    fn test_zero_processes_yield_no_shards() {
        assert!(distribute(&sources(4), 0).is_empty());
    }

    #[test]
    fn test_more_processes_than_sources() {
        let shards = distribute(&sources(3), 8);
        assert_eq!(sizes(&shards), vec![1, 1, 1]);
    }

    #[test]
    fn test_partition_properties_hold_for_all_small_inputs() {
        for n in 0..32 {
            for p in 1..8 {
                let input = sources(n);
                let shards = distribute(&input, p);
                let total: usize = shards.iter().map(|s| s.sources.len()).sum();
                assert_eq!(total, n, "n={n} p={p}");
                if !shards.is_empty() {
                    let max = shards.iter().map(|s| s.sources.len()).max().unwrap();
                    let min = shards.iter().map(|s| s.sources.len()).min().unwrap();
                    assert!(max - min <= 1, "n={n} p={p}");
                }
                let order: Vec<&str> = shards
                    .iter()
                    .flat_map(|s| s.sources.iter().map(|src| src.id.as_str()))
                    .collect();
                let expected: Vec<String> = (0..n).map(|i| format!("cam{i}")).collect();
                assert_eq!(order, expected.iter().map(String::as_str).collect::<Vec<_>>());
            }
        }
    }
}
