//! Linearization: turning a set of interceptors into one ordered sequence.
//!
//! Interceptors are bucketed by phase in registry order. Inside a bucket a
//! topological sort honours `before`/`after` edges; whenever several
//! interceptors are ready, the one contributed first wins, so unconstrained
//! interceptors keep their contribution order. Constraints naming an id that
//! is not in the same phase are ignored.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

use waypoint_core::{ConfigurationError, Interceptor, PhaseRegistry};

/// Orders `interceptors` by phase rank, then by same-phase constraints.
///
/// Fails if an interceptor names an unregistered phase or if constraints in
/// one phase form a cycle. The result is deterministic for a given input.
pub fn linearize(
    phases: &PhaseRegistry,
    interceptors: Vec<Arc<dyn Interceptor>>,
) -> Result<Vec<Arc<dyn Interceptor>>, ConfigurationError> {
    linearize_from(phases, interceptors, 0)
}

/// Like [`linearize`], but interceptors whose phase ranks below `floor` are
/// placed in the phase at `floor`.
///
/// The chain uses this when splicing into the unexecuted remainder: a phase
/// that has already passed cannot be revisited.
pub(crate) fn linearize_from(
    phases: &PhaseRegistry,
    interceptors: Vec<Arc<dyn Interceptor>>,
    floor: usize,
) -> Result<Vec<Arc<dyn Interceptor>>, ConfigurationError> {
    let total = interceptors.len();
    let mut buckets: BTreeMap<usize, Vec<Arc<dyn Interceptor>>> = BTreeMap::new();

    for interceptor in interceptors {
        let position =
            phases
                .position(interceptor.phase())
                .ok_or_else(|| ConfigurationError::UnknownPhase {
                    interceptor: interceptor.id().to_string(),
                    phase: interceptor.phase().to_string(),
                })?;
        buckets
            .entry(position.max(floor))
            .or_default()
            .push(interceptor);
    }

    let mut ordered = Vec::with_capacity(total);
    for (position, bucket) in buckets {
        let phase = phases
            .order()
            .get(position)
            .map_or("", |phase| phase.name());
        ordered.extend(sort_phase(phase, bucket)?);
    }
    Ok(ordered)
}

/// Stable topological sort of one phase bucket.
fn sort_phase(
    phase: &str,
    bucket: Vec<Arc<dyn Interceptor>>,
) -> Result<Vec<Arc<dyn Interceptor>>, ConfigurationError> {
    let n = bucket.len();
    if n < 2 {
        return Ok(bucket);
    }

    // Duplicate ids are possible with forced adds; constraints bind them all.
    let mut by_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, interceptor) in bucket.iter().enumerate() {
        by_id.entry(interceptor.id()).or_default().push(i);
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (i, interceptor) in bucket.iter().enumerate() {
        for id in interceptor.before() {
            for &j in by_id.get(id.as_str()).into_iter().flatten() {
                if j != i {
                    successors[i].insert(j);
                }
            }
        }
        for id in interceptor.after() {
            for &j in by_id.get(id.as_str()).into_iter().flatten() {
                if j != i {
                    successors[j].insert(i);
                }
            }
        }
    }

    let mut in_degree = vec![0usize; n];
    for edges in &successors {
        for &j in edges {
            in_degree[j] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < n {
        let interceptors = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| bucket[i].id().to_string())
            .collect();
        return Err(ConfigurationError::OrderingCycle {
            phase: phase.to_string(),
            interceptors,
        });
    }

    let mut slots: Vec<Option<Arc<dyn Interceptor>>> = bucket.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
