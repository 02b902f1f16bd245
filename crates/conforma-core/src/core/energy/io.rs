use super::matrix::EnergyMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read or write snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed snapshot file: {0}")]
    Format(#[from] serde_json::Error),
}

// JSON cannot represent non-finite floats, so energies are persisted as
// Option<f64> with None standing for +infinity (an infeasible combination),
// and the pruning-interval tag as None standing for "valid for any pruning".

#[derive(Serialize, Deserialize)]
struct SnapshotTriple {
    pos1: usize,
    rot1: usize,
    pos2: usize,
    rot2: usize,
    pos3: usize,
    rot3: usize,
    energy: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    num_rotamers: Vec<usize>,
    const_term: f64,
    one_body: Vec<Vec<Option<f64>>>,
    pairwise: Vec<Vec<Vec<Vec<Option<f64>>>>>,
    triples: Vec<SnapshotTriple>,
    pruning_interval: Option<f64>,
}

fn encode(energy: f64) -> Option<f64> {
    energy.is_finite().then_some(energy)
}

fn decode(energy: Option<f64>) -> f64 {
    energy.unwrap_or(f64::INFINITY)
}

fn to_snapshot(emat: &EnergyMatrix) -> Snapshot {
    let num_rotamers = emat.num_rotamers().to_vec();

    let one_body = (0..emat.num_pos())
        .map(|pos| {
            (0..emat.num_rotamers_at(pos))
                .map(|rot| encode(emat.one_body(pos, rot)))
                .collect()
        })
        .collect();

    let pairwise = (0..emat.num_pos())
        .map(|pos1| {
            (0..pos1)
                .map(|pos2| {
                    (0..emat.num_rotamers_at(pos1))
                        .map(|rot1| {
                            (0..emat.num_rotamers_at(pos2))
                                .map(|rot2| encode(emat.pairwise(pos1, rot1, pos2, rot2)))
                                .collect()
                        })
                        .collect()
                })
                .collect()
        })
        .collect();

    let triples = emat
        .triples()
        .iter()
        .map(|term| SnapshotTriple {
            pos1: term.pos1,
            rot1: term.rot1,
            pos2: term.pos2,
            rot2: term.rot2,
            pos3: term.pos3,
            rot3: term.rot3,
            energy: encode(term.energy),
        })
        .collect();

    Snapshot {
        num_rotamers,
        const_term: emat.const_term(),
        one_body,
        pairwise,
        triples,
        pruning_interval: encode(emat.pruning_interval()),
    }
}

fn from_snapshot(snapshot: Snapshot) -> EnergyMatrix {
    let mut emat = EnergyMatrix::new(&snapshot.num_rotamers);
    emat.set_const_term(snapshot.const_term);
    emat.set_pruning_interval(decode(snapshot.pruning_interval));

    for (pos, rots) in snapshot.one_body.into_iter().enumerate() {
        for (rot, energy) in rots.into_iter().enumerate() {
            emat.set_one_body(pos, rot, decode(energy));
        }
    }

    for (pos1, inner) in snapshot.pairwise.into_iter().enumerate() {
        for (pos2, table) in inner.into_iter().enumerate() {
            for (rot1, row) in table.into_iter().enumerate() {
                for (rot2, energy) in row.into_iter().enumerate() {
                    emat.set_pairwise(pos1, rot1, pos2, rot2, decode(energy));
                }
            }
        }
    }

    for triple in snapshot.triples {
        emat.add_triple(
            [
                (triple.pos1, triple.rot1),
                (triple.pos2, triple.rot2),
                (triple.pos3, triple.rot3),
            ],
            decode(triple.energy),
        );
    }

    emat
}

/// Persists the matrix, tagged with its current pruning interval.
pub fn save(emat: &EnergyMatrix, path: &Path) -> Result<(), SnapshotError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, &to_snapshot(emat))?;
    debug!("Saved energy matrix snapshot to {}", path.display());
    Ok(())
}

/// Loads a snapshot without checking its pruning-interval tag.
pub fn load(path: &Path) -> Result<EnergyMatrix, SnapshotError> {
    let reader = BufReader::new(File::open(path)?);
    let snapshot: Snapshot = serde_json::from_reader(reader)?;
    Ok(from_snapshot(snapshot))
}

/// Loads a snapshot only if it is valid for the caller's pruning interval:
/// tagged infinite, or tagged with an interval at least as wide as required.
/// Returns `None` for a stale snapshot, which the caller must recompute and
/// re-persist under the new tag.
pub fn load_valid(path: &Path, required_interval: f64) -> Result<Option<EnergyMatrix>, SnapshotError> {
    let emat = load(path)?;
    if emat.is_valid_for(required_interval) {
        Ok(Some(emat))
    } else {
        debug!(
            "Snapshot at {} tagged for interval {} is stale for required interval {}",
            path.display(),
            emat.pruning_interval(),
            required_interval
        );
        Ok(None)
    }
}

/// Loads a valid snapshot, or computes a fresh matrix and persists it.
///
/// The compute closure is responsible for tagging the matrix it returns with
/// the interval it was computed under.
pub fn load_or_compute<F>(
    path: &Path,
    required_interval: f64,
    compute: F,
) -> Result<EnergyMatrix, SnapshotError>
where
    F: FnOnce() -> EnergyMatrix,
{
    if path.exists() {
        if let Some(emat) = load_valid(path, required_interval)? {
            return Ok(emat);
        }
    }

    info!(
        "Computing energy matrix for pruning interval {} and persisting to {}",
        required_interval,
        path.display()
    );
    let emat = compute();
    save(&emat, path)?;
    Ok(emat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> EnergyMatrix {
        let mut emat = EnergyMatrix::new(&[2, 3]);
        emat.set_const_term(-1.25);
        emat.set_one_body(0, 0, 0.5);
        emat.set_one_body(0, 1, f64::INFINITY);
        emat.set_one_body(1, 2, -3.0);
        emat.set_pairwise(1, 0, 0, 0, 2.0);
        emat.set_pairwise(1, 2, 0, 1, f64::INFINITY);
        emat
    }

    #[test]
    fn round_trip_reproduces_values_and_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");

        let emat = sample_matrix();
        save(&emat, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.num_rotamers(), emat.num_rotamers());
        assert_eq!(loaded.const_term(), -1.25);
        assert_eq!(loaded.one_body(0, 0), 0.5);
        assert!(loaded.one_body(0, 1).is_infinite());
        assert_eq!(loaded.one_body(1, 2), -3.0);
        assert_eq!(loaded.pairwise(1, 0, 0, 0), 2.0);
        assert!(loaded.pairwise(1, 2, 0, 1).is_infinite());
        assert!(loaded.pruning_interval().is_infinite());
    }

    #[test]
    fn round_trip_preserves_triples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");

        let mut emat = EnergyMatrix::new(&[2, 2, 2]);
        emat.add_triple([(0, 1), (1, 0), (2, 1)], -0.5);
        save(&emat, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.has_higher_order_terms());
        let terms: Vec<_> = loaded.triples_for_pair(2, 1, 1, 0).collect();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].energy, -0.5);
        assert_eq!(terms[0].pos3, 0);
    }

    #[test]
    fn infinite_tag_is_valid_for_any_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");
        save(&sample_matrix(), &path).unwrap();

        assert!(load_valid(&path, 100.0).unwrap().is_some());
    }

    #[test]
    fn stale_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");

        let mut emat = sample_matrix();
        emat.set_pruning_interval(5.0);
        save(&emat, &path).unwrap();

        assert!(load_valid(&path, 5.0).unwrap().is_some());
        assert!(load_valid(&path, 10.0).unwrap().is_none());
    }

    #[test]
    fn load_or_compute_recomputes_and_persists_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");

        let mut stale = sample_matrix();
        stale.set_pruning_interval(2.0);
        save(&stale, &path).unwrap();

        let emat = load_or_compute(&path, 10.0, || {
            let mut fresh = EnergyMatrix::new(&[1]);
            fresh.set_one_body(0, 0, 42.0);
            fresh.set_pruning_interval(10.0);
            fresh
        })
        .unwrap();
        assert_eq!(emat.one_body(0, 0), 42.0);

        // The recomputed matrix replaced the stale snapshot on disk.
        let reloaded = load(&path).unwrap();
        assert_eq!(reloaded.num_pos(), 1);
        assert_eq!(reloaded.pruning_interval(), 10.0);
    }

    #[test]
    fn load_or_compute_skips_compute_for_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emat.json");
        save(&sample_matrix(), &path).unwrap();

        let emat = load_or_compute(&path, 50.0, || unreachable!("snapshot was valid")).unwrap();
        assert_eq!(emat.num_pos(), 2);
    }

    #[test]
    fn load_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(load(&path), Err(SnapshotError::Io(_))));
    }
}
