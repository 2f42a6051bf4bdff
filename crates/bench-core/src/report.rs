//! Index of exported result files, as consumed by report generation.

use std::path::{Path, PathBuf};

use crate::config::MatrixConfig;
use crate::identity::{Benchmark, BuildId, Identity, VectorConfig};

/// Result file of each expected identity, if it exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultIndex {
    entries: Vec<(Identity, Option<PathBuf>)>,
}

impl ResultIndex {
    /// Looks for `<results_dir>/<suffix>.csv` for every combination.
    #[must_use]
    pub fn discover(
        results_dir: &Path,
        builds: &[BuildId],
        benchmarks: &[Benchmark],
        configs: &[VectorConfig],
    ) -> Self {
        let mut entries = Vec::with_capacity(builds.len() * benchmarks.len() * configs.len());
        for build in builds {
            for &benchmark in benchmarks {
                for &config in configs {
                    let identity = Identity::new(build.clone(), benchmark, config);
                    let path = results_dir.join(format!("{}.csv", identity.suffix()));
                    let file = path.is_file().then_some(path);
                    entries.push((identity, file));
                }
            }
        }
        Self { entries }
    }

    /// Index over the configured matrix.
    #[must_use]
    pub fn for_config(config: &MatrixConfig) -> Self {
        Self::discover(
            &config.results_dir,
            &config.builds,
            &config.benchmarks,
            &config.configs,
        )
    }

    /// Result file for `identity`.
    #[must_use]
    pub fn result_file(&self, identity: &Identity) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(id, _)| id == identity)
            .and_then(|(_, path)| path.as_deref())
    }

    /// Identities with a result file.
    pub fn found(&self) -> impl Iterator<Item = (&Identity, &Path)> + '_ {
        self.entries
            .iter()
            .filter_map(|(id, path)| path.as_deref().map(|p| (id, p)))
    }

    /// Identities without a result file.
    pub fn missing(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.entries
            .iter()
            .filter_map(|(id, path)| path.is_none().then_some(id))
    }

    /// Benchmarks with a result file for every build and config, in
    /// first-seen order.
    #[must_use]
    pub fn complete_benchmarks(&self) -> Vec<Benchmark> {
        let mut seen: Vec<Benchmark> = Vec::new();
        for (id, _) in &self.entries {
            if !seen.contains(&id.benchmark) {
                seen.push(id.benchmark);
            }
        }
        seen.retain(|&bm| {
            self.entries
                .iter()
                .filter(|(id, _)| id.benchmark == bm)
                .all(|(_, path)| path.is_some())
        });
        seen
    }

    /// Number of expected identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is expected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
