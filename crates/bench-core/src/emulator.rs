//! Location and validation of an installed emulator build.
//!
//! Building the emulator is outside this crate. Each build identity is
//! expected under `<build_root>/qemu-<id>` (build tree, where the plugin
//! lives) and `<install_root>/qemu-<id>` (installed binaries).

use std::path::{Path, PathBuf};

use crate::error::SetupError;
use crate::identity::BuildId;

/// Emulator binaries that must be present in an install.
pub const REQUIRED_BINARIES: [&str; 2] = ["qemu-riscv32", "qemu-riscv64"];

/// Binary used to run the benchmarks.
pub const EMULATOR_BINARY: &str = "qemu-riscv64";

/// Plugin locations relative to the build tree, newest layout last.
pub const PLUGIN_CANDIDATES: [&str; 2] =
    ["tests/plugin/libinsn.so", "tests/tcg/plugins/libinsn.so"];

/// An installed emulator plus its instruction-count plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EmulatorInstall {
    install_dir: PathBuf,
    plugin: PathBuf,
}

impl EmulatorInstall {
    /// Wraps an install directory and plugin path without checking them.
    #[must_use]
    pub const fn new(install_dir: PathBuf, plugin: PathBuf) -> Self {
        Self {
            install_dir,
            plugin,
        }
    }

    /// Locates the install for `build`, checking that both binaries exist and
    /// that a plugin can be found.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::EmulatorMissing`] or
    /// [`SetupError::PluginMissing`].
    pub fn locate(
        build: &BuildId,
        build_root: &Path,
        install_root: &Path,
    ) -> Result<Self, SetupError> {
        let dir_name = format!("qemu-{build}");
        let install_dir = install_root.join(&dir_name);
        let build_dir = build_root.join(&dir_name);

        for binary in REQUIRED_BINARIES {
            let path = install_dir.join("bin").join(binary);
            if !path.is_file() {
                return Err(SetupError::EmulatorMissing { path });
            }
        }

        let plugin = find_plugin(&build_dir).ok_or(SetupError::PluginMissing { build_dir })?;
        tracing::debug!(%build, plugin = %plugin.display(), "emulator located");
        Ok(Self::new(install_dir, plugin))
    }

    /// Directory prepended to the emulator child's `PATH`.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.install_dir.join("bin")
    }

    /// Full path of the benchmark emulator binary.
    #[must_use]
    pub fn emulator_binary(&self) -> PathBuf {
        self.bin_dir().join(EMULATOR_BINARY)
    }

    /// Instruction-count plugin.
    #[must_use]
    pub fn plugin(&self) -> &Path {
        &self.plugin
    }
}

fn find_plugin(build_dir: &Path) -> Option<PathBuf> {
    PLUGIN_CANDIDATES
        .iter()
        .map(|rel| build_dir.join(rel))
        .find(|path| path.is_file())
}
