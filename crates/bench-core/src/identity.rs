//! Configuration identity: build identity, benchmark routine, and vector
//! configuration, plus the suffix encoding used as the unique key for
//! workspaces, result files, and in-memory lookup.
//!
//! The suffix is injective: vector configurations and benchmark names never
//! contain a path separator, benchmark names never contain `-`, and the
//! configuration part parses unambiguously from the right, so a suffix can
//! only be produced by one `(build, benchmark, config)` tuple.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Allowed vector register lengths in bits.
pub const ALLOWED_VLENS: [u32; 4] = [128, 256, 512, 1024];

/// Allowed register-group multipliers.
pub const ALLOWED_LMULS: [u32; 4] = [1, 2, 4, 8];

/// Vector length reported for the scalar configuration.
pub const SCALAR_VLEN: u32 = 128;

/// Register-group multiplier reported for the scalar configuration.
pub const SCALAR_LMUL: u32 = 1;

/// Errors raised while parsing identity components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Benchmark name is not part of the routine catalogue.
    #[error("unknown benchmark `{0}`")]
    UnknownBenchmark(String),
    /// Configuration string is neither `stdlib` nor `<vlen>-<lmul>`.
    #[error("malformed vector configuration `{0}` (expected `stdlib` or `<vlen>-<lmul>`)")]
    MalformedConfig(String),
    /// Vector length is outside the allowed set.
    #[error("vector length {0} is not one of 128, 256, 512, 1024")]
    UnsupportedVlen(u32),
    /// Multiplier is outside the allowed set.
    #[error("multiplier {0} is not one of 1, 2, 4, 8")]
    UnsupportedLmul(u32),
    /// Build identity cannot be used as a path component.
    #[error("invalid build identity `{0}`")]
    InvalidBuildId(String),
}

/// Benchmark routines in the string/memory suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Benchmark {
    /// `memchr`
    Memchr,
    /// `memcmp`
    Memcmp,
    /// `memcpy`
    Memcpy,
    /// `memmove`
    Memmove,
    /// `memset`
    Memset,
    /// `strcat`
    Strcat,
    /// `strchr`
    Strchr,
    /// `strcmp`
    Strcmp,
    /// `strcpy`
    Strcpy,
    /// `strlen`
    Strlen,
    /// `strncat`
    Strncat,
    /// `strncmp`
    Strncmp,
    /// `strncpy`
    Strncpy,
    /// `strnlen`
    Strnlen,
}

impl Benchmark {
    /// Every routine in catalogue order.
    pub const ALL: [Self; 14] = [
        Self::Memchr,
        Self::Memcmp,
        Self::Memcpy,
        Self::Memmove,
        Self::Memset,
        Self::Strcat,
        Self::Strchr,
        Self::Strcmp,
        Self::Strcpy,
        Self::Strlen,
        Self::Strncat,
        Self::Strncmp,
        Self::Strncpy,
        Self::Strnlen,
    ];

    /// Routine name as passed to the build tool.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memchr => "memchr",
            Self::Memcmp => "memcmp",
            Self::Memcpy => "memcpy",
            Self::Memmove => "memmove",
            Self::Memset => "memset",
            Self::Strcat => "strcat",
            Self::Strchr => "strchr",
            Self::Strcmp => "strcmp",
            Self::Strcpy => "strcpy",
            Self::Strlen => "strlen",
            Self::Strncat => "strncat",
            Self::Strncmp => "strncmp",
            Self::Strncpy => "strncpy",
            Self::Strnlen => "strnlen",
        }
    }

    /// Iteration count used for the calibration probe at the first size.
    ///
    /// Verification builds run extra checking code per iteration, so they
    /// start from a baseline ten times smaller.
    #[must_use]
    pub const fn baseline_iterations(self, verify: bool) -> u64 {
        let normal = match self {
            Self::Memchr => 300_000,
            Self::Memcmp => 8_000_000,
            Self::Memcpy | Self::Memmove => 10_000_000,
            Self::Memset => 12_000_000,
            Self::Strcat | Self::Strncat => 3_000_000,
            Self::Strchr => 50_000,
            Self::Strcmp | Self::Strncmp => 6_000_000,
            Self::Strcpy | Self::Strnlen => 5_000_000,
            Self::Strlen => 9_000_000,
            Self::Strncpy => 4_000_000,
        };
        if verify {
            normal / 10
        } else {
            normal
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Benchmark {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|bm| bm.name() == s)
            .ok_or_else(|| IdentityError::UnknownBenchmark(s.to_string()))
    }
}

/// Vector configuration selecting the code path a benchmark is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VectorConfig {
    /// Scalar build linked against the standard library implementation.
    Scalar,
    /// Vector build for a given register length and group multiplier.
    Vector {
        /// Vector register length in bits.
        vlen: u32,
        /// Register-group multiplier.
        lmul: u32,
    },
}

impl VectorConfig {
    /// Creates a vector configuration, checking both fields against the
    /// allowed sets.
    ///
    /// # Errors
    ///
    /// Returns an error when `vlen` or `lmul` is not an allowed value.
    pub fn vector(vlen: u32, lmul: u32) -> Result<Self, IdentityError> {
        if !ALLOWED_VLENS.contains(&vlen) {
            return Err(IdentityError::UnsupportedVlen(vlen));
        }
        if !ALLOWED_LMULS.contains(&lmul) {
            return Err(IdentityError::UnsupportedLmul(lmul));
        }
        Ok(Self::Vector { vlen, lmul })
    }

    /// Returns `true` for the scalar/standard-library configuration.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Self::Scalar)
    }

    /// Vector length handed to the emulator (scalar reports 128).
    #[must_use]
    pub const fn vlen(self) -> u32 {
        match self {
            Self::Scalar => SCALAR_VLEN,
            Self::Vector { vlen, .. } => vlen,
        }
    }

    /// Multiplier reported in results (scalar reports 1).
    #[must_use]
    pub const fn lmul(self) -> u32 {
        match self {
            Self::Scalar => SCALAR_LMUL,
            Self::Vector { lmul, .. } => lmul,
        }
    }

    /// Suffix component: `stdlib` or `<vlen>-m<lmul>`.
    #[must_use]
    pub fn suffix(self) -> String {
        match self {
            Self::Scalar => "stdlib".to_string(),
            Self::Vector { vlen, lmul } => format!("{vlen}-m{lmul}"),
        }
    }
}

impl fmt::Display for VectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("stdlib"),
            Self::Vector { vlen, lmul } => write!(f, "{vlen}-{lmul}"),
        }
    }
}

impl FromStr for VectorConfig {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "stdlib" {
            return Ok(Self::Scalar);
        }
        let malformed = || IdentityError::MalformedConfig(s.to_string());
        let (vlen, lmul) = s.split_once('-').ok_or_else(malformed)?;
        let vlen = vlen.parse::<u32>().map_err(|_| malformed())?;
        let lmul = lmul.parse::<u32>().map_err(|_| malformed())?;
        Self::vector(vlen, lmul)
    }
}

/// Identity of one emulator build, e.g. a source-control commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct BuildId(String);

impl BuildId {
    /// Creates a build identity.
    ///
    /// # Errors
    ///
    /// Rejects empty names, `.`/`..`, and names containing a path separator
    /// or NUL, since the identity becomes part of directory and file names.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        let bad = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\', '\0']);
        if bad {
            return Err(IdentityError::InvalidBuildId(id));
        }
        Ok(Self(id))
    }

    /// Borrows the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BuildId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BuildId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BuildId> for String {
    fn from(value: BuildId) -> Self {
        value.0
    }
}

/// Full identity of one configuration unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Identity {
    /// Emulator build the benchmark runs under.
    pub build: BuildId,
    /// Benchmark routine.
    pub benchmark: Benchmark,
    /// Vector or scalar configuration.
    pub config: VectorConfig,
}

impl Identity {
    /// Creates an identity.
    #[must_use]
    pub const fn new(build: BuildId, benchmark: Benchmark, config: VectorConfig) -> Self {
        Self {
            build,
            benchmark,
            config,
        }
    }

    /// Unique key: `<build>-<benchmark>-<config suffix>`.
    #[must_use]
    pub fn suffix(&self) -> String {
        format!("{}-{}-{}", self.build, self.benchmark, self.config.suffix())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}
